use anyhow::Result;

use dbq::run_cli;

#[tokio::main]
async fn main() -> Result<()> {
    run_cli().await
}
