pub mod config;
pub mod db;
pub mod error;
pub mod types;
pub mod agent;
pub mod tools;
pub mod cli;

pub use config::{AgentConfig, Config, DatabaseConfig};
pub use agent::{Agent, AgentReply, ChatSession, Transcript};
pub use db::{DatabaseHandle, DbTarget, HandleCache};
pub use error::ConfigError;
pub use cli::run_cli;
