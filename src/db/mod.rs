pub mod cache;
pub mod handle;

pub use cache::HandleCache;
pub use handle::{DatabaseHandle, DbTarget, QueryOutput};
