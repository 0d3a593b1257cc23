pub mod builtins;
pub mod executor;
pub mod registry;

pub use builtins::sql::SqlTools;
pub use executor::ToolExecutor;
