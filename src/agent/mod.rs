pub mod context;
pub mod core;
pub mod llm;
pub mod session;
pub mod trace;

pub use context::Context;
pub use core::{Agent, AgentReply};
pub use llm::{ChatModel, GroqClient};
pub use session::{ChatSession, Role, Transcript, TranscriptEntry, GREETING};
pub use trace::{AgentStep, ConsoleObserver, StepObserver, StepOutcome};
