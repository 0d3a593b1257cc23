mod function;
mod groq;

pub use function::{FunctionCall, FunctionDefinition, Tool, ToolCall};
pub use groq::{ChatRequest, ChatResponse, Choice, Message, Usage};
