pub mod engine;
pub mod session;

pub use engine::{annotate, ConversationEngine};
pub use session::{is_exit_command, serve, ChatSession};
