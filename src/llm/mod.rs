//! Model backends: the provider-neutral capability the conversation engine
//! runs against, and one implementation per provider.

pub mod gemini;
pub mod mock;
pub mod openai;
pub mod translate;

pub use gemini::GeminiBackend;
pub use mock::{ScriptStep, ScriptedBackend};
pub use openai::OpenAiBackend;
pub use translate::{translate, DeclarationSet};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::BridgeResult;
use crate::types::{ConversationTurn, Segment, ToolDescriptor};

/// A backend-specific tool declaration that still exposes what it was built
/// from.
pub trait ToolDeclaration {
    fn name(&self) -> &str;
    fn schema(&self) -> &Value;
}

/// A language model that can be offered tools.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Declaration shape this provider expects.
    type Declaration: ToolDeclaration + Send + Sync;

    /// Short provider name for logs and errors.
    fn name(&self) -> &'static str;

    /// Project a descriptor into this provider's declaration format.
    ///
    /// Pure. Fails with `UnsupportedSchema` when the schema cannot be
    /// expressed without dropping information.
    fn declare(&self, descriptor: &ToolDescriptor) -> BridgeResult<Self::Declaration>;

    /// Ask the model for the next response given the history so far.
    async fn generate(
        &self,
        turns: &[ConversationTurn],
        declarations: &[Self::Declaration],
    ) -> BridgeResult<Vec<Segment>>;
}
