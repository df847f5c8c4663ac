pub mod catalog;
pub mod invoker;
pub mod mock;

pub use catalog::ToolCatalog;
pub use invoker::{normalize_content, ToolInvoker};
pub use mock::{MockReply, MockToolServer};
