//! Chat history stores and the document index for Cortex.

pub mod documents;
pub mod file_store;
pub mod in_memory;

pub use documents::DocumentIndex;
pub use file_store::FileChatStore;
pub use in_memory::InMemoryChatStore;
