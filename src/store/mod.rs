//! Persistence layer: keyed-list buffers, the abort bus, conversation history
//! and processed message ids.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use memory::{
    InMemoryAbortBus, InMemoryConversationStore, InMemoryListStore, InMemoryProcessedIds,
};
pub use traits::{AbortBus, ConversationStore, KeyedListStore, NoticeStream, ProcessedIdStore};
