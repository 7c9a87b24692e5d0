//! Inbound message coordination.
//!
//! - `debounce` (`DebounceCoordinator`): buffer, abort, (re)arm the combine task
//! - `cancellation` (`CancellationRegistry`): per-process live tokens
//! - `batch` (`BatchProcessor`): drain, dedupe, merge, execute
//! - `buffer` (`PendingBuffer`): typed per-user pending list
//! - `types`: payloads and constants shared by the above

pub mod batch;
pub mod buffer;
pub mod cancellation;
pub mod debounce;
pub mod types;

pub use batch::{BatchProcessor, dedupe_and_sort, merge_messages};
pub use buffer::PendingBuffer;
pub use cancellation::{CancellationRegistry, TokenLease};
pub use debounce::DebounceCoordinator;
pub use types::{ABORT_TOPIC, AbortNotice, COMBINE_TASK, CombineTask, PendingMessage};
