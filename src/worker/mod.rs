//! Delayed task execution.
//!
//! - `task`: `ScheduledTask`, `TaskContext`, and the handler/queue traits
//! - `scheduler`: `TimerQueue`, the in-process deduplicating delayed queue

pub mod scheduler;
pub mod task;

pub use scheduler::TimerQueue;
pub use task::{DelayedTaskQueue, ScheduledTask, TaskContext, TaskHandler};
