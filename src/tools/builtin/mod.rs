//! Built-in tools.

pub mod time;

pub use time::CurrentTimeTool;
