//! Tool abstraction and per-request composition.

pub mod builtin;
pub mod registry;
pub mod tool;

pub use registry::{StaticToolFactory, ToolFactory, ToolScope, compose_tools};
pub use tool::*;
