//! Assist Relay: message coordination and channel pipeline for a personal assistant.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod store;
pub mod tools;
pub mod transport;
pub mod worker;
