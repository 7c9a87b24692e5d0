//! Message transports: where inbound messages come from and replies go to.

pub mod cli;
pub mod http;
pub mod ingest;

pub use cli::CliTransport;
pub use http::{IngestRequest, ingest_routes};
pub use ingest::spawn_ingest;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// A raw message received by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub user_id: String,
    /// Where replies go, in the transport's own addressing.
    pub chat_id: String,
    pub text: String,
    /// Transport-native id, used to drop duplicate deliveries.
    pub message_id: String,
}

impl IncomingMessage {
    pub fn new(
        user_id: impl Into<String>,
        chat_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            chat_id: chat_id.into(),
            text: text.into(),
            message_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

pub type MessageStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Stable identifier, e.g. `cli`.
    fn name(&self) -> &str;

    /// Label shown in merged batches, e.g. `CLI`.
    fn label(&self) -> &str;

    async fn start(&self) -> Result<MessageStream, ChannelError>;

    async fn send(&self, chat_id: &str, text: &str) -> Result<(), ChannelError>;

    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
