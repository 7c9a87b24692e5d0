//! Feeds a transport's inbound stream into the debounce coordinator.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::coordinator::DebounceCoordinator;
use crate::error::ChannelError;
use crate::transport::Transport;

/// Start `transport` and enqueue everything it yields until the stream ends.
pub async fn spawn_ingest(
    transport: Arc<dyn Transport>,
    coordinator: Arc<DebounceCoordinator>,
) -> Result<JoinHandle<()>, ChannelError> {
    let mut stream = transport.start().await?;
    info!(transport = transport.name(), "Transport started");

    Ok(tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            if let Err(e) = coordinator
                .enqueue(
                    &msg.user_id,
                    &msg.chat_id,
                    &msg.text,
                    &msg.message_id,
                    transport.label(),
                )
                .await
            {
                warn!(
                    transport = transport.name(),
                    user_id = %msg.user_id,
                    error = %e,
                    "Failed to enqueue inbound message"
                );
            }
        }
        info!(transport = transport.name(), "Transport stream ended");
    }))
}
