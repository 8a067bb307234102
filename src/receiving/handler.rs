//! # Message Handler Contract
//!
//! The pump hands every received message to a [`MessageHandler`] and settles
//! it from the result: success completes the message; failure or a panic
//! goes through [`MessageHandler::on_error`], which decides between
//! redelivery and completion.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::message::ReceivedMessage;

/// What the framework did with a failed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorHandleResult {
    /// The failure was dealt with (e.g. moved to an error queue); complete the message
    Handled,
    /// Release the message for redelivery
    RetryRequired,
}

/// Message and delivery metadata passed to the handler
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub message_id: String,
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
    /// Deliveries including this one
    pub delivery_count: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Physical entity the message was received from
    pub receive_address: String,
    pub receiver_id: String,
    /// Cancelled when the shutdown grace period runs out
    pub cancellation: CancellationToken,
}

impl MessageContext {
    pub fn new(message: &ReceivedMessage, receiver_id: &str, cancellation: CancellationToken) -> Self {
        Self {
            message_id: message.message_id.clone(),
            body: message.body.clone(),
            headers: message.headers.clone(),
            delivery_count: message.delivery_count,
            enqueued_at: message.enqueued_at,
            receive_address: message.entity_path.clone(),
            receiver_id: receiver_id.to_string(),
            cancellation,
        }
    }
}

#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, context: &MessageContext) -> anyhow::Result<()>;

    /// Decide what happens to a message whose handler failed
    async fn on_error(&self, _context: &MessageContext, _error: &anyhow::Error) -> ErrorHandleResult {
        ErrorHandleResult::RetryRequired
    }
}

/// Handler backed by an async closure
pub struct FnMessageHandler<F> {
    f: F,
}

/// Wrap an async closure as a [`MessageHandler`]
///
/// ```rust
/// use servicebus_transport::receiving::handler_fn;
///
/// let handler = handler_fn(|context| async move {
///     println!("received {}", context.message_id);
///     Ok(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<FnMessageHandler<F>>
where
    F: Fn(MessageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnMessageHandler { f })
}

#[async_trait]
impl<F, Fut> MessageHandler for FnMessageHandler<F>
where
    F: Fn(MessageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, context: &MessageContext) -> anyhow::Result<()> {
        (self.f)(context.clone()).await
    }
}
