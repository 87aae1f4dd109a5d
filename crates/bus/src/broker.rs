//! Contract between the bus and a topic-exchange broker.
//!
//! Implementations own the connection and channel; the bus only sees
//! queues, bindings, consumers and publishes. Acknowledgement policy is
//! fixed here: a delivery is acked when its handler returns `Ok` and
//! negatively acknowledged without requeue when it returns `Err`, so a
//! poison payload surfaces in logs instead of a redelivery storm.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::envelope::Envelope;
use crate::error::{BrokerError, InvalidArgument};
use crate::routing::Pattern;

/// Callback invoked for each delivery on a consumed queue.
///
/// Returning `Ok` acknowledges the message; returning `Err` rejects it
/// without requeue.
pub type DeliveryHandler =
    Arc<dyn Fn(Envelope) -> BoxFuture<'static, Result<(), BrokerError>> + Send + Sync>;

/// Handle to a running consumer. Cancelling it stops delivery and, for
/// exclusive queues, deletes the queue.
#[derive(Clone, Debug)]
pub struct ConsumerHandle {
    token: CancellationToken,
}

impl ConsumerHandle {
    /// Wraps the cancellation token driving a consumer loop.
    #[must_use]
    pub const fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Stops the consumer.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the consumer has been stopped.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Thin contract over a topic-exchange broker.
#[async_trait]
pub trait BrokerAdapter: Send + Sync + 'static {
    /// Establishes the connection. Idempotent within one lifecycle.
    ///
    /// # Errors
    /// `BrokerError::Unavailable` on transport failure.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Declares a durable queue, creating it if absent.
    ///
    /// # Errors
    /// `InvalidArgument` for blank names; `Unavailable` on transport
    /// failure. Failures here are fatal to startup.
    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError>;

    /// Declares a server-named exclusive, auto-delete reply queue and
    /// returns its name.
    ///
    /// # Errors
    /// `Unavailable` on transport failure.
    async fn declare_reply_queue(&self) -> Result<String, BrokerError>;

    /// Binds `queue` to the exchange with `pattern`. Binds accumulate.
    ///
    /// # Errors
    /// `InvalidArgument` for blank names; `UnknownQueue` if the queue was
    /// never declared.
    async fn bind(&self, queue: &str, pattern: &Pattern) -> Result<(), BrokerError>;

    /// Begins delivery on `queue`, invoking `handler` for each message.
    ///
    /// # Errors
    /// `UnknownQueue` for undeclared queues, `ConsumerActive` if the queue
    /// already has a consumer.
    async fn consume(
        &self,
        queue: &str,
        handler: DeliveryHandler,
    ) -> Result<ConsumerHandle, BrokerError>;

    /// Publishes an envelope to the exchange. Does not await a broker
    /// confirm.
    ///
    /// # Errors
    /// `InvalidArgument` for an empty body; `Unavailable` on transport
    /// failure.
    async fn publish(&self, envelope: Envelope) -> Result<(), BrokerError>;
}

/// Shared input check for queue-name parameters.
///
/// # Errors
/// `InvalidArgument` naming `parameter` when the name is empty or
/// whitespace.
pub fn validate_queue_name(name: &str, parameter: &'static str) -> Result<(), InvalidArgument> {
    if name.trim().is_empty() {
        return Err(InvalidArgument::new(parameter));
    }
    Ok(())
}
