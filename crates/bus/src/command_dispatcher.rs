//! Routes inbound command requests to their single handler and publishes
//! the correlated reply.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::broker::{BrokerAdapter, DeliveryHandler};
use crate::codec;
use crate::envelope::{Envelope, MessageKind};
use crate::error::{BrokerError, CommandError};
use crate::registry::{CommandBinding, CommandFailure};
use crate::routing::RoutingKey;

/// Request/reply dispatcher for one command queue.
pub(crate) struct CommandDispatcher {
    queue: String,
    adapter: Arc<dyn BrokerAdapter>,
    bindings: Arc<Vec<CommandBinding>>,
}

impl CommandDispatcher {
    pub(crate) fn new(
        queue: String,
        adapter: Arc<dyn BrokerAdapter>,
        bindings: Arc<Vec<CommandBinding>>,
    ) -> Self {
        Self {
            queue,
            adapter,
            bindings,
        }
    }

    /// Wraps the dispatcher into the adapter's delivery callback.
    pub(crate) fn into_delivery_handler(self) -> DeliveryHandler {
        let dispatcher = Arc::new(self);
        Arc::new(move |envelope| {
            let dispatcher = Arc::clone(&dispatcher);
            Box::pin(async move { dispatcher.dispatch(envelope).await })
        })
    }

    /// Commands execute at most once: the request is acked as soon as the
    /// reply is handed to the adapter, success or not. Only a transport
    /// failure while publishing the reply rejects the request.
    async fn dispatch(&self, envelope: Envelope) -> Result<(), BrokerError> {
        let Some((correlation_id, reply_to)) = validated_request(&envelope) else {
            // A reply without both properties is undeliverable; drop.
            warn!(
                queue = %self.queue,
                routing_key = %envelope.routing_key(),
                kind = envelope.kind().as_str(),
                "dropping malformed command request"
            );
            return Ok(());
        };

        if envelope.kind() != MessageKind::CommandRequest {
            warn!(
                queue = %self.queue,
                kind = envelope.kind().as_str(),
                "non-request delivery on command queue"
            );
            return self
                .reply_error(
                    &correlation_id,
                    &reply_to,
                    &CommandError::new(
                        "MalformedCommand",
                        format!("expected a command-request, got {}", envelope.kind().as_str()),
                    ),
                )
                .await;
        }

        let Some(binding) = self
            .bindings
            .iter()
            .find(|binding| binding.routing_key == *envelope.routing_key())
        else {
            debug!(
                queue = %self.queue,
                routing_key = %envelope.routing_key(),
                "no handler for command"
            );
            return self
                .reply_error(
                    &correlation_id,
                    &reply_to,
                    &CommandError::new(
                        "UnknownCommand",
                        format!("no handler for {}", envelope.routing_key()),
                    ),
                )
                .await;
        };

        match (binding.invoke)(envelope.body().clone()).await {
            Ok(body) => self.reply(&correlation_id, &reply_to, body, true).await,
            Err(CommandFailure::BadPayload(e)) => {
                warn!(
                    queue = %self.queue,
                    routing_key = %envelope.routing_key(),
                    "command payload did not decode: {e}"
                );
                self.reply_error(
                    &correlation_id,
                    &reply_to,
                    &CommandError::new("BadPayload", e.to_string()),
                )
                .await
            }
            Err(CommandFailure::Fault(fault)) => {
                // The structured fault crosses the wire; the full detail
                // stays in this log line.
                warn!(
                    queue = %self.queue,
                    routing_key = %envelope.routing_key(),
                    kind = %fault.kind,
                    "command handler failed: {fault}"
                );
                self.reply_error(&correlation_id, &reply_to, &fault).await
            }
            Err(CommandFailure::EncodeReply(e)) => {
                warn!(
                    queue = %self.queue,
                    routing_key = %envelope.routing_key(),
                    "command reply failed to serialize: {e}"
                );
                self.reply_error(
                    &correlation_id,
                    &reply_to,
                    &CommandError::new("InternalError", "reply serialization failed"),
                )
                .await
            }
        }
    }

    async fn reply_error(
        &self,
        correlation_id: &str,
        reply_to: &str,
        fault: &CommandError,
    ) -> Result<(), BrokerError> {
        let body = codec::encode(fault)?;
        self.reply(correlation_id, reply_to, body, false).await
    }

    async fn reply(
        &self,
        correlation_id: &str,
        reply_to: &str,
        body: bytes::Bytes,
        success: bool,
    ) -> Result<(), BrokerError> {
        let Ok(reply_key) = RoutingKey::new(reply_to) else {
            warn!(
                queue = %self.queue,
                reply_to,
                "reply-to is not a routable queue name; dropping reply"
            );
            return Ok(());
        };
        let reply = Envelope::command_reply(reply_key, correlation_id, body, success)?;
        self.adapter.publish(reply).await
    }
}

/// Both properties a reply needs, or `None` when the request cannot be
/// answered at all.
fn validated_request(envelope: &Envelope) -> Option<(String, String)> {
    let correlation_id = envelope.correlation_id().filter(|id| !id.is_empty())?;
    let reply_to = envelope.reply_to().filter(|queue| !queue.trim().is_empty())?;
    Some((correlation_id.to_string(), reply_to.to_string()))
}
