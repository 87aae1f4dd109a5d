//! Handler traits and the per-queue registry.
//!
//! Handlers are registered against a queue with a route; the parameter
//! type is captured at registration and erased into an invoker that
//! decodes the body itself. Within one queue all handlers are events or
//! all are commands, and command routing keys are unique; both invariants
//! are enforced at registration, before any broker call.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::broker::validate_queue_name;
use crate::codec;
use crate::error::{CodecError, CommandError, RegistryError};
use crate::routing::{Pattern, RoutingKey};

/// Reacts to events delivered on one queue binding.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Decoded parameter type for this handler.
    type Event: DeserializeOwned + Send + 'static;

    /// Failure surfaced when handling goes wrong; logged, never fatal to
    /// the queue.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Handles one decoded event.
    async fn handle(&self, event: Self::Event) -> Result<(), Self::Error>;
}

/// Answers commands delivered on one queue routing key.
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    /// Decoded request type for this handler.
    type Request: DeserializeOwned + Send + 'static;

    /// Reply value serialized back to the caller. Unit replies serialize
    /// to the literal `null`.
    type Reply: Serialize + Send + 'static;

    /// Handles one decoded request.
    async fn handle(&self, request: Self::Request) -> Result<Self::Reply, CommandError>;
}

/// Why an erased event invocation failed. Logged by the dispatcher.
#[derive(Debug)]
pub(crate) enum EventFailure {
    /// The body did not decode to the handler's parameter type.
    Decode(CodecError),
    /// The handler itself failed.
    Handler(Box<dyn std::error::Error + Send + Sync>),
}

impl std::fmt::Display for EventFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "payload decode failed: {e}"),
            Self::Handler(e) => write!(f, "handler failed: {e}"),
        }
    }
}

/// Why an erased command invocation produced no success body.
#[derive(Debug)]
pub(crate) enum CommandFailure {
    /// The body did not decode to the handler's request type.
    BadPayload(CodecError),
    /// The handler returned its structured failure.
    Fault(CommandError),
    /// The handler's reply value failed to serialize.
    EncodeReply(CodecError),
}

pub(crate) type EventInvoker =
    Arc<dyn Fn(Bytes) -> BoxFuture<'static, Result<(), EventFailure>> + Send + Sync>;

pub(crate) type CommandInvoker =
    Arc<dyn Fn(Bytes) -> BoxFuture<'static, Result<Bytes, CommandFailure>> + Send + Sync>;

/// One registered event handler: a pattern plus its erased invoker.
pub(crate) struct EventBinding {
    pub(crate) pattern: Pattern,
    pub(crate) invoke: EventInvoker,
}

/// One registered command handler: a literal key plus its erased invoker.
pub(crate) struct CommandBinding {
    pub(crate) routing_key: RoutingKey,
    pub(crate) invoke: CommandInvoker,
}

/// The handlers of one queue; homogeneous by construction.
pub(crate) enum QueueHandlers {
    Events(Vec<EventBinding>),
    Commands(Vec<CommandBinding>),
}

/// Maps queue names to their registered handlers. Immutable once the bus
/// starts.
#[derive(Default)]
pub struct HandlerRegistry {
    queues: HashMap<String, QueueHandlers>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("queues", &self.queues.keys())
            .finish()
    }
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an event handler for `pattern` on `queue`.
    ///
    /// # Errors
    /// `RegistryError` for a blank queue name, an unparsable pattern, or a
    /// queue that already holds command handlers.
    pub fn register_event<H>(
        &mut self,
        queue: &str,
        pattern: &str,
        handler: H,
    ) -> Result<(), RegistryError>
    where
        H: EventHandler,
    {
        validate_queue_name(queue, "queue")?;
        let pattern = Pattern::new(pattern)?;

        let handler = Arc::new(handler);
        let invoke: EventInvoker = Arc::new(move |body: Bytes| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let event = codec::decode::<H::Event>(&body).map_err(EventFailure::Decode)?;
                handler
                    .handle(event)
                    .await
                    .map_err(|e| EventFailure::Handler(Box::new(e)))
            })
        });

        let binding = EventBinding { pattern, invoke };
        match self
            .queues
            .entry(queue.to_string())
            .or_insert_with(|| QueueHandlers::Events(Vec::new()))
        {
            QueueHandlers::Events(bindings) => {
                bindings.push(binding);
                Ok(())
            }
            QueueHandlers::Commands(_) => Err(RegistryError::MixedQueue {
                queue: queue.to_string(),
            }),
        }
    }

    /// Registers a command handler for the literal `routing_key` on
    /// `queue`.
    ///
    /// # Errors
    /// `RegistryError` for a blank queue name, an unparsable or duplicate
    /// key, or a queue that already holds event handlers.
    pub fn register_command<H>(
        &mut self,
        queue: &str,
        routing_key: &str,
        handler: H,
    ) -> Result<(), RegistryError>
    where
        H: CommandHandler,
    {
        validate_queue_name(queue, "queue")?;
        let routing_key = RoutingKey::new(routing_key)?;

        let handler = Arc::new(handler);
        let invoke: CommandInvoker = Arc::new(move |body: Bytes| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let request =
                    codec::decode::<H::Request>(&body).map_err(CommandFailure::BadPayload)?;
                let reply = handler
                    .handle(request)
                    .await
                    .map_err(CommandFailure::Fault)?;
                codec::encode(&reply).map_err(CommandFailure::EncodeReply)
            })
        });

        let binding = CommandBinding {
            routing_key,
            invoke,
        };
        match self
            .queues
            .entry(queue.to_string())
            .or_insert_with(|| QueueHandlers::Commands(Vec::new()))
        {
            QueueHandlers::Commands(bindings) => {
                if bindings
                    .iter()
                    .any(|existing| existing.routing_key == binding.routing_key)
                {
                    return Err(RegistryError::DuplicateCommandKey {
                        queue: queue.to_string(),
                        routing_key: binding.routing_key.to_string(),
                    });
                }
                bindings.push(binding);
                Ok(())
            }
            QueueHandlers::Events(_) => Err(RegistryError::MixedQueue {
                queue: queue.to_string(),
            }),
        }
    }

    /// All queues with at least one handler.
    pub fn queue_names(&self) -> impl Iterator<Item = &str> {
        self.queues.keys().map(String::as_str)
    }

    /// The deduplicated union of binding patterns for `queue`. Command
    /// keys bind as literal patterns.
    #[must_use]
    pub fn binding_patterns(&self, queue: &str) -> Vec<Pattern> {
        let mut patterns: Vec<Pattern> = Vec::new();
        match self.queues.get(queue) {
            Some(QueueHandlers::Events(bindings)) => {
                for binding in bindings {
                    if !patterns.contains(&binding.pattern) {
                        patterns.push(binding.pattern.clone());
                    }
                }
            }
            Some(QueueHandlers::Commands(bindings)) => {
                for binding in bindings {
                    // Command keys are valid literal patterns by grammar.
                    if let Ok(pattern) = Pattern::new(binding.routing_key.as_str()) {
                        patterns.push(pattern);
                    }
                }
            }
            None => {}
        }
        patterns
    }

    pub(crate) fn into_queues(self) -> HashMap<String, QueueHandlers> {
        self.queues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::convert::Infallible;

    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Noop;

    struct NoopEvent;

    #[async_trait]
    impl EventHandler for NoopEvent {
        type Event = Noop;
        type Error = Infallible;

        async fn handle(&self, _event: Noop) -> Result<(), Infallible> {
            Ok(())
        }
    }

    struct NoopCommand;

    #[async_trait]
    impl CommandHandler for NoopCommand {
        type Request = Noop;
        type Reply = ();

        async fn handle(&self, _request: Noop) -> Result<(), CommandError> {
            Ok(())
        }
    }

    #[test]
    fn mixed_queue_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_event("Mixed", "order.*", NoopEvent)
            .unwrap();
        let err = registry
            .register_command("Mixed", "order.fetch", NoopCommand)
            .unwrap_err();
        assert!(matches!(err, RegistryError::MixedQueue { queue } if queue == "Mixed"));

        let mut registry = HandlerRegistry::new();
        registry
            .register_command("Mixed", "order.fetch", NoopCommand)
            .unwrap();
        let err = registry
            .register_event("Mixed", "order.*", NoopEvent)
            .unwrap_err();
        assert!(matches!(err, RegistryError::MixedQueue { .. }));
    }

    #[test]
    fn duplicate_command_key_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_command("Pricing", "price.quote", NoopCommand)
            .unwrap();
        let err = registry
            .register_command("Pricing", "price.quote", NoopCommand)
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::DuplicateCommandKey { routing_key, .. } if routing_key == "price.quote"
        ));
    }

    #[test]
    fn repeated_event_patterns_are_allowed_but_bind_once() {
        let mut registry = HandlerRegistry::new();
        registry
            .register_event("Orders", "order.*", NoopEvent)
            .unwrap();
        registry
            .register_event("Orders", "order.*", NoopEvent)
            .unwrap();
        registry
            .register_event("Orders", "order.placed", NoopEvent)
            .unwrap();
        let patterns = registry.binding_patterns("Orders");
        assert_eq!(patterns.len(), 2);
    }

    #[test]
    fn blank_queue_name_is_rejected() {
        let mut registry = HandlerRegistry::new();
        let err = registry
            .register_event("  ", "order.*", NoopEvent)
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArgument(_)));
    }

    #[test]
    fn wildcard_command_key_is_rejected() {
        let mut registry = HandlerRegistry::new();
        let err = registry
            .register_command("Pricing", "price.*", NoopCommand)
            .unwrap_err();
        assert!(matches!(err, RegistryError::Routing(_)));
    }
}
