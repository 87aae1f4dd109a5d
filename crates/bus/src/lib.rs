//! Topic message bus layering events (publish/subscribe) and commands
//! (request/reply) over a topic-exchange broker.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Contract between the bus and a topic-exchange broker.
pub mod broker;

/// Bus lifecycle: handler registration, startup, shutdown.
pub mod bus;

/// Clients send commands to handlers and await correlated replies.
pub mod client;

/// JSON payload codec.
pub mod codec;

/// Broker connection and bus configuration.
pub mod config;

/// Wire envelope carried through the exchange.
pub mod envelope;

/// Error types for the bus.
pub mod error;

/// Handler traits and the per-queue registry.
pub mod registry;

/// Routing keys and binding patterns.
pub mod routing;

mod command_dispatcher;
mod event_dispatcher;
