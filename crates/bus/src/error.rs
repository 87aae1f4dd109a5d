//! Error types for the bus.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A public operation was called with an unusable argument. Names the
/// offending parameter.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid argument: {parameter}")]
pub struct InvalidArgument {
    /// The parameter that was rejected.
    pub parameter: &'static str,
}

impl InvalidArgument {
    /// Creates an error naming `parameter`.
    #[must_use]
    pub const fn new(parameter: &'static str) -> Self {
        Self { parameter }
    }
}

/// A routing key or binding pattern failed to parse.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    /// Empty routing keys and patterns are rejected.
    #[error("routing key must not be empty")]
    Empty,

    /// A token contained characters outside `[A-Za-z0-9_-]` (or a wildcard
    /// where none is allowed).
    #[error("invalid token {token:?} in {input:?}")]
    InvalidToken {
        /// The offending token.
        token: String,
        /// The full input string.
        input: String,
    },
}

/// Payload serialization failed.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A value could not be serialized to JSON.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// An inbound body could not be deserialized.
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Handler registration was rejected; raised before any broker call.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A queue may hold event handlers or command handlers, never both.
    #[error("queue {queue:?} mixes event and command handlers")]
    MixedQueue {
        /// The offending queue.
        queue: String,
    },

    /// Command routing keys must be unique within a queue.
    #[error("duplicate command key {routing_key:?} on queue {queue:?}")]
    DuplicateCommandKey {
        /// The offending queue.
        queue: String,
        /// The routing key registered twice.
        routing_key: String,
    },

    /// Queue names must be non-empty and non-whitespace.
    #[error(transparent)]
    InvalidArgument(#[from] InvalidArgument),

    /// The route failed to parse.
    #[error(transparent)]
    Routing(#[from] RoutingError),
}

/// A broker adapter operation failed.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The transport is down or unreachable.
    #[error("broker unavailable: {reason}")]
    Unavailable {
        /// What the transport reported.
        reason: String,
    },

    /// An argument was rejected by the adapter.
    #[error(transparent)]
    InvalidArgument(#[from] InvalidArgument),

    /// An operation referenced a queue that was never declared.
    #[error("queue {queue:?} has not been declared")]
    UnknownQueue {
        /// The missing queue.
        queue: String,
    },

    /// A second consumer was requested for a queue that already has one.
    #[error("consumer already active for queue {queue:?}")]
    ConsumerActive {
        /// The queue already being consumed.
        queue: String,
    },

    /// A reply body failed to serialize before publication.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Startup configuration is missing or invalid. Names the field.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid configuration: {field}")]
pub struct ConfigError {
    /// The configuration field that was rejected.
    pub field: &'static str,
}

/// The structured failure a command handler sends back to its caller.
///
/// Only `kind` and `message` cross the wire; anything richer stays in the
/// handler's process and its logs.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct CommandError {
    /// Machine-readable failure class, e.g. `"NotFound"`.
    pub kind: String,
    /// Human-readable detail.
    pub message: String,
}

impl CommandError {
    /// Creates a failure of class `kind` with detail `message`.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// An outbound command call failed.
#[derive(Debug, Error)]
pub enum RpcError {
    /// No reply arrived within the timeout window.
    #[error("rpc timed out after {elapsed:?}")]
    Timeout {
        /// The timeout that elapsed.
        elapsed: Duration,
    },

    /// The remote handler replied with `success = false`.
    #[error("remote command failed: {0}")]
    Remote(CommandError),

    /// The request or reply payload failed to serialize.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The broker rejected the publish or the reply queue setup.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// The routing key failed to parse.
    #[error(transparent)]
    Routing(#[from] RoutingError),
}

/// Bus startup or shutdown failed.
#[derive(Debug, Error)]
pub enum BusError {
    /// Configuration was rejected before any broker call.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A broker operation during startup failed.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// `start` was called on a bus that is already running.
    #[error("bus is already running")]
    AlreadyRunning,
}
