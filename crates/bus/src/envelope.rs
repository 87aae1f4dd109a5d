//! Wire envelope carried through the exchange.
//!
//! The envelope mirrors the broker message properties one to one:
//! routing key, body, `type`, `correlation-id`, `reply-to` and the
//! `success` header present on command replies.

use bytes::Bytes;

use crate::error::InvalidArgument;
use crate::routing::RoutingKey;

/// Content type of every payload body.
pub const CONTENT_TYPE: &str = "application/json";

/// Maximum length of a correlation id in octets.
pub const MAX_CORRELATION_ID_LEN: usize = 255;

/// Discriminates the three message shapes on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// One-way message; zero or more handlers may react.
    Event,
    /// Request half of a command; carries correlation id and reply-to.
    CommandRequest,
    /// Reply half of a command; carries correlation id and a success flag.
    CommandReply,
}

impl MessageKind {
    /// Wire value of the `type` property.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::CommandRequest => "command-request",
            Self::CommandReply => "command-reply",
        }
    }
}

/// A message travelling through the topic exchange.
#[derive(Clone, Debug)]
pub struct Envelope {
    routing_key: RoutingKey,
    body: Bytes,
    kind: MessageKind,
    correlation_id: Option<String>,
    reply_to: Option<String>,
    success: Option<bool>,
}

impl Envelope {
    /// Builds an event envelope.
    #[must_use]
    pub const fn event(routing_key: RoutingKey, body: Bytes) -> Self {
        Self {
            routing_key,
            body,
            kind: MessageKind::Event,
            correlation_id: None,
            reply_to: None,
            success: None,
        }
    }

    /// Builds a command request.
    ///
    /// # Errors
    /// `InvalidArgument` if the correlation id is empty or over
    /// [`MAX_CORRELATION_ID_LEN`] octets, or the reply queue name is blank.
    pub fn command_request(
        routing_key: RoutingKey,
        body: Bytes,
        correlation_id: impl Into<String>,
        reply_to: impl Into<String>,
    ) -> Result<Self, InvalidArgument> {
        let correlation_id = validated_correlation_id(correlation_id.into())?;
        let reply_to = reply_to.into();
        if reply_to.trim().is_empty() {
            return Err(InvalidArgument::new("reply_to"));
        }
        Ok(Self {
            routing_key,
            body,
            kind: MessageKind::CommandRequest,
            correlation_id: Some(correlation_id),
            reply_to: Some(reply_to),
            success: None,
        })
    }

    /// Builds a command reply routed back to the requester's reply queue.
    ///
    /// # Errors
    /// `InvalidArgument` if the correlation id is empty or over
    /// [`MAX_CORRELATION_ID_LEN`] octets.
    pub fn command_reply(
        reply_to: RoutingKey,
        correlation_id: impl Into<String>,
        body: Bytes,
        success: bool,
    ) -> Result<Self, InvalidArgument> {
        let correlation_id = validated_correlation_id(correlation_id.into())?;
        Ok(Self {
            routing_key: reply_to,
            body,
            kind: MessageKind::CommandReply,
            correlation_id: Some(correlation_id),
            reply_to: None,
            success: Some(success),
        })
    }

    /// The routing key the message was published with.
    #[must_use]
    pub const fn routing_key(&self) -> &RoutingKey {
        &self.routing_key
    }

    /// The payload body.
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// The message-type discriminator.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.kind
    }

    /// The correlation id, present on command requests and replies.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// The reply queue name, present on command requests.
    #[must_use]
    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// The success flag, present only on command replies.
    #[must_use]
    pub const fn success(&self) -> Option<bool> {
        self.success
    }
}

fn validated_correlation_id(correlation_id: String) -> Result<String, InvalidArgument> {
    if correlation_id.is_empty() || correlation_id.len() > MAX_CORRELATION_ID_LEN {
        return Err(InvalidArgument::new("correlation_id"));
    }
    Ok(correlation_id)
}
