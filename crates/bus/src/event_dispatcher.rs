//! Delivers inbound events to every matching handler on a queue.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::broker::DeliveryHandler;
use crate::envelope::Envelope;
use crate::error::BrokerError;
use crate::registry::EventBinding;

/// Fan-out dispatcher for one event queue.
pub(crate) struct EventDispatcher {
    queue: String,
    bindings: Arc<Vec<EventBinding>>,
}

impl EventDispatcher {
    pub(crate) fn new(queue: String, bindings: Arc<Vec<EventBinding>>) -> Self {
        Self { queue, bindings }
    }

    /// Wraps the dispatcher into the adapter's delivery callback.
    pub(crate) fn into_delivery_handler(self) -> DeliveryHandler {
        let dispatcher = Arc::new(self);
        Arc::new(move |envelope| {
            let dispatcher = Arc::clone(&dispatcher);
            Box::pin(async move { dispatcher.dispatch(envelope).await })
        })
    }

    /// Invokes every matching handler concurrently and joins completion.
    /// Always acks: handler and decode failures are logged, and an
    /// unmatched key is a benign superset routing from the broker.
    async fn dispatch(&self, envelope: Envelope) -> Result<(), BrokerError> {
        let matched: Vec<&EventBinding> = self
            .bindings
            .iter()
            .filter(|binding| binding.pattern.matches(envelope.routing_key()))
            .collect();

        if matched.is_empty() {
            debug!(
                queue = %self.queue,
                routing_key = %envelope.routing_key(),
                "no handler matches delivery; acking"
            );
            return Ok(());
        }

        let invocations = matched
            .iter()
            .map(|binding| (binding.invoke)(envelope.body().clone()));
        let results = join_all(invocations).await;

        for (binding, result) in matched.iter().zip(results) {
            if let Err(failure) = result {
                warn!(
                    queue = %self.queue,
                    pattern = %binding.pattern,
                    routing_key = %envelope.routing_key(),
                    "event handler failed: {failure}"
                );
            }
        }

        Ok(())
    }
}
