//! In-process broker adapter with topic-exchange semantics.
//!
//! One `MemoryBroker` is one topic exchange. Publishing matches the
//! routing key against every queue's bindings and enqueues at most one
//! copy per queue, however many of its bindings match; a routing key
//! equal to a queue name delivers directly, which is how command replies
//! reach their reply queue. Deliveries within a queue are serialized by
//! its single consumer task; distinct queues proceed independently.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rondo_bus::broker::{BrokerAdapter, ConsumerHandle, DeliveryHandler, validate_queue_name};
use rondo_bus::envelope::Envelope;
use rondo_bus::error::{BrokerError, InvalidArgument};
use rondo_bus::routing::Pattern;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};
use uuid::Uuid;

struct QueueState {
    bindings: Vec<Pattern>,
    sender: mpsc::UnboundedSender<Envelope>,
    /// Present while no consumer holds it.
    receiver: Option<mpsc::UnboundedReceiver<Envelope>>,
    exclusive: bool,
}

impl QueueState {
    fn new(exclusive: bool) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            bindings: Vec::new(),
            sender,
            receiver: Some(receiver),
            exclusive,
        }
    }
}

struct ExchangeState {
    connected: bool,
    queues: HashMap<String, QueueState>,
}

/// An in-process topic exchange behind the [`BrokerAdapter`] contract.
#[derive(Clone)]
pub struct MemoryBroker {
    exchange: String,
    state: Arc<Mutex<ExchangeState>>,
    tasks: TaskTracker,
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("exchange", &self.exchange)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new("bus")
    }
}

impl MemoryBroker {
    /// Creates an exchange named `exchange`.
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            state: Arc::new(Mutex::new(ExchangeState {
                connected: false,
                queues: HashMap::new(),
            })),
            tasks: TaskTracker::new(),
        }
    }

    /// Whether `queue` currently exists on the exchange.
    pub async fn has_queue(&self, queue: &str) -> bool {
        self.state.lock().await.queues.contains_key(queue)
    }

    /// Drops the connection; subsequent operations fail with
    /// `BrokerError::Unavailable` until `connect` is called again.
    pub async fn disconnect(&self) {
        self.state.lock().await.connected = false;
    }

    async fn ensure_connected(&self) -> Result<(), BrokerError> {
        if self.state.lock().await.connected {
            Ok(())
        } else {
            Err(BrokerError::Unavailable {
                reason: format!("exchange {:?} is not connected", self.exchange),
            })
        }
    }
}

#[async_trait]
impl BrokerAdapter for MemoryBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        self.state.lock().await.connected = true;
        Ok(())
    }

    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        validate_queue_name(queue, "queue")?;
        self.ensure_connected().await?;
        self.state
            .lock()
            .await
            .queues
            .entry(queue.to_string())
            .or_insert_with(|| QueueState::new(false));
        Ok(())
    }

    async fn declare_reply_queue(&self) -> Result<String, BrokerError> {
        self.ensure_connected().await?;
        let name = format!("reply-{}", Uuid::new_v4().simple());
        self.state
            .lock()
            .await
            .queues
            .insert(name.clone(), QueueState::new(true));
        Ok(name)
    }

    async fn bind(&self, queue: &str, pattern: &Pattern) -> Result<(), BrokerError> {
        validate_queue_name(queue, "queue")?;
        self.ensure_connected().await?;
        let mut state = self.state.lock().await;
        let Some(queue_state) = state.queues.get_mut(queue) else {
            return Err(BrokerError::UnknownQueue {
                queue: queue.to_string(),
            });
        };
        queue_state.bindings.push(pattern.clone());
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        handler: DeliveryHandler,
    ) -> Result<ConsumerHandle, BrokerError> {
        validate_queue_name(queue, "queue")?;
        self.ensure_connected().await?;

        let (mut receiver, exclusive) = {
            let mut state = self.state.lock().await;
            let Some(queue_state) = state.queues.get_mut(queue) else {
                return Err(BrokerError::UnknownQueue {
                    queue: queue.to_string(),
                });
            };
            let Some(receiver) = queue_state.receiver.take() else {
                return Err(BrokerError::ConsumerActive {
                    queue: queue.to_string(),
                });
            };
            (receiver, queue_state.exclusive)
        };

        let token = CancellationToken::new();
        let handle = ConsumerHandle::new(token.clone());
        let state = Arc::clone(&self.state);
        let queue = queue.to_string();

        self.tasks.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        let mut state = state.lock().await;
                        if exclusive {
                            // Exclusive queues die with their consumer.
                            state.queues.remove(&queue);
                        } else if let Some(queue_state) = state.queues.get_mut(&queue) {
                            queue_state.receiver = Some(receiver);
                        }
                        debug!(%queue, "consumer stopped");
                        break;
                    }
                    delivery = receiver.recv() => {
                        let Some(envelope) = delivery else { break };
                        if let Err(e) = (handler)(envelope).await {
                            // Nack without requeue: the failure is logged,
                            // the message is gone.
                            warn!(%queue, "delivery rejected, dropping without requeue: {e}");
                        }
                    }
                }
            }
        });

        Ok(handle)
    }

    async fn publish(&self, envelope: Envelope) -> Result<(), BrokerError> {
        if envelope.body().is_empty() {
            return Err(InvalidArgument::new("body").into());
        }
        self.ensure_connected().await?;

        let state = self.state.lock().await;
        let key = envelope.routing_key();
        let mut deliveries = 0_usize;
        for (name, queue_state) in &state.queues {
            let direct = name == key.as_str();
            if direct || queue_state.bindings.iter().any(|p| p.matches(key)) {
                if queue_state.sender.send(envelope.clone()).is_err() {
                    warn!(queue = %name, "queue channel closed, dropping delivery");
                } else {
                    deliveries += 1;
                }
            }
        }

        if deliveries == 0 {
            debug!(
                exchange = %self.exchange,
                routing_key = %key,
                "unroutable message dropped"
            );
        }
        Ok(())
    }
}
