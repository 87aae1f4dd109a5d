//! Bus lifecycle: handler registration, startup, shutdown.
//!
//! `BusBuilder` collects handlers into the registry; `build` freezes them.
//! `Bus::start` connects, declares each registered queue, binds the
//! deduplicated union of its patterns and starts one consumer per queue.
//! Shutdown cancels every consumer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::broker::{BrokerAdapter, ConsumerHandle};
use crate::client::RpcClient;
use crate::command_dispatcher::CommandDispatcher;
use crate::config::BusConfig;
use crate::error::{BusError, RegistryError};
use crate::event_dispatcher::EventDispatcher;
use crate::registry::{
    CommandBinding, CommandHandler, EventBinding, EventHandler, HandlerRegistry, QueueHandlers,
};
use crate::routing::Pattern;

enum QueueDispatch {
    Events(Arc<Vec<EventBinding>>),
    Commands(Arc<Vec<CommandBinding>>),
}

struct QueueEntry {
    queue: String,
    patterns: Vec<Pattern>,
    dispatch: QueueDispatch,
}

/// Collects handler registrations before the bus starts.
pub struct BusBuilder {
    config: BusConfig,
    adapter: Arc<dyn BrokerAdapter>,
    registry: HandlerRegistry,
}

impl std::fmt::Debug for BusBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusBuilder")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl BusBuilder {
    /// Starts a builder over `adapter` with `config`.
    pub fn new(config: BusConfig, adapter: Arc<dyn BrokerAdapter>) -> Self {
        Self {
            config,
            adapter,
            registry: HandlerRegistry::new(),
        }
    }

    /// Registers an event handler for `pattern` on `queue`.
    ///
    /// # Errors
    /// `RegistryError` as documented on
    /// [`HandlerRegistry::register_event`].
    pub fn register_event<H>(
        mut self,
        queue: &str,
        pattern: &str,
        handler: H,
    ) -> Result<Self, RegistryError>
    where
        H: EventHandler,
    {
        self.registry.register_event(queue, pattern, handler)?;
        Ok(self)
    }

    /// Registers a command handler for `routing_key` on `queue`.
    ///
    /// # Errors
    /// `RegistryError` as documented on
    /// [`HandlerRegistry::register_command`].
    pub fn register_command<H>(
        mut self,
        queue: &str,
        routing_key: &str,
        handler: H,
    ) -> Result<Self, RegistryError>
    where
        H: CommandHandler,
    {
        self.registry.register_command(queue, routing_key, handler)?;
        Ok(self)
    }

    /// Freezes the registrations into a bus.
    #[must_use]
    pub fn build(self) -> Bus {
        let mut queues = Vec::new();
        for queue in self
            .registry
            .queue_names()
            .map(str::to_string)
            .collect::<Vec<_>>()
        {
            let patterns = self.registry.binding_patterns(&queue);
            queues.push((queue, patterns));
        }

        let mut handlers = self.registry.into_queues();
        let entries = queues
            .into_iter()
            .map(|(queue, patterns)| {
                let dispatch = match handlers.remove(&queue) {
                    Some(QueueHandlers::Events(bindings)) => {
                        QueueDispatch::Events(Arc::new(bindings))
                    }
                    Some(QueueHandlers::Commands(bindings)) => {
                        QueueDispatch::Commands(Arc::new(bindings))
                    }
                    None => unreachable!("queue names come from the registry"),
                };
                QueueEntry {
                    queue,
                    patterns,
                    dispatch,
                }
            })
            .collect();

        Bus {
            config: self.config,
            adapter: self.adapter,
            queues: entries,
            consumers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }
}

/// A running (or startable) message bus.
pub struct Bus {
    config: BusConfig,
    adapter: Arc<dyn BrokerAdapter>,
    queues: Vec<QueueEntry>,
    consumers: Mutex<Vec<ConsumerHandle>>,
    started: AtomicBool,
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("config", &self.config)
            .field("queues", &self.queues.len())
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl Bus {
    /// Validates configuration, connects, declares and binds every
    /// registered queue, and starts one consumer per queue.
    ///
    /// # Errors
    /// `BusError::Config` before any broker call for bad configuration;
    /// `BusError::Broker` if a declare, bind or consume fails;
    /// `BusError::AlreadyRunning` on a second start.
    pub async fn start(&self) -> Result<(), BusError> {
        self.config.validate()?;
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(BusError::AlreadyRunning);
        }

        self.adapter.connect().await?;

        for entry in &self.queues {
            self.adapter.declare_queue(&entry.queue).await?;
            for pattern in &entry.patterns {
                self.adapter.bind(&entry.queue, pattern).await?;
            }

            let handler = match &entry.dispatch {
                QueueDispatch::Events(bindings) => {
                    EventDispatcher::new(entry.queue.clone(), Arc::clone(bindings))
                        .into_delivery_handler()
                }
                QueueDispatch::Commands(bindings) => CommandDispatcher::new(
                    entry.queue.clone(),
                    Arc::clone(&self.adapter),
                    Arc::clone(bindings),
                )
                .into_delivery_handler(),
            };

            let consumer = self.adapter.consume(&entry.queue, handler).await?;
            self.consumers.lock().await.push(consumer);
            debug!(queue = %entry.queue, "consumer started");
        }

        info!(queues = self.queues.len(), "bus started");
        Ok(())
    }

    /// A client for outbound commands, sharing this bus's adapter and
    /// configured timeout.
    #[must_use]
    pub fn client(&self) -> RpcClient {
        RpcClient::new(Arc::clone(&self.adapter), self.config.rpc_timeout)
    }

    /// Cancels every consumer. Outstanding handler invocations finish on
    /// their own tasks.
    pub async fn shutdown(&self) {
        for consumer in self.consumers.lock().await.drain(..) {
            consumer.cancel();
        }
        info!("bus shut down");
    }
}
