//! Clients send commands to handlers and await correlated replies.
//!
//! One client owns one exclusive reply queue, created lazily on the first
//! call. Any number of outstanding calls share it; correlation is
//! strictly by id, and a reply for an id that already resolved or timed
//! out is discarded without complaint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, OnceCell, oneshot};
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::broker::{BrokerAdapter, ConsumerHandle, DeliveryHandler};
use crate::codec;
use crate::envelope::Envelope;
use crate::error::{CommandError, RpcError};
use crate::routing::RoutingKey;

/// How one reply resolves a pending call. Timeouts are local to the
/// waiter and never enter the table.
enum ReplyOutcome {
    Success(Bytes),
    Fault(CommandError),
}

type PendingTable = Arc<Mutex<HashMap<String, oneshot::Sender<ReplyOutcome>>>>;

struct ReplyQueue {
    name: String,
    consumer: ConsumerHandle,
}

impl Drop for ReplyQueue {
    fn drop(&mut self) {
        self.consumer.cancel();
    }
}

struct ClientInner {
    adapter: Arc<dyn BrokerAdapter>,
    default_timeout: Duration,
    reply_queue: OnceCell<ReplyQueue>,
    pending: PendingTable,
}

/// Issues commands over the bus and awaits their replies.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("default_timeout", &self.inner.default_timeout)
            .field(
                "reply_queue",
                &self.inner.reply_queue.get().map(|queue| &queue.name),
            )
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    pub(crate) fn new(adapter: Arc<dyn BrokerAdapter>, default_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                adapter,
                default_timeout,
                reply_queue: OnceCell::new(),
                pending: Arc::new(Mutex::new(HashMap::new())),
            }),
        }
    }

    /// Calls `routing_key` with the configured default timeout.
    ///
    /// # Errors
    /// See [`RpcError`].
    pub async fn call<Req, Reply>(&self, routing_key: &str, request: &Req) -> Result<Reply, RpcError>
    where
        Req: Serialize + Sync,
        Reply: DeserializeOwned,
    {
        self.call_with_timeout(routing_key, request, self.inner.default_timeout)
            .await
    }

    /// Calls `routing_key`, waiting at most `wait` for the reply.
    ///
    /// Exactly one outcome reaches the caller: the decoded reply, the
    /// remote fault, or a timeout. The pending entry is removed on every
    /// outcome, so a reply that arrives after the timeout is discarded by
    /// the reply consumer.
    ///
    /// # Errors
    /// See [`RpcError`].
    pub async fn call_with_timeout<Req, Reply>(
        &self,
        routing_key: &str,
        request: &Req,
        wait: Duration,
    ) -> Result<Reply, RpcError>
    where
        Req: Serialize + Sync,
        Reply: DeserializeOwned,
    {
        let routing_key = RoutingKey::new(routing_key)?;
        let reply_queue = self.ensure_reply_consumer().await?;
        let body = codec::encode(request)?;

        let correlation_id = Uuid::new_v4().simple().to_string();
        let (sender, receiver) = oneshot::channel();
        self.inner
            .pending
            .lock()
            .await
            .insert(correlation_id.clone(), sender);

        let envelope = match Envelope::command_request(
            routing_key,
            body,
            correlation_id.clone(),
            reply_queue,
        ) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.inner.pending.lock().await.remove(&correlation_id);
                return Err(RpcError::Broker(e.into()));
            }
        };

        if let Err(e) = self.inner.adapter.publish(envelope).await {
            self.inner.pending.lock().await.remove(&correlation_id);
            return Err(e.into());
        }

        match timeout(wait, receiver).await {
            Ok(Ok(ReplyOutcome::Success(body))) => Ok(codec::decode(&body)?),
            Ok(Ok(ReplyOutcome::Fault(fault))) => Err(RpcError::Remote(fault)),
            Ok(Err(_closed)) => {
                // Sender dropped without resolving; treat as a synthetic
                // timeout for bookkeeping.
                self.inner.pending.lock().await.remove(&correlation_id);
                Err(RpcError::Timeout { elapsed: wait })
            }
            Err(_elapsed) => {
                self.inner.pending.lock().await.remove(&correlation_id);
                debug!(%correlation_id, "rpc call timed out");
                Err(RpcError::Timeout { elapsed: wait })
            }
        }
    }

    /// Number of calls currently awaiting a reply.
    pub async fn pending_calls(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    /// Stops the reply consumer. Outstanding calls resolve as timeouts.
    pub fn close(&self) {
        if let Some(queue) = self.inner.reply_queue.get() {
            queue.consumer.cancel();
        }
    }

    /// Declares the reply queue and starts its consumer exactly once;
    /// returns the queue name.
    async fn ensure_reply_consumer(&self) -> Result<String, RpcError> {
        let queue = self
            .inner
            .reply_queue
            .get_or_try_init(|| async {
                let name = self.inner.adapter.declare_reply_queue().await?;
                let consumer = self
                    .inner
                    .adapter
                    .consume(&name, reply_handler(Arc::clone(&self.inner.pending)))
                    .await?;
                debug!(reply_queue = %name, "reply consumer started");
                Ok::<_, RpcError>(ReplyQueue { name, consumer })
            })
            .await?;
        Ok(queue.name.clone())
    }
}

/// Resolves pending calls by correlation id; unknown ids are acked and
/// discarded.
fn reply_handler(pending: PendingTable) -> DeliveryHandler {
    Arc::new(move |envelope| {
        let pending = Arc::clone(&pending);
        Box::pin(async move {
            let Some(correlation_id) = envelope.correlation_id().map(str::to_string) else {
                warn!("reply without correlation id discarded");
                return Ok(());
            };

            let Some(slot) = pending.lock().await.remove(&correlation_id) else {
                debug!(%correlation_id, "late reply discarded");
                return Ok(());
            };

            let outcome = if envelope.success() == Some(false) {
                let fault = codec::decode::<CommandError>(envelope.body()).unwrap_or_else(|e| {
                    CommandError::new("MalformedReply", format!("error body did not decode: {e}"))
                });
                ReplyOutcome::Fault(fault)
            } else {
                ReplyOutcome::Success(envelope.body().clone())
            };

            // The waiter may have timed out and gone; that is fine.
            let _ = slot.send(outcome);
            Ok(())
        })
    })
}
