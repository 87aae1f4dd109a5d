//! Integration tests for event fan-out over the in-process exchange.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rondo_bus::broker::BrokerAdapter;
use rondo_bus::bus::{Bus, BusBuilder};
use rondo_bus::codec;
use rondo_bus::config::BusConfig;
use rondo_bus::envelope::Envelope;
use rondo_bus::registry::EventHandler;
use rondo_bus::routing::{Pattern, RoutingKey};
use rondo_bus_memory::MemoryBroker;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::timeout;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
struct OrderPlaced {
    id: u64,
}

/// Records which named handler saw which order id.
struct Recording {
    name: &'static str,
    sender: mpsc::UnboundedSender<(&'static str, u64)>,
}

#[async_trait]
impl EventHandler for Recording {
    type Event = OrderPlaced;
    type Error = Infallible;

    async fn handle(&self, event: OrderPlaced) -> Result<(), Infallible> {
        self.sender.send((self.name, event.id)).unwrap();
        Ok(())
    }
}

/// Accepts any JSON body at all.
struct Lenient {
    sender: mpsc::UnboundedSender<serde_json::Value>,
}

#[async_trait]
impl EventHandler for Lenient {
    type Event = serde_json::Value;
    type Error = Infallible;

    async fn handle(&self, event: serde_json::Value) -> Result<(), Infallible> {
        self.sender.send(event).unwrap();
        Ok(())
    }
}

fn key(s: &str) -> RoutingKey {
    RoutingKey::new(s).unwrap()
}

async fn started_bus(broker: &MemoryBroker, builder: BusBuilder) -> Bus {
    let bus = builder.build();
    bus.start().await.unwrap();
    assert!(broker.has_queue("Orders").await);
    bus
}

#[tokio::test]
async fn matching_handlers_all_fire_once() {
    let broker = MemoryBroker::default();
    let adapter: Arc<dyn BrokerAdapter> = Arc::new(broker.clone());
    let (sender, mut receiver) = mpsc::unbounded_channel();

    let builder = BusBuilder::new(BusConfig::new("localhost"), adapter)
        .register_event(
            "Orders",
            "order.*",
            Recording {
                name: "wildcard",
                sender: sender.clone(),
            },
        )
        .unwrap()
        .register_event(
            "Orders",
            "order.placed",
            Recording {
                name: "literal",
                sender,
            },
        )
        .unwrap();
    let _bus = started_bus(&broker, builder).await;

    let body = codec::encode(&OrderPlaced { id: 7 }).unwrap();
    broker
        .publish(Envelope::event(key("order.placed"), body))
        .await
        .unwrap();

    let mut seen = Vec::new();
    for _ in 0..2 {
        let delivery = timeout(Duration::from_secs(1), receiver.recv())
            .await
            .expect("fan-out timed out")
            .unwrap();
        seen.push(delivery);
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![("literal", 7), ("wildcard", 7)]);

    // Neither handler runs a second time for the same message.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(receiver.try_recv().is_err());
}

#[tokio::test]
async fn unmatched_delivery_is_acked_and_flow_continues() {
    let broker = MemoryBroker::default();
    let adapter: Arc<dyn BrokerAdapter> = Arc::new(broker.clone());
    let (sender, mut receiver) = mpsc::unbounded_channel();

    let builder = BusBuilder::new(BusConfig::new("localhost"), adapter).register_event(
        "Orders",
        "order.*",
        Recording {
            name: "wildcard",
            sender,
        },
    )
    .unwrap();
    let _bus = started_bus(&broker, builder).await;

    // A stale binding left on the durable queue delivers keys no local
    // descriptor matches.
    broker
        .bind("Orders", &Pattern::new("payment.#").unwrap())
        .await
        .unwrap();
    broker
        .publish(Envelope::event(
            key("payment.settled.eu"),
            codec::encode(&OrderPlaced { id: 1 }).unwrap(),
        ))
        .await
        .unwrap();

    broker
        .publish(Envelope::event(
            key("order.placed"),
            codec::encode(&OrderPlaced { id: 2 }).unwrap(),
        ))
        .await
        .unwrap();

    let delivery = timeout(Duration::from_secs(1), receiver.recv())
        .await
        .expect("delivery timed out")
        .unwrap();
    assert_eq!(delivery, ("wildcard", 2));
}

#[tokio::test]
async fn decode_failure_does_not_stop_sibling_handlers() {
    let broker = MemoryBroker::default();
    let adapter: Arc<dyn BrokerAdapter> = Arc::new(broker.clone());
    let (strict_sender, mut strict_receiver) = mpsc::unbounded_channel();
    let (lenient_sender, mut lenient_receiver) = mpsc::unbounded_channel();

    let builder = BusBuilder::new(BusConfig::new("localhost"), adapter)
        .register_event(
            "Orders",
            "order.*",
            Recording {
                name: "strict",
                sender: strict_sender,
            },
        )
        .unwrap()
        .register_event(
            "Orders",
            "order.*",
            Lenient {
                sender: lenient_sender,
            },
        )
        .unwrap();
    let _bus = started_bus(&broker, builder).await;

    // `{}` has no `id`; the strict handler's decode fails, the lenient
    // one still runs and the message is acked.
    broker
        .publish(Envelope::event(
            key("order.placed"),
            bytes::Bytes::from_static(b"{}"),
        ))
        .await
        .unwrap();

    let value = timeout(Duration::from_secs(1), lenient_receiver.recv())
        .await
        .expect("lenient handler timed out")
        .unwrap();
    assert_eq!(value, serde_json::json!({}));

    broker
        .publish(Envelope::event(
            key("order.placed"),
            codec::encode(&OrderPlaced { id: 3 }).unwrap(),
        ))
        .await
        .unwrap();

    let delivery = timeout(Duration::from_secs(1), strict_receiver.recv())
        .await
        .expect("strict handler timed out")
        .unwrap();
    assert_eq!(delivery, ("strict", 3));
}
