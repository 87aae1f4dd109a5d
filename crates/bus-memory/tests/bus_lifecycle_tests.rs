//! Integration tests for bus startup, registration failures and shutdown.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rondo_bus::broker::BrokerAdapter;
use rondo_bus::bus::BusBuilder;
use rondo_bus::codec;
use rondo_bus::config::BusConfig;
use rondo_bus::envelope::Envelope;
use rondo_bus::error::{BusError, CommandError, RegistryError};
use rondo_bus::registry::{CommandHandler, EventHandler};
use rondo_bus::routing::RoutingKey;
use rondo_bus_memory::MemoryBroker;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::timeout;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Ping {
    n: u64,
}

struct Forwarding {
    sender: mpsc::UnboundedSender<u64>,
}

#[async_trait]
impl EventHandler for Forwarding {
    type Event = Ping;
    type Error = Infallible;

    async fn handle(&self, event: Ping) -> Result<(), Infallible> {
        self.sender.send(event.n).unwrap();
        Ok(())
    }
}

struct Answering;

#[async_trait]
impl CommandHandler for Answering {
    type Request = Ping;
    type Reply = Ping;

    async fn handle(&self, request: Ping) -> Result<Ping, CommandError> {
        Ok(request)
    }
}

#[tokio::test]
async fn mixed_queue_fails_before_any_broker_call() {
    let broker = MemoryBroker::default();
    let adapter: Arc<dyn BrokerAdapter> = Arc::new(broker.clone());
    let (sender, _receiver) = mpsc::unbounded_channel();

    let err = BusBuilder::new(BusConfig::new("localhost"), adapter)
        .register_event("Mixed", "ping.*", Forwarding { sender })
        .unwrap()
        .register_command("Mixed", "ping.ask", Answering)
        .unwrap_err();

    assert!(matches!(err, RegistryError::MixedQueue { queue } if queue == "Mixed"));
    assert!(!broker.has_queue("Mixed").await);
}

#[tokio::test]
async fn invalid_configuration_fails_startup_before_broker_calls() {
    let broker = MemoryBroker::default();
    let adapter: Arc<dyn BrokerAdapter> = Arc::new(broker.clone());
    let (sender, _receiver) = mpsc::unbounded_channel();

    let mut config = BusConfig::new("localhost");
    config.rpc_timeout = Duration::ZERO;
    let bus = BusBuilder::new(config, adapter)
        .register_event("Orders", "ping.*", Forwarding { sender })
        .unwrap()
        .build();

    match bus.start().await.unwrap_err() {
        BusError::Config(e) => assert_eq!(e.field, "rpc_timeout"),
        other => panic!("expected a configuration error, got {other:?}"),
    }
    assert!(!broker.has_queue("Orders").await);
}

#[tokio::test]
async fn second_start_is_rejected() {
    let adapter: Arc<dyn BrokerAdapter> = Arc::new(MemoryBroker::default());
    let (sender, _receiver) = mpsc::unbounded_channel();

    let bus = BusBuilder::new(BusConfig::new("localhost"), adapter)
        .register_event("Orders", "ping.*", Forwarding { sender })
        .unwrap()
        .build();
    bus.start().await.unwrap();
    assert!(matches!(
        bus.start().await.unwrap_err(),
        BusError::AlreadyRunning
    ));
}

#[tokio::test]
async fn shutdown_stops_delivery() {
    let broker = MemoryBroker::default();
    let adapter: Arc<dyn BrokerAdapter> = Arc::new(broker.clone());
    let (sender, mut receiver) = mpsc::unbounded_channel();

    let bus = BusBuilder::new(BusConfig::new("localhost"), adapter)
        .register_event("Orders", "ping.#", Forwarding { sender })
        .unwrap()
        .build();
    bus.start().await.unwrap();

    broker
        .publish(Envelope::event(
            RoutingKey::new("ping.one").unwrap(),
            codec::encode(&Ping { n: 1 }).unwrap(),
        ))
        .await
        .unwrap();
    let n = timeout(Duration::from_secs(1), receiver.recv())
        .await
        .expect("delivery timed out")
        .unwrap();
    assert_eq!(n, 1);

    bus.shutdown().await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    broker
        .publish(Envelope::event(
            RoutingKey::new("ping.two").unwrap(),
            codec::encode(&Ping { n: 2 }).unwrap(),
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(receiver.try_recv().is_err(), "handler ran after shutdown");
}
