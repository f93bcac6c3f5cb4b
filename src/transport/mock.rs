//! Mock transport for tests: an in-process bus with prefix subscriptions.

use std::sync::{Arc, Mutex, OnceLock};

use bytes::Bytes;

use super::{
    ConnectOptions, Publisher, Subscription, Transport, TransportError, TransportMessage,
};
use crate::wire::MessageProperties;

type Handler = Arc<dyn Fn(TransportMessage) + Send + Sync + 'static>;

struct SubEntry {
    id: u64,
    expr: String,
    handler: Handler,
}

#[derive(Default)]
struct Bus {
    next_id: u64,
    subs: Vec<SubEntry>,
}

#[derive(Clone, Default)]
struct SharedBus(Arc<Mutex<Bus>>);

static BUS: OnceLock<SharedBus> = OnceLock::new();
fn shared_bus() -> SharedBus {
    BUS.get_or_init(SharedBus::default).clone()
}

/// True when `expr` covers `topic`: exact match, or a `prefix/**` wildcard.
fn expr_matches(expr: &str, topic: &str) -> bool {
    if let Some(prefix) = expr.strip_suffix("/**") {
        topic == prefix || topic.starts_with(&format!("{prefix}/"))
    } else {
        expr == topic
    }
}

pub struct MockTransport {
    bus: SharedBus,
}

pub async fn connect(_opts: ConnectOptions) -> Result<Box<dyn Transport>, TransportError> {
    Ok(Box::new(MockTransport { bus: shared_bus() }))
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn subscribe(
        &self,
        expr: &str,
        handler: Box<dyn Fn(TransportMessage) + Send + Sync + 'static>,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        let mut bus = self.bus.0.lock().unwrap();
        bus.next_id += 1;
        let id = bus.next_id;
        bus.subs.push(SubEntry {
            id,
            expr: expr.to_string(),
            handler: Arc::from(handler),
        });
        Ok(Box::new(MockSub {
            bus: self.bus.clone(),
            id,
        }))
    }

    async fn create_publisher(&self, topic: &str) -> Result<Box<dyn Publisher>, TransportError> {
        Ok(Box::new(MockPub {
            bus: self.bus.clone(),
            topic: topic.to_string(),
        }))
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

struct MockSub {
    bus: SharedBus,
    id: u64,
}

#[async_trait::async_trait]
impl Subscription for MockSub {
    async fn shutdown(&self) -> Result<(), TransportError> {
        let mut bus = self.bus.0.lock().unwrap();
        bus.subs.retain(|s| s.id != self.id);
        Ok(())
    }
}

struct MockPub {
    bus: SharedBus,
    topic: String,
}

#[async_trait::async_trait]
impl Publisher for MockPub {
    async fn publish(
        &self,
        properties: &MessageProperties,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        let handlers: Vec<Handler> = {
            let bus = self.bus.0.lock().unwrap();
            bus.subs
                .iter()
                .filter(|s| expr_matches(&s.expr, &self.topic))
                .map(|s| s.handler.clone())
                .collect()
        };
        for handler in handlers {
            handler(TransportMessage {
                topic: self.topic.clone(),
                properties: properties.clone(),
                payload: payload.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn expr_matching() {
        assert!(expr_matches("verify/topic/0", "verify/topic/0"));
        assert!(!expr_matches("verify/topic/0", "verify/topic/1"));
        assert!(expr_matches("verify/**", "verify/topic/1"));
        assert!(expr_matches("verify/**", "verify"));
        assert!(!expr_matches("verify/**", "verification/topic"));
    }

    #[tokio::test]
    async fn delivers_properties_to_matching_subscribers() {
        let t = connect(ConnectOptions::default()).await.expect("connect");
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        let sub = t
            .subscribe(
                "mock-smoke/**",
                Box::new(move |msg| {
                    assert_eq!(msg.properties.sequence_number(), Some(5));
                    seen2.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .expect("subscribe");

        let publisher = t
            .create_publisher("mock-smoke/topic/0")
            .await
            .expect("publisher");
        let mut props = MessageProperties::new();
        props.set_sequence_number(5);
        publisher
            .publish(&props, Bytes::from_static(b"hello"))
            .await
            .expect("publish");
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        sub.shutdown().await.expect("shutdown");
        publisher
            .publish(&props, Bytes::from_static(b"hello"))
            .await
            .expect("publish");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
