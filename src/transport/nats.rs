//! NATS adapter (feature `transport-nats`) using async-nats. Properties ride
//! in native NATS headers; delivery is at-most-once.

use bytes::Bytes;
use futures::StreamExt;
use tokio::task::JoinHandle;

use super::{
    ConnectOptions, Publisher, Subscription, Transport, TransportError, TransportMessage,
};
use crate::wire::{self, MessageProperties};

#[derive(Clone)]
pub struct NatsTransport {
    url: String,
}

pub async fn connect(opts: ConnectOptions) -> Result<Box<dyn Transport>, TransportError> {
    let url = if let Some(u) = opts.params.get("url").cloned() {
        u
    } else if let Some(ep) = opts.params.get("endpoint").cloned() {
        ep
    } else {
        let host = opts
            .params
            .get("host")
            .cloned()
            .unwrap_or_else(|| "127.0.0.1".into());
        let port: u16 = opts
            .params
            .get("port")
            .and_then(|s| s.parse().ok())
            .unwrap_or(4222);
        format!("nats://{}:{}", host, port)
    };
    Ok(Box::new(NatsTransport { url }))
}

#[async_trait::async_trait]
impl Transport for NatsTransport {
    async fn subscribe(
        &self,
        expr: &str,
        handler: Box<dyn Fn(TransportMessage) + Send + Sync + 'static>,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        let subject = map_expr(expr);
        let client = async_nats::connect(&self.url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let mut sub = client
            .subscribe(subject)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        let handler = std::sync::Arc::new(handler);
        let handle: JoinHandle<()> = tokio::spawn(async move {
            while let Some(msg) = sub.next().await {
                let properties = msg
                    .headers
                    .as_ref()
                    .map(properties_from_headers)
                    .unwrap_or_default();
                (handler)(TransportMessage {
                    topic: unmap_subject(&msg.subject),
                    properties,
                    payload: Bytes::from(msg.payload.to_vec()),
                });
            }
        });
        Ok(Box::new(NatsSubscription {
            handle,
            _client: client,
        }))
    }

    async fn create_publisher(&self, topic: &str) -> Result<Box<dyn Publisher>, TransportError> {
        let client = async_nats::connect(&self.url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Box::new(NatsPublisher {
            client,
            subject: map_topic(topic),
        }))
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

struct NatsPublisher {
    client: async_nats::Client,
    subject: String,
}

#[async_trait::async_trait]
impl Publisher for NatsPublisher {
    async fn publish(
        &self,
        properties: &MessageProperties,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        if properties.is_empty() {
            self.client
                .publish(self.subject.clone(), payload)
                .await
                .map_err(|e| TransportError::Publish(e.to_string()))?;
        } else {
            let mut headers = async_nats::HeaderMap::new();
            for (key, value) in properties.iter() {
                headers.insert(key, value);
            }
            self.client
                .publish_with_headers(self.subject.clone(), headers, payload)
                .await
                .map_err(|e| TransportError::Publish(e.to_string()))?;
        }
        Ok(())
    }
}

struct NatsSubscription {
    handle: JoinHandle<()>,
    // keep client alive to maintain subscription
    _client: async_nats::Client,
}

#[async_trait::async_trait]
impl Subscription for NatsSubscription {
    async fn shutdown(&self) -> Result<(), TransportError> {
        self.handle.abort();
        Ok(())
    }
}

/// Lift the tracking properties out of the NATS headers. Other headers are
/// not part of the contract and are left behind.
fn properties_from_headers(headers: &async_nats::HeaderMap) -> MessageProperties {
    let mut properties = MessageProperties::new();
    for key in [wire::SEQUENCE_NUMBER, wire::SEQUENCE_TGT_MAX] {
        if let Some(value) = headers.get(key) {
            properties.insert(key, value.as_str());
        }
    }
    properties
}

fn map_expr(expr: &str) -> String {
    if let Some(prefix) = expr.strip_suffix("/**") {
        let base = map_topic(prefix);
        if base.ends_with('.') {
            format!("{}>", base)
        } else {
            format!("{}.>", base)
        }
    } else {
        map_topic(expr)
    }
}

fn map_topic(topic: &str) -> String {
    // Convert slash-separated keys to dot-separated NATS subjects.
    // e.g., "verify/topic/1" -> "verify.topic.1"
    topic.trim_matches('.').replace('/', ".")
}

fn unmap_subject(subject: &str) -> String {
    subject.replace('.', "/")
}
