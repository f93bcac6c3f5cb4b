//! MQTT adapter (feature `transport-mqtt`), using rumqttc (async).
//!
//! MQTT 3.1.1 has no message headers, so properties travel in the wire
//! envelope from [`crate::wire`]: every published payload is prefixed with
//! the encoded property block and split apart again on receive.

use std::time::Duration;

use bytes::Bytes;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::task::JoinHandle;

use super::{
    ConnectOptions, Publisher, Subscription, Transport, TransportError, TransportMessage,
};
use crate::wire::{self, MessageProperties};

#[derive(Clone)]
pub struct MqttTransport {
    host: String,
    port: u16,
    keep_alive: Duration,
    username: Option<String>,
    password: Option<String>,
    max_in: usize,
    max_out: usize,
    qos: QoS,
    client_id: Option<String>,
    clean_session: bool,
}

pub async fn connect(opts: ConnectOptions) -> Result<Box<dyn Transport>, TransportError> {
    let host = opts
        .params
        .get("host")
        .cloned()
        .unwrap_or_else(|| "127.0.0.1".into());
    let port: u16 = opts
        .params
        .get("port")
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let keep_alive = Duration::from_secs(30);
    // Max packet sizes: a single "max_packet" for both directions, or per-direction overrides
    let default_max: usize = 2 * 1024 * 1024;
    let max_both: Option<usize> = opts.params.get("max_packet").and_then(|s| s.parse().ok());
    let max_in: usize = opts
        .params
        .get("max_in")
        .and_then(|s| s.parse().ok())
        .or(max_both)
        .unwrap_or(default_max);
    let max_out: usize = opts
        .params
        .get("max_out")
        .and_then(|s| s.parse().ok())
        .or(max_both)
        .unwrap_or(default_max);
    let qos_level: u8 = opts
        .params
        .get("qos")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let qos = match qos_level {
        2 => QoS::ExactlyOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::AtMostOnce,
    };
    let client_id = opts.params.get("client_id").cloned();
    let clean_session: bool = opts
        .params
        .get("clean_session")
        .map(|s| s != "false" && s != "0")
        .unwrap_or(true);
    // Connection params only; per-role clients are created on demand.
    Ok(Box::new(MqttTransport {
        host,
        port,
        keep_alive,
        username: opts.params.get("username").cloned(),
        password: opts.params.get("password").cloned(),
        max_in,
        max_out,
        qos,
        client_id,
        clean_session,
    }))
}

impl MqttTransport {
    fn options(&self, client_id: String) -> MqttOptions {
        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_max_packet_size(self.max_in, self.max_out);
        options.set_clean_session(self.clean_session);
        if let Some(user) = &self.username {
            if let Some(pass) = &self.password {
                options.set_credentials(user, pass);
            }
        }
        options
    }

    fn role_client_id(&self, prefix: &str) -> String {
        self.client_id
            .as_ref()
            .map(|id| format!("{}-{}", prefix, id))
            .unwrap_or_else(|| format!("{}-{}", prefix, uuid::Uuid::new_v4()))
    }
}

#[async_trait::async_trait]
impl Transport for MqttTransport {
    async fn subscribe(
        &self,
        expr: &str,
        handler: Box<dyn Fn(TransportMessage) + Send + Sync + 'static>,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        // Dedicated client + eventloop for this subscription
        let options = self.options(self.role_client_id("sub"));
        let (client, mut eventloop) = AsyncClient::new(options, 65536);
        client
            .subscribe(map_expr(expr), self.qos)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        let handler = std::sync::Arc::new(handler);
        let handle: JoinHandle<()> = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::Publish(p))) => {
                        let (properties, payload) = split_envelope(&p.payload);
                        (handler)(TransportMessage {
                            topic: p.topic.clone(),
                            properties,
                            payload,
                        });
                    }
                    Ok(_) => {}
                    Err(_e) => break,
                }
            }
            drop(client);
        });
        Ok(Box::new(MqttSubscription { handle }))
    }

    async fn create_publisher(&self, topic: &str) -> Result<Box<dyn Publisher>, TransportError> {
        // Dedicated client + background poller for the publisher
        let options = self.options(self.role_client_id("pub"));
        let (client, mut eventloop) = AsyncClient::new(options, 65536);
        let poller = tokio::spawn(async move {
            loop {
                let _ = eventloop.poll().await;
            }
        });
        Ok(Box::new(MqttPublisher {
            client,
            topic: topic.to_string(),
            qos: self.qos,
            poller,
        }))
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

struct MqttPublisher {
    client: AsyncClient,
    topic: String,
    qos: QoS,
    poller: JoinHandle<()>,
}

#[async_trait::async_trait]
impl Publisher for MqttPublisher {
    async fn publish(
        &self,
        properties: &MessageProperties,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        let enveloped = wire::encode_envelope(properties, &payload);
        self.client
            .publish(&self.topic, self.qos, false, enveloped.to_vec())
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.poller.abort();
        Ok(())
    }
}

struct MqttSubscription {
    handle: JoinHandle<()>,
}

#[async_trait::async_trait]
impl Subscription for MqttSubscription {
    async fn shutdown(&self) -> Result<(), TransportError> {
        self.handle.abort();
        Ok(())
    }
}

/// Decode the property envelope; bytes that are not an envelope (a foreign
/// publisher on the same topic) pass through as a propertyless payload.
fn split_envelope(raw: &[u8]) -> (MessageProperties, Bytes) {
    match wire::decode_envelope(raw) {
        Some((properties, payload)) => (properties, payload),
        None => (MessageProperties::new(), Bytes::copy_from_slice(raw)),
    }
}

fn map_expr(expr: &str) -> String {
    if let Some(prefix) = expr.strip_suffix("/**") {
        format!("{}/#", prefix.trim_end_matches('/'))
    } else {
        expr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_mapping() {
        assert_eq!(map_expr("verify/**"), "verify/#");
        assert_eq!(map_expr("verify/topic/1"), "verify/topic/1");
    }

    #[test]
    fn envelope_splits_back() {
        let mut props = MessageProperties::new();
        props.set_sequence_number(3);
        let env = wire::encode_envelope(&props, b"body");
        let (decoded, body) = split_envelope(&env);
        assert_eq!(decoded.sequence_number(), Some(3));
        assert_eq!(&body[..], b"body");
    }
}
