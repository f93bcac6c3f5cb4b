//! Transport abstraction: trait, types, and builder factory.
//!
//! Adapters deliver messages as `(topic, properties, payload)` triples. How
//! the properties travel is the adapter's concern: native headers where the
//! broker has them, the wire envelope from [`crate::wire`] where it does not.

pub mod config;
#[cfg(any(test, feature = "transport-mock"))]
pub mod mock;
#[cfg(feature = "transport-mqtt")]
pub mod mqtt;
#[cfg(feature = "transport-nats")]
pub mod nats;

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::wire::MessageProperties;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Engine {
    Nats,
    Mqtt,
    #[cfg(any(test, feature = "transport-mock"))]
    Mock,
}

#[derive(Clone, Debug, Default)]
pub struct ConnectOptions {
    pub params: BTreeMap<String, String>,
    /// Enable connection retry with backoff (default: false)
    pub retry_enabled: bool,
    /// Maximum number of retry attempts (default: 3)
    pub retry_count: u32,
    /// Initial delay between retries in milliseconds (default: 1000)
    pub retry_delay_ms: u64,
    /// Maximum delay between retries in milliseconds (default: 30000)
    pub retry_max_delay_ms: u64,
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("connect: {0}")]
    Connect(String),
    #[error("publish: {0}")]
    Publish(String),
    #[error("subscribe: {0}")]
    Subscribe(String),
    #[error("other: {0}")]
    Other(String),
}

/// One received message as handed to subscription handlers.
#[derive(Clone, Debug)]
pub struct TransportMessage {
    pub topic: String,
    pub properties: MessageProperties,
    pub payload: Bytes,
}

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Handler-based subscribe. The returned handle must be kept alive;
    /// dropping or shutdown stops delivery.
    async fn subscribe(
        &self,
        expr: &str,
        handler: Box<dyn Fn(TransportMessage) + Send + Sync + 'static>,
    ) -> Result<Box<dyn Subscription>, TransportError>;

    /// Pre-declare a publisher for high-throughput publishing on one topic.
    async fn create_publisher(&self, topic: &str) -> Result<Box<dyn Publisher>, TransportError>;

    async fn shutdown(&self) -> Result<(), TransportError>;

    async fn health_check(&self) -> Result<(), TransportError>;
}

#[async_trait::async_trait]
pub trait Subscription: Send + Sync {
    async fn shutdown(&self) -> Result<(), TransportError>;
}

#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        properties: &MessageProperties,
        payload: Bytes,
    ) -> Result<(), TransportError>;

    async fn shutdown(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

pub struct TransportBuilder;

impl TransportBuilder {
    pub async fn connect(
        engine: Engine,
        opts: ConnectOptions,
    ) -> Result<Box<dyn Transport>, TransportError> {
        match engine {
            Engine::Nats => {
                #[cfg(feature = "transport-nats")]
                {
                    crate::transport::nats::connect(opts).await
                }
                #[cfg(not(feature = "transport-nats"))]
                {
                    let _ = opts;
                    Err(TransportError::Connect("nats feature disabled".into()))
                }
            }
            Engine::Mqtt => {
                #[cfg(feature = "transport-mqtt")]
                {
                    crate::transport::mqtt::connect(opts).await
                }
                #[cfg(not(feature = "transport-mqtt"))]
                {
                    let _ = opts;
                    Err(TransportError::Connect("mqtt feature disabled".into()))
                }
            }
            #[cfg(any(test, feature = "transport-mock"))]
            Engine::Mock => crate::transport::mock::connect(opts).await,
        }
    }

    /// Connect with optional retry based on ConnectOptions settings. With
    /// retry disabled this behaves identically to [`connect`](Self::connect);
    /// otherwise up to `retry_count` attempts with exponential backoff.
    pub async fn connect_with_retry(
        engine: Engine,
        opts: ConnectOptions,
    ) -> Result<Box<dyn Transport>, TransportError> {
        if !opts.retry_enabled {
            return Self::connect(engine, opts).await;
        }

        let max_attempts = opts.retry_count.max(1);
        let initial_delay = std::time::Duration::from_millis(opts.retry_delay_ms.max(100));
        let max_delay = std::time::Duration::from_millis(
            opts.retry_max_delay_ms.max(initial_delay.as_millis() as u64),
        );
        let mut current_delay = initial_delay;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match Self::connect(engine.clone(), opts.clone()).await {
                Ok(transport) => {
                    if attempt > 1 {
                        tracing::info!("Connection succeeded on attempt {}", attempt);
                    }
                    return Ok(transport);
                }
                Err(e) => {
                    tracing::warn!(
                        "Connection attempt {}/{} failed: {}. Retrying in {:?}...",
                        attempt,
                        max_attempts,
                        e,
                        current_delay
                    );
                    last_error = Some(e);

                    if attempt < max_attempts {
                        tokio::time::sleep(current_delay).await;
                        current_delay = std::cmp::min(current_delay * 2, max_delay);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            TransportError::Connect("Connection failed after all retry attempts".into())
        }))
    }
}
