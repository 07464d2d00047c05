//! Endpoint-selected bus client
//!
//! `nats://` and `tls://` endpoints connect to a NATS server, `memory://`
//! endpoints get a fresh in-process bus.

use std::time::Duration;

use bytes::Bytes;
use contracts::{BusError, BusMessage, MessageBus, Subscription};

use crate::memory::InMemoryBus;
use crate::nats::NatsBus;

/// Either bus implementation behind one type
#[derive(Debug, Clone)]
pub enum BusClient {
    Memory(InMemoryBus),
    Nats(NatsBus),
}

impl BusClient {
    /// Connect according to the endpoint scheme
    ///
    /// # Errors
    /// `Transport` for an unknown scheme or an unreachable server
    pub async fn connect(endpoint: &str, connect_timeout: Duration) -> Result<Self, BusError> {
        let scheme = endpoint.split_once("://").map(|(scheme, _)| scheme);
        match scheme {
            Some("memory") => Ok(Self::Memory(InMemoryBus::new(endpoint))),
            Some("nats" | "tls") => Ok(Self::Nats(NatsBus::connect(endpoint, connect_timeout).await?)),
            _ => Err(BusError::Transport {
                endpoint: endpoint.to_string(),
                message: "unsupported bus scheme, expected nats:// or memory://".to_string(),
            }),
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory(_))
    }
}

impl MessageBus for BusClient {
    fn endpoint(&self) -> &str {
        match self {
            Self::Memory(bus) => bus.endpoint(),
            Self::Nats(bus) => bus.endpoint(),
        }
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, BusError> {
        match self {
            Self::Memory(bus) => bus.request(subject, payload, timeout).await,
            Self::Nats(bus) => bus.request(subject, payload, timeout).await,
        }
    }

    async fn publish(&self, message: BusMessage) -> Result<(), BusError> {
        match self {
            Self::Memory(bus) => bus.publish(message).await,
            Self::Nats(bus) => bus.publish(message).await,
        }
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
        match self {
            Self::Memory(bus) => bus.subscribe(subject).await,
            Self::Nats(bus) => bus.subscribe(subject).await,
        }
    }

    async fn close(&self) {
        match self {
            Self::Memory(bus) => bus.close().await,
            Self::Nats(bus) => bus.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_scheme_selects_in_process_bus() {
        let bus = BusClient::connect("memory://bench", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(bus.is_memory());
        assert_eq!(bus.endpoint(), "memory://bench");

        let mut sub = bus.subscribe("data.ch01").await.unwrap();
        bus.publish(BusMessage::new("data.ch01", Bytes::from_static(b"x")))
            .await
            .unwrap();
        assert_eq!(sub.next().await.unwrap().payload, Bytes::from_static(b"x"));
    }

    #[tokio::test]
    async fn test_unknown_scheme_is_rejected() {
        let err = BusClient::connect("amqp://broker:5672", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BusError::Transport { ref endpoint, .. } if endpoint == "amqp://broker:5672"
        ));
    }

    #[tokio::test]
    async fn test_nats_scheme_dials_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("nats://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = BusClient::connect(&endpoint, Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Transport { .. }));
    }
}
