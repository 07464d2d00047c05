//! NATS-backed message bus
//!
//! Wraps one `async_nats::Client`. Request timeouts are enforced per call, so
//! the client is built without its own default request timeout.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_nats::{Client, ConnectOptions, HeaderMap, Request, RequestErrorKind};
use bytes::Bytes;
use contracts::{BusError, BusMessage, MessageBus, Subscription, EVENT_HEADER};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace, warn};

struct NatsInner {
    endpoint: String,
    client: Client,
    next_id: AtomicU64,
    closed: AtomicBool,
}

/// `MessageBus` over a NATS server
///
/// Cheap to clone; clones share one client.
#[derive(Clone)]
pub struct NatsBus {
    inner: Arc<NatsInner>,
}

impl NatsBus {
    /// Connect to `endpoint`, e.g. `nats://127.0.0.1:4222`
    ///
    /// # Errors
    /// `Transport` naming the endpoint when the server is unreachable
    pub async fn connect(
        endpoint: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, BusError> {
        let endpoint = endpoint.into();
        let client = ConnectOptions::new()
            .connection_timeout(connect_timeout)
            .request_timeout(None)
            .connect(endpoint.as_str())
            .await
            .map_err(|e| BusError::Transport {
                endpoint: endpoint.clone(),
                message: e.to_string(),
            })?;
        info!(endpoint = %endpoint, "nats connected");

        Ok(Self {
            inner: Arc::new(NatsInner {
                endpoint,
                client,
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<&Client, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed {
                endpoint: self.inner.endpoint.clone(),
            });
        }
        Ok(&self.inner.client)
    }

    fn transport(&self, err: impl std::fmt::Display) -> BusError {
        BusError::Transport {
            endpoint: self.inner.endpoint.clone(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Debug for NatsBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsBus")
            .field("endpoint", &self.inner.endpoint)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl MessageBus for NatsBus {
    fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    #[instrument(
        name = "nats_request",
        skip(self, payload),
        fields(subject = %subject, bytes = payload.len())
    )]
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, BusError> {
        let client = self.ensure_open()?;
        let request = Request::new().payload(payload).timeout(Some(timeout));
        match client.send_request(subject.to_string(), request).await {
            Ok(reply) => Ok(reply.payload),
            Err(err) => Err(match err.kind() {
                RequestErrorKind::TimedOut => BusError::Timeout {
                    subject: subject.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                },
                RequestErrorKind::NoResponders => BusError::NoResponders {
                    subject: subject.to_string(),
                },
                _ => self.transport(err),
            }),
        }
    }

    async fn publish(&self, message: BusMessage) -> Result<(), BusError> {
        let client = self.ensure_open()?;
        let BusMessage {
            subject,
            headers,
            payload,
            reply,
        } = message;

        let mut nats_headers = HeaderMap::new();
        for (key, value) in &headers {
            nats_headers.insert(key.as_str(), value.as_str());
        }

        let published = match (reply, headers.is_empty()) {
            (Some(reply), true) => client.publish_with_reply(subject, reply, payload).await,
            (Some(reply), false) => {
                client
                    .publish_with_reply_and_headers(subject, reply, nats_headers, payload)
                    .await
            }
            (None, true) => client.publish(subject, payload).await,
            (None, false) => client.publish_with_headers(subject, nats_headers, payload).await,
        };
        published.map_err(|e| self.transport(e))
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
        let client = self.ensure_open()?;
        let mut subscriber = client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| self.transport(e))?;

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        let forward = tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                if tx.send(from_nats(message)).is_err() {
                    break;
                }
            }
            trace!(subscription = id, "nats subscription ended");
        });

        // dropping the forwarder drops the subscriber, which unsubscribes
        Ok(Subscription::new(id, subject, rx, move || forward.abort()))
    }

    async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.inner.client.drain().await {
            Ok(()) => debug!(endpoint = %self.inner.endpoint, "nats drained"),
            Err(err) => warn!(endpoint = %self.inner.endpoint, error = %err, "nats drain failed"),
        }
    }
}

fn from_nats(message: async_nats::Message) -> BusMessage {
    into_bus_message(
        message.subject.to_string(),
        message.reply.map(|reply| reply.to_string()),
        message.headers.as_ref(),
        message.payload,
    )
}

/// Only the `event` header is meaningful on our subjects
fn into_bus_message(
    subject: String,
    reply: Option<String>,
    headers: Option<&HeaderMap>,
    payload: Bytes,
) -> BusMessage {
    let mut converted = BusMessage::new(subject, payload);
    if let Some(reply) = reply {
        converted = converted.with_reply(reply);
    }
    if let Some(event) = headers.and_then(|headers| headers.get(EVENT_HEADER)) {
        converted = converted.with_header(EVENT_HEADER, event.as_str());
    }
    converted
}
