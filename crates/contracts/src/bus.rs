//! MessageBus trait - transport seam for live feeds and exports
//!
//! Implementations own connection details. Callers only see subjects,
//! request/reply and ordered subscriptions.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::BusError;

/// Header naming the frame kind on an export data channel
pub const EVENT_HEADER: &str = "event";

/// One published message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub subject: String,
    pub headers: BTreeMap<String, String>,
    pub payload: Bytes,
    /// Reply subject of a request
    pub reply: Option<String>,
}

impl BusMessage {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            headers: BTreeMap::new(),
            payload: payload.into(),
            reply: None,
        }
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Value of the `event` header, if tagged
    pub fn event(&self) -> Option<&str> {
        self.header(EVENT_HEADER)
    }
}

type ReleaseFn = Box<dyn FnOnce() + Send + 'static>;

/// Ordered stream of messages on one subject
///
/// Dropping the subscription removes its registration from the bus.
pub struct Subscription {
    id: u64,
    subject: String,
    receiver: mpsc::UnboundedReceiver<BusMessage>,
    release: Option<ReleaseFn>,
}

impl Subscription {
    /// Wrap a receiver; `release` runs exactly once when the subscription ends
    pub fn new(
        id: u64,
        subject: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<BusMessage>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            id,
            subject: subject.into(),
            receiver,
            release: Some(Box::new(release)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Next message in arrival order; `None` once the bus side has gone away
    pub async fn next(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }

    /// Explicitly end the subscription
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        self.receiver.close();
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("subject", &self.subject)
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// Messaging bus client
#[trait_variant::make(MessageBus: Send)]
pub trait LocalMessageBus {
    /// Server endpoint (used in errors and logs)
    fn endpoint(&self) -> &str;

    /// Single request/reply round trip
    ///
    /// # Errors
    /// `Timeout` when no reply arrives in `timeout`, `NoResponders` when nobody
    /// listens, `Closed` after `close`
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, BusError>;

    /// Fire-and-forget publish
    async fn publish(&self, message: BusMessage) -> Result<(), BusError>;

    /// Ordered subscription on `subject`
    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError>;

    /// Drain and close; later calls fail with `Closed`
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_subscription_releases_once_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::unbounded_channel();
        let counter = released.clone();
        let mut sub = Subscription::new(1, "data", rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tx.send(BusMessage::new("data", "x")).unwrap();
        assert_eq!(sub.next().await.unwrap().payload, Bytes::from_static(b"x"));

        sub.unsubscribe();
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(tx.send(BusMessage::new("data", "y")).is_err());
    }

    #[test]
    fn test_event_header() {
        let msg = BusMessage::new("d", Bytes::new()).with_header(EVENT_HEADER, "meta");
        assert_eq!(msg.event(), Some("meta"));
        assert_eq!(BusMessage::new("d", Bytes::new()).event(), None);
    }
}
