//! In-process message bus
//!
//! Used by tests, replay and the CLI demo. Each subscription is an unbounded
//! mpsc queue, so delivery order per subscriber equals publish order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use bytes::Bytes;
use contracts::{BusError, BusMessage, MessageBus, Subscription};
use tokio::sync::mpsc;
use tracing::{instrument, trace};

use crate::subject;

const INBOX_PREFIX: &str = "_INBOX";

struct Subscriber {
    id: u64,
    pattern: String,
    tx: mpsc::UnboundedSender<BusMessage>,
}

struct BusInner {
    endpoint: String,
    next_id: AtomicU64,
    closed: AtomicBool,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl BusInner {
    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BusError::Closed {
                endpoint: self.endpoint.clone(),
            })
        } else {
            Ok(())
        }
    }

    /// Deliver to every matching subscriber, returns the delivery count
    fn deliver(&self, message: &BusMessage) -> usize {
        let mut subscribers = self.subscribers();
        let mut delivered = 0;
        subscribers.retain(|sub| {
            if !subject::matches(&sub.pattern, &message.subject) {
                return true;
            }
            match sub.tx.send(message.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        delivered
    }

    fn register(self: &Arc<Self>, pattern: &str) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers().push(Subscriber {
            id,
            pattern: pattern.to_string(),
            tx,
        });

        let weak: Weak<BusInner> = Arc::downgrade(self);
        Subscription::new(id, pattern, rx, move || {
            if let Some(inner) = weak.upgrade() {
                inner.subscribers().retain(|sub| sub.id != id);
                trace!(subscription = id, "subscription released");
            }
        })
    }
}

/// In-memory `MessageBus`
///
/// Cheap to clone; clones share one bus.
#[derive(Clone)]
pub struct InMemoryBus {
    inner: Arc<BusInner>,
}

impl InMemoryBus {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                endpoint: endpoint.into(),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Live subscriptions registered with exactly this subject or pattern
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.inner
            .subscribers()
            .iter()
            .filter(|sub| sub.pattern == subject && !sub.tx.is_closed())
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new("memory://local")
    }
}

impl std::fmt::Debug for InMemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBus")
            .field("endpoint", &self.inner.endpoint)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl MessageBus for InMemoryBus {
    fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    #[instrument(
        name = "memory_bus_request",
        skip(self, payload),
        fields(subject = %subject, bytes = payload.len())
    )]
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, BusError> {
        self.inner.ensure_open()?;

        let inbox = format!(
            "{INBOX_PREFIX}.{}",
            self.inner.next_id.fetch_add(1, Ordering::SeqCst)
        );
        let mut replies = self.inner.register(&inbox);

        let message = BusMessage::new(subject, payload).with_reply(inbox);
        if self.inner.deliver(&message) == 0 {
            return Err(BusError::NoResponders {
                subject: subject.to_string(),
            });
        }

        match tokio::time::timeout(timeout, replies.next()).await {
            Ok(Some(reply)) => Ok(reply.payload),
            Ok(None) => Err(BusError::Closed {
                endpoint: self.inner.endpoint.clone(),
            }),
            Err(_) => Err(BusError::Timeout {
                subject: subject.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn publish(&self, message: BusMessage) -> Result<(), BusError> {
        self.inner.ensure_open()?;
        let delivered = self.inner.deliver(&message);
        trace!(subject = %message.subject, delivered, "published");
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
        self.inner.ensure_open()?;
        Ok(self.inner.register(subject))
    }

    async fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            // dropping the senders ends every open subscription
            self.inner.subscribers().clear();
            trace!(endpoint = %self.inner.endpoint, "bus closed");
        }
    }
}
