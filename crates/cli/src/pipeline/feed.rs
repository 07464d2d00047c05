//! Fan-in of channel subscriptions into one bounded queue

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_channel::{bounded, Receiver, Sender, TrySendError};
use bytes::Bytes;
use contracts::{BusError, MessageBus};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

/// One raw payload tagged with its channel
#[derive(Debug, Clone)]
pub struct FeedMessage {
    pub channel_id: u32,
    pub payload: Bytes,
}

/// Per-channel forwarders feeding a shared queue
///
/// A full queue drops the newest payload and counts it.
pub struct LiveFeed {
    tx: Sender<FeedMessage>,
    rx: Option<Receiver<FeedMessage>>,
    forwarders: Vec<(u32, JoinHandle<()>)>,
    dropped: Arc<AtomicU64>,
}

impl LiveFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            tx,
            rx: Some(rx),
            forwarders: Vec::new(),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Subscribe `subject` and forward its payloads as `channel_id`
    #[instrument(name = "feed_subscribe", skip(self, bus), fields(channel = channel_id, subject = %subject))]
    pub async fn subscribe<B: MessageBus>(
        &mut self,
        bus: &B,
        channel_id: u32,
        subject: &str,
    ) -> Result<(), BusError> {
        let mut subscription = bus.subscribe(subject).await?;
        let tx = self.tx.clone();
        let dropped = self.dropped.clone();

        let handle = tokio::spawn(async move {
            while let Some(message) = subscription.next().await {
                let item = FeedMessage {
                    channel_id,
                    payload: message.payload,
                };
                match tx.try_send(item) {
                    Ok(()) => trace!(channel = channel_id, "payload queued"),
                    Err(TrySendError::Full(_)) => {
                        dropped.fetch_add(1, Ordering::Relaxed);
                        trace!(channel = channel_id, "payload dropped (queue full)");
                    }
                    Err(TrySendError::Closed(_)) => {
                        warn!(channel = channel_id, "feed queue closed");
                        break;
                    }
                }
            }
            debug!(channel = channel_id, "forwarder finished");
        });

        self.forwarders.push((channel_id, handle));
        Ok(())
    }

    /// Can only be taken once
    pub fn take_receiver(&mut self) -> Option<Receiver<FeedMessage>> {
        self.rx.take()
    }

    pub fn channel_count(&self) -> usize {
        self.forwarders.len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Abort every forwarder; their subscriptions are released on drop
    pub fn stop_all(&mut self) {
        info!(count = self.forwarders.len(), "stopping live feed");
        for (_, handle) in self.forwarders.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        for (_, handle) in &self.forwarders {
            handle.abort();
        }
    }
}
