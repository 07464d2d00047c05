//! Serving side of the bus export protocol
//!
//! Answers negotiation requests on one subject, waits for `start` on a
//! per-export control channel, then publishes the export on the data channel.
//! The size is announced during negotiation, so the body is rendered before
//! the reply goes out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use contracts::{
    BusError, BusMessage, ExportNegotiationResult, ExportRequest, MessageBus, MetaFrame,
    SummaryFrame, TransferError, TransferFrame, EVENT_HEADER,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::protocol::{self, ControlAck, ControlCommand, CHUNK_SIZE};
use crate::source::{render_csv, ExportSource};

/// Responder behaviour knobs
#[derive(Debug, Clone)]
pub struct ResponderOptions {
    pub chunk_size: usize,
    /// How long to wait for `start` after accepting
    pub start_timeout: Duration,
    #[cfg(test)]
    pub(crate) faults: Faults,
}

impl Default for ResponderOptions {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            start_timeout: Duration::from_secs(60),
            #[cfg(test)]
            faults: Faults::default(),
        }
    }
}

impl ResponderOptions {
    /// Byte count to announce for a body of `actual` bytes
    pub(crate) fn announced_size(&self, actual: u64) -> u64 {
        #[cfg(test)]
        let actual = self.faults.advertised_size.unwrap_or(actual);
        actual
    }

    /// Injected failure before sending chunk `index`
    pub(crate) fn fault_at(&self, index: usize) -> Option<Fault> {
        #[cfg(test)]
        let fault = self.faults.at(index);
        #[cfg(not(test))]
        let fault = {
            let _ = index;
            None
        };
        fault
    }
}

/// What an injected failure does to the stream
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(not(test), allow(dead_code))]
pub(crate) enum Fault {
    /// Send an error frame with this message
    Fail(String),
    /// Stop sending without a terminal frame
    Stall,
}

/// Failure injection for exercising the client's error paths
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub(crate) struct Faults {
    pub fail_after_chunks: Option<(usize, String)>,
    pub stall_after_chunks: Option<usize>,
    /// Announced instead of the real byte count
    pub advertised_size: Option<u64>,
}

#[cfg(test)]
impl Faults {
    fn at(&self, index: usize) -> Option<Fault> {
        match &self.fail_after_chunks {
            Some((after, message)) if *after == index => Some(Fault::Fail(message.clone())),
            _ => (self.stall_after_chunks == Some(index)).then_some(Fault::Stall),
        }
    }
}

/// Running responder
#[derive(Debug)]
pub struct ResponderHandle {
    subject: String,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ResponderHandle {
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Stop accepting requests; exports already streaming run to completion
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for ResponderHandle {
    fn drop(&mut self) {
        if self.shutdown.is_some() {
            self.task.abort();
        }
    }
}

pub struct ExportResponder;

impl ExportResponder {
    /// Subscribe on `subject` and serve exports from `source`
    ///
    /// The subscription is live when this returns.
    pub async fn spawn<B, S>(
        bus: B,
        subject: impl Into<String>,
        source: Arc<S>,
        options: ResponderOptions,
    ) -> Result<ResponderHandle, BusError>
    where
        B: MessageBus + Clone + Sync + 'static,
        S: ExportSource + Send + Sync + 'static,
    {
        let subject = subject.into();
        let mut requests = bus.subscribe(&subject).await?;
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let sequence = Arc::new(AtomicU64::new(1));

        info!(subject = %subject, "export responder listening");

        let loop_subject = subject.clone();
        let task = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = &mut shutdown_rx => break,
                    message = requests.next() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };

                let id = sequence.fetch_add(1, Ordering::Relaxed);
                let job = ExportJob {
                    bus: bus.clone(),
                    source: source.clone(),
                    options: options.clone(),
                    control: format!("{loop_subject}.ctl.{id}"),
                    data: format!("{loop_subject}.data.{id}"),
                };
                tokio::spawn(async move {
                    if let Err(err) = job.run(message).await {
                        warn!(error = %err, "export job ended early");
                    }
                });
            }
            debug!(subject = %loop_subject, "export responder stopped");
        });

        Ok(ResponderHandle {
            subject,
            shutdown: Some(shutdown_tx),
            task,
        })
    }
}

struct ExportJob<B, S> {
    bus: B,
    source: Arc<S>,
    options: ResponderOptions,
    control: String,
    data: String,
}

impl<B, S> ExportJob<B, S>
where
    B: MessageBus + Sync,
    S: ExportSource + Send + Sync,
{
    #[instrument(name = "export_job", skip(self, message), fields(data = %self.data))]
    async fn run(self, message: BusMessage) -> Result<(), BusError> {
        let Some(reply) = message.reply.clone() else {
            warn!(subject = %message.subject, "export request without reply subject");
            return Ok(());
        };

        let request = match serde_json::from_slice::<ExportRequest>(&message.payload) {
            Ok(request) => request,
            Err(e) => {
                let rejection = ExportNegotiationResult::rejected(format!("invalid request payload: {e}"));
                return self.reply(&reply, rejection.to_reply()).await;
            }
        };

        let rendered = match render_csv(self.source.as_ref(), &request).await {
            Ok(rendered) => rendered,
            Err(err) => {
                let rejection = ExportNegotiationResult::rejected(rejection_reason(err));
                return self.reply(&reply, rejection.to_reply()).await;
            }
        };

        let size = self.options.announced_size(rendered.body.len() as u64);

        // control must be live before the client can send start
        let mut control = self.bus.subscribe(&self.control).await?;

        let mut accepted = ExportNegotiationResult::accepted(&self.control, &self.data);
        accepted.expected_size_bytes = Some(size);
        accepted.content_type = Some(rendered.content_type.clone());
        accepted.missing_channel_ids = rendered.missing_channel_ids.iter().copied().collect();
        self.reply(&reply, accepted.to_reply()).await?;

        let start = match tokio::time::timeout(self.options.start_timeout, control.next()).await {
            Ok(Some(start)) => start,
            Ok(None) => return Ok(()),
            Err(_) => {
                warn!(control = %self.control, "start handshake never arrived");
                return Ok(());
            }
        };
        drop(control);

        let command: Option<ControlCommand> = serde_json::from_slice(&start.payload).ok();
        let ack_to = start.reply.clone().unwrap_or_default();
        if !command.as_ref().is_some_and(ControlCommand::is_start) {
            return self
                .reply(&ack_to, ControlAck::error("expected start command").to_bytes())
                .await;
        }
        self.reply(&ack_to, ControlAck::ok().to_bytes()).await?;

        self.send(TransferFrame::Meta(MetaFrame {
            file_name: Some(rendered.file_name.clone()),
            content_type: Some(rendered.content_type.clone()),
            size: None,
        }))
        .await?;

        let mut sent = 0usize;
        for (idx, chunk) in protocol::chunks(&rendered.body, self.options.chunk_size).enumerate() {
            match self.options.fault_at(idx) {
                Some(Fault::Fail(message)) => {
                    return self.send(TransferFrame::Error { message }).await;
                }
                Some(Fault::Stall) => {
                    debug!(chunks = idx, "stalling export");
                    return Ok(());
                }
                None => {}
            }
            sent += chunk.len();
            self.send(TransferFrame::Chunk(chunk)).await?;
        }

        self.send(TransferFrame::Summary(SummaryFrame {
            bytes_sent: Some(self.options.announced_size(sent as u64)),
            missing_channels: rendered.missing_channel_ids,
        }))
        .await?;
        self.send(TransferFrame::Complete).await?;

        info!(bytes = sent, file = %rendered.file_name, "export published");
        Ok(())
    }

    async fn reply(&self, subject: &str, payload: bytes::Bytes) -> Result<(), BusError> {
        self.bus.publish(BusMessage::new(subject, payload)).await
    }

    async fn send(&self, frame: TransferFrame) -> Result<(), BusError> {
        let message =
            BusMessage::new(self.data.as_str(), frame.body()).with_header(EVENT_HEADER, frame.event());
        self.bus.publish(message).await
    }
}

/// Reason text sent back to the client, without our own error prefix
pub(crate) fn rejection_reason(err: TransferError) -> String {
    match err {
        TransferError::InvalidRequest { message } | TransferError::RemoteError { message } => message,
        other => other.to_string(),
    }
}
