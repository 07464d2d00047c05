//! BulkTransferSession - request → negotiate → stream over a `MessageBus`

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use contracts::{
    BusConfig, ExportConfig, ExportNegotiationResult, ExportPayload, ExportRequest, MessageBus,
    Subscription, TransferError, TransferFrame, TransferState,
};
use tracing::{debug, info, instrument, warn};

use crate::assembler::{AssemblyStep, TransferAssembler};
use crate::metrics::TransferMetrics;
use crate::observer::TransferObserver;
use crate::protocol::{ControlAck, ControlCommand};

/// Session timeouts and subject
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Negotiation subject
    pub subject: String,
    /// Applies to negotiation and to the start handshake
    pub request_timeout: Duration,
    /// Longest silence tolerated while streaming; `None` waits forever
    pub stream_idle_timeout: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            subject: "export.request".to_string(),
            request_timeout: Duration::from_secs(60),
            stream_idle_timeout: Some(Duration::from_secs(120)),
        }
    }
}

impl SessionOptions {
    pub fn from_config(bus: &BusConfig, export: &ExportConfig) -> Self {
        Self {
            subject: export.subject.clone(),
            request_timeout: bus.request_timeout(),
            stream_idle_timeout: export.stream_idle_timeout(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_stream_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stream_idle_timeout = timeout;
        self
    }
}

/// One export over the bus
///
/// A session runs once: after `Completed` or `Failed` every call is rejected
/// with `InvalidState`.
pub struct BulkTransferSession<B> {
    bus: B,
    options: SessionOptions,
    state: TransferState,
    metrics: Option<Arc<TransferMetrics>>,
    received_bytes: u64,
    negotiation_latency: Option<Duration>,
    file_name: Option<String>,
}

impl<B: MessageBus + Sync> BulkTransferSession<B> {
    pub fn new(bus: B, options: SessionOptions) -> Self {
        Self {
            bus,
            options,
            state: TransferState::Idle,
            metrics: None,
            received_bytes: 0,
            negotiation_latency: None,
            file_name: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<TransferMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    pub fn negotiation_latency(&self) -> Option<Duration> {
        self.negotiation_latency
    }

    /// Negotiate an export
    ///
    /// # Errors
    /// - `NegotiationTimeout` / `NegotiationTransport` naming the bus endpoint
    /// - `Rejected` with the responder's reason verbatim
    /// - `MalformedFrame` when an accepted reply lacks a channel
    #[instrument(
        name = "transfer_request",
        skip(self, request),
        fields(endpoint = %self.bus.endpoint(), asset = request.asset_id)
    )]
    pub async fn request(
        &mut self,
        request: &ExportRequest,
    ) -> Result<ExportNegotiationResult, TransferError> {
        self.expect_state("request", TransferState::Idle)?;
        self.state = TransferState::Negotiating;

        let outcome = self.negotiate(request).await;
        if let Err(err) = &outcome {
            self.fail(err);
        }
        outcome
    }

    async fn negotiate(
        &mut self,
        request: &ExportRequest,
    ) -> Result<ExportNegotiationResult, TransferError> {
        request.validate()?;
        let payload = serde_json::to_vec(request)
            .map_err(|e| TransferError::invalid_request(format!("cannot encode request: {e}")))?;

        let started = Instant::now();
        let reply = self
            .bus
            .request(&self.options.subject, Bytes::from(payload), self.options.request_timeout)
            .await
            .map_err(|e| TransferError::from_negotiation(e, self.bus.endpoint()))?;
        let latency = started.elapsed();
        self.negotiation_latency = Some(latency);

        let negotiation = ExportNegotiationResult::from_reply(&reply)?;
        let (control, data) = negotiation.channels()?;
        self.file_name = Some(request.file_name());
        debug!(
            control = %control,
            data = %data,
            expected = ?negotiation.expected_size_bytes,
            latency_ms = latency.as_millis() as u64,
            "export negotiated"
        );
        Ok(negotiation)
    }

    /// Stream an accepted export
    ///
    /// Subscribes to the data channel before sending `start`. The subscription
    /// is released on every exit path, including when this future is dropped.
    #[instrument(name = "transfer_stream", skip_all, fields(data = negotiation.data_channel.as_deref().unwrap_or("")))]
    pub async fn stream(
        &mut self,
        negotiation: &ExportNegotiationResult,
        observer: &mut dyn TransferObserver,
    ) -> Result<ExportPayload, TransferError> {
        self.expect_state("stream", TransferState::Negotiating)?;
        self.state = TransferState::Streaming;

        let outcome = self.receive(negotiation, observer).await;
        match &outcome {
            Ok(payload) => {
                self.state = TransferState::Completed;
                if let Some(metrics) = &self.metrics {
                    metrics.record_completed();
                }
                info!(
                    bytes = payload.size,
                    file = %payload.file_name,
                    missing = ?payload.missing_channel_ids,
                    "export completed"
                );
            }
            Err(err) => self.fail(err),
        }
        outcome
    }

    /// `request` followed by `stream`
    pub async fn export(
        &mut self,
        request: &ExportRequest,
        observer: &mut dyn TransferObserver,
    ) -> Result<ExportPayload, TransferError> {
        let negotiation = self.request(request).await?;
        self.stream(&negotiation, observer).await
    }

    async fn receive(
        &mut self,
        negotiation: &ExportNegotiationResult,
        observer: &mut dyn TransferObserver,
    ) -> Result<ExportPayload, TransferError> {
        let (control, data) = negotiation.channels()?;
        let endpoint = self.bus.endpoint().to_string();

        let mut subscription = self
            .bus
            .subscribe(data)
            .await
            .map_err(|e| TransferError::from_negotiation(e, &endpoint))?;

        let ack = self
            .bus
            .request(control, ControlCommand::start().to_bytes(), self.options.request_timeout)
            .await
            .map_err(|e| TransferError::from_negotiation(e, &endpoint))?;
        ControlAck::check(&ack)?;

        let mut assembler = TransferAssembler::new()
            .with_expected_size(negotiation.expected_size_bytes)
            .with_missing(negotiation.missing_channel_ids.iter().copied());
        if let Some(content_type) = &negotiation.content_type {
            assembler = assembler.with_content_type(content_type.clone());
        }
        if let Some(file_name) = &self.file_name {
            assembler = assembler.with_file_name(file_name.clone());
        }

        loop {
            let frame = self.next_frame(&mut subscription, data).await?;
            let chunk_len = match &frame {
                TransferFrame::Chunk(bytes) => Some(bytes.len()),
                _ => None,
            };

            match assembler.push(frame)? {
                AssemblyStep::Meta(meta) => {
                    debug!(?meta, "export meta");
                    observer.on_meta(&meta);
                }
                AssemblyStep::Progress(total) => {
                    self.received_bytes = total;
                    if let (Some(metrics), Some(len)) = (&self.metrics, chunk_len) {
                        metrics.record_chunk(len);
                    }
                    observer.on_progress(total);
                }
                AssemblyStep::Summary(missing) => observer.on_summary(&missing),
                AssemblyStep::Ignored => {}
                AssemblyStep::Complete(payload) => {
                    subscription.unsubscribe();
                    return Ok(payload);
                }
            }
        }
    }

    async fn next_frame(
        &self,
        subscription: &mut Subscription,
        data: &str,
    ) -> Result<TransferFrame, TransferError> {
        let next = match self.options.stream_idle_timeout {
            Some(idle) => tokio::time::timeout(idle, subscription.next())
                .await
                .map_err(|_| TransferError::StreamTimeout {
                    idle_ms: idle.as_millis() as u64,
                })?,
            None => subscription.next().await,
        };

        let message = next.ok_or_else(|| TransferError::ChannelClosed {
            channel: data.to_string(),
        })?;
        TransferFrame::from_event(message.event(), message.payload.clone())
    }

    fn expect_state(
        &self,
        operation: &'static str,
        expected: TransferState,
    ) -> Result<(), TransferError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(TransferError::InvalidState {
                operation,
                state: self.state.to_string(),
            })
        }
    }

    fn fail(&mut self, err: &TransferError) {
        self.state = TransferState::Failed;
        if let Some(metrics) = &self.metrics {
            metrics.record_failed(err);
        }
        warn!(error = %err, kind = err.label(), "export failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NoopObserver;
    use crate::responder::{ExportResponder, Faults, ResponderOptions};
    use crate::source::SyntheticSource;
    use bus::{ConnectionRegistry, InMemoryBus};
    use contracts::{BusMessage, Identity, MetaFrame, SummaryFrame, EVENT_HEADER};

    const SUBJECT: &str = "export.request";

    fn request() -> ExportRequest {
        ExportRequest::new(1, [1, 2], "2024-01-01T00:00:00Z", "2024-01-01T00:00:02Z").unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        meta: Option<MetaFrame>,
        progress: Vec<u64>,
        missing: Vec<u32>,
    }

    impl TransferObserver for Recorder {
        fn on_meta(&mut self, meta: &MetaFrame) {
            self.meta = Some(meta.clone());
        }

        fn on_progress(&mut self, received_bytes: u64) {
            self.progress.push(received_bytes);
        }

        fn on_summary(&mut self, missing_channel_ids: &[u32]) {
            self.missing = missing_channel_ids.to_vec();
        }
    }

    /// Accept every request and publish `frames` on start
    async fn scripted_responder(bus: InMemoryBus, frames: Vec<TransferFrame>) {
        let mut requests = bus.subscribe(SUBJECT).await.unwrap();
        let mut control = bus.subscribe("x.ctl").await.unwrap();
        tokio::spawn(async move {
            let req = requests.next().await.unwrap();
            bus.publish(BusMessage::new(
                req.reply.unwrap(),
                ExportNegotiationResult::accepted("x.ctl", "x.data").to_reply(),
            ))
            .await
            .unwrap();

            let start = control.next().await.unwrap();
            bus.publish(BusMessage::new(start.reply.unwrap(), ControlAck::ok().to_bytes()))
                .await
                .unwrap();

            for frame in frames {
                let msg = BusMessage::new("x.data", frame.body()).with_header(EVENT_HEADER, frame.event());
                bus.publish(msg).await.unwrap();
            }
        });
    }

    #[tokio::test]
    async fn test_scripted_happy_path() {
        let bus = InMemoryBus::default();
        scripted_responder(
            bus.clone(),
            vec![
                TransferFrame::Meta(MetaFrame {
                    file_name: Some("run.csv".into()),
                    content_type: Some("text/csv".into()),
                    size: None,
                }),
                TransferFrame::Chunk(Bytes::from_static(b"hello ")),
                TransferFrame::Chunk(Bytes::from_static(b"world")),
                TransferFrame::Summary(SummaryFrame {
                    bytes_sent: Some(11),
                    missing_channels: vec![2],
                }),
                TransferFrame::Complete,
            ],
        )
        .await;

        let metrics = Arc::new(TransferMetrics::new());
        let mut session =
            BulkTransferSession::new(bus.clone(), SessionOptions::default()).with_metrics(metrics.clone());
        let mut recorder = Recorder::default();
        let payload = session.export(&request(), &mut recorder).await.unwrap();

        assert_eq!(payload.bytes, Bytes::from_static(b"hello world"));
        assert_eq!(payload.file_name, "run.csv");
        assert_eq!(payload.missing_channel_ids, vec![2]);
        let meta = recorder.meta.expect("meta forwarded to observer");
        assert_eq!(meta.file_name.as_deref(), Some("run.csv"));
        assert_eq!(meta.content_type.as_deref(), Some("text/csv"));
        assert_eq!(recorder.progress, vec![6, 11]);
        assert_eq!(recorder.missing, vec![2]);
        assert_eq!(session.state(), TransferState::Completed);
        assert_eq!(bus.subscriber_count("x.data"), 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.bytes_received, 11);
        assert_eq!(snapshot.chunks_received, 2);
    }

    #[tokio::test]
    async fn test_remote_error_releases_subscription() {
        let bus = InMemoryBus::default();
        scripted_responder(
            bus.clone(),
            vec![
                TransferFrame::Chunk(Bytes::from_static(b"a")),
                TransferFrame::Error {
                    message: "x".into(),
                },
            ],
        )
        .await;

        let mut session = BulkTransferSession::new(bus.clone(), SessionOptions::default());
        let err = session.export(&request(), &mut NoopObserver).await.unwrap_err();

        assert_eq!(err, TransferError::RemoteError { message: "x".into() });
        assert_eq!(session.state(), TransferState::Failed);
        assert_eq!(bus.subscriber_count("x.data"), 0);
    }

    #[tokio::test]
    async fn test_negotiation_timeout_names_endpoint() {
        let bus = InMemoryBus::new("nats://bus:4222");
        // subscribed but silent
        let _silent = bus.subscribe(SUBJECT).await.unwrap();

        let options = SessionOptions::default().with_request_timeout(Duration::from_millis(50));
        let mut session = BulkTransferSession::new(bus, options);
        let err = session.request(&request()).await.unwrap_err();

        assert_eq!(
            err,
            TransferError::NegotiationTimeout {
                endpoint: "nats://bus:4222".into(),
                timeout_ms: 50
            }
        );
        assert_eq!(session.state(), TransferState::Failed);
        assert!(matches!(
            session.request(&request()).await,
            Err(TransferError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_registry_close_fails_session_with_not_connected() {
        let registry = ConnectionRegistry::new();
        let id = Identity::new("bench-7");
        let handle = registry
            .get_or_create(&id, || async { Ok(InMemoryBus::new("memory://bench")) })
            .await
            .unwrap();
        let bus = handle.connection().unwrap().clone();
        let _responder = ExportResponder::spawn(
            bus,
            SUBJECT,
            Arc::new(SyntheticSource::new(10.0)),
            ResponderOptions::default(),
        )
        .await
        .unwrap();

        let mut session = BulkTransferSession::new(handle.clone(), SessionOptions::default());
        registry.close(&id).await;

        let err = session.request(&request()).await.unwrap_err();
        assert_eq!(err, TransferError::not_connected("bench-7"));
        assert_eq!(session.state(), TransferState::Failed);
    }

    #[tokio::test]
    async fn test_session_through_live_handle_completes() {
        let registry = ConnectionRegistry::new();
        let id = Identity::new("bench-8");
        let handle = registry
            .get_or_create(&id, || async { Ok(InMemoryBus::new("memory://bench")) })
            .await
            .unwrap();
        let _responder = ExportResponder::spawn(
            handle.clone(),
            SUBJECT,
            Arc::new(SyntheticSource::new(10.0)),
            ResponderOptions::default(),
        )
        .await
        .unwrap();

        let mut session = BulkTransferSession::new(handle.clone(), SessionOptions::default());
        let payload = session.export(&request(), &mut NoopObserver).await.unwrap();
        assert_eq!(payload.size, payload.bytes.len() as u64);
        assert_eq!(handle.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_no_responder_is_transport_error() {
        let bus = InMemoryBus::default();
        let mut session = BulkTransferSession::new(bus, SessionOptions::default());
        assert!(matches!(
            session.request(&request()).await,
            Err(TransferError::NegotiationTransport { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejection_reason_is_verbatim() {
        let bus = InMemoryBus::default();
        let source = Arc::new(SyntheticSource::new(10.0).with_failure(1, "parquet unreadable"));
        let responder = ExportResponder::spawn(bus.clone(), SUBJECT, source, ResponderOptions::default())
            .await
            .unwrap();

        let mut session = BulkTransferSession::new(bus, SessionOptions::default());
        let err = session.request(&request()).await.unwrap_err();
        assert_eq!(
            err,
            TransferError::Rejected {
                reason: "channel 01: parquet unreadable".into()
            }
        );
        responder.shutdown().await;
    }

    #[tokio::test]
    async fn test_responder_round_trip_in_chunks() {
        let bus = InMemoryBus::default();
        let source = Arc::new(SyntheticSource::new(100.0).with_missing(2));
        let options = ResponderOptions {
            chunk_size: 256,
            ..ResponderOptions::default()
        };
        let _responder = ExportResponder::spawn(bus.clone(), SUBJECT, source.clone(), options)
            .await
            .unwrap();

        let mut session = BulkTransferSession::new(bus.clone(), SessionOptions::default());
        let mut recorder = Recorder::default();
        let payload = session.export(&request(), &mut recorder).await.unwrap();

        let expected = crate::source::render_csv(source.as_ref(), &request()).await.unwrap();
        assert_eq!(payload.bytes, expected.body);
        assert_eq!(payload.content_type, "text/csv");
        assert_eq!(payload.file_name, request().file_name());
        assert_eq!(payload.missing_channel_ids, vec![2]);
        assert!(recorder.progress.len() > 1);
        assert!(recorder.progress.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_size_mismatch_fails_session() {
        let bus = InMemoryBus::default();
        let options = ResponderOptions {
            faults: Faults {
                advertised_size: Some(1),
                ..Faults::default()
            },
            ..ResponderOptions::default()
        };
        let _responder =
            ExportResponder::spawn(bus.clone(), SUBJECT, Arc::new(SyntheticSource::new(5.0)), options)
                .await
                .unwrap();

        let mut session = BulkTransferSession::new(bus, SessionOptions::default());
        let err = session.export(&request(), &mut NoopObserver).await.unwrap_err();
        assert!(matches!(err, TransferError::SizeMismatch { expected: 1, .. }));
        assert_eq!(session.state(), TransferState::Failed);
    }

    #[tokio::test]
    async fn test_idle_timeout_when_responder_stalls() {
        let bus = InMemoryBus::default();
        let options = ResponderOptions {
            chunk_size: 64,
            faults: Faults {
                stall_after_chunks: Some(1),
                ..Faults::default()
            },
            ..ResponderOptions::default()
        };
        let _responder =
            ExportResponder::spawn(bus.clone(), SUBJECT, Arc::new(SyntheticSource::new(50.0)), options)
                .await
                .unwrap();

        let options = SessionOptions::default().with_stream_idle_timeout(Some(Duration::from_millis(100)));
        let mut session = BulkTransferSession::new(bus.clone(), options);
        let err = session.export(&request(), &mut NoopObserver).await.unwrap_err();

        assert_eq!(err, TransferError::StreamTimeout { idle_ms: 100 });
        assert_eq!(session.received_bytes(), 64);
        assert_eq!(bus.subscriber_count("export.request.data.1"), 0);
    }

    #[tokio::test]
    async fn test_bus_close_mid_stream_is_channel_closed() {
        let bus = InMemoryBus::default();
        let options = ResponderOptions {
            chunk_size: 64,
            faults: Faults {
                stall_after_chunks: Some(0),
                ..Faults::default()
            },
            ..ResponderOptions::default()
        };
        let _responder =
            ExportResponder::spawn(bus.clone(), SUBJECT, Arc::new(SyntheticSource::new(50.0)), options)
                .await
                .unwrap();

        let closer = bus.clone();
        let mut recorder = Recorder::default();
        let mut session = BulkTransferSession::new(bus, SessionOptions::default());
        let negotiation = session.request(&request()).await.unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            closer.close().await;
        });

        let err = session.stream(&negotiation, &mut recorder).await.unwrap_err();
        assert_eq!(
            err,
            TransferError::ChannelClosed {
                channel: "export.request.data.1".into()
            }
        );
    }
}
