//! # Integration Tests
//!
//! End-to-end flows across the workspace crates, all on the in-process bus:
//! - config → live subscription → decode → sample clock
//! - bus export negotiation and streaming through the connection registry
//! - socket export against the bundled server

#[cfg(test)]
mod contract_tests {
    #[test]
    fn test_contracts_compile() {
        let _ = contracts::ConfigVersion::V1;
    }
}

#[cfg(test)]
mod live_tests {
    use std::time::Duration;

    use bus::InMemoryBus;
    use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{BusMessage, MessageBus, ScanFrame, TimestampSource};
    use frame_codec::{encode, FrameDecoder};
    use observability::ClockMetricsAggregator;
    use sample_clock::ChannelClocks;

    const CONFIG: &str = r#"
[bus]
endpoint = "memory://it"

[[channels]]
id = 1
subject = "rig.data.ch01"
sampling_rate_hz = 1000.0
calibration = { id = "cal-1", type = "linear", a = 2.0, b = 1.0 }

[[channels]]
id = 2
subject = "rig.data.ch02"
sampling_rate_hz = 100.0
"#;

    fn stamp(at: DateTime<Utc>) -> String {
        at.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    /// Config → bus → decode → clock for two channels, three batches each
    #[tokio::test]
    async fn test_e2e_live_feed() {
        let config = ConfigLoader::load_from_str(CONFIG, ConfigFormat::Toml).unwrap();
        let bus = InMemoryBus::new(config.bus.endpoint.clone());

        let mut clocks = ChannelClocks::new(config.clock);
        let mut subscriptions = Vec::new();
        for channel in &config.channels {
            clocks.register(channel.id, channel.sampling_rate_hz);
            subscriptions.push((
                channel.id,
                FrameDecoder::new(channel.subject.clone()),
                bus.subscribe(&channel.subject).await.unwrap(),
            ));
        }

        // producer stamps the last sample of each 10-sample batch
        let base = Utc::now() - TimeDelta::seconds(1);
        for batch in 0..3i64 {
            for channel in &config.channels {
                let interval_ms = 1000.0 / channel.sampling_rate_hz;
                let last = base
                    + TimeDelta::microseconds(((batch * 10 + 9) as f64 * interval_ms * 1000.0) as i64);
                let values = (0..10).map(|i| (batch * 10 + i) as f64).collect();
                let frame = ScanFrame::new(stamp(last), values);
                bus.publish(BusMessage::new(channel.subject.clone(), encode(&frame)))
                    .await
                    .unwrap();
            }
        }

        let mut aggregator = ClockMetricsAggregator::new();
        for (channel_id, decoder, subscription) in &mut subscriptions {
            let mut timestamps = Vec::new();
            for _ in 0..3 {
                let message = tokio::time::timeout(Duration::from_secs(1), subscription.next())
                    .await
                    .unwrap()
                    .unwrap();
                let frame = decoder.decode(&message.payload).unwrap();
                let samples = clocks.push(*channel_id, &frame).unwrap();
                let outcome = clocks.get(*channel_id).unwrap().last_outcome().unwrap();
                aggregator.update(*channel_id, &outcome, samples.len());
                timestamps.extend(samples.iter().map(|s| s.timestamp_ms));
            }

            assert_eq!(timestamps.len(), 30);
            assert!(
                timestamps.windows(2).all(|w| w[1] > w[0]),
                "channel {channel_id} timestamps must increase"
            );
            let interval = 1000.0 / config.channel(*channel_id).unwrap().sampling_rate_hz;
            let span = timestamps[29] - timestamps[0];
            assert!((span - 29.0 * interval).abs() < 0.01, "span {span}");
        }

        let summary = aggregator.summary();
        assert_eq!(summary.total_frames, 6);
        assert_eq!(summary.producer_batches, 2);
        assert_eq!(summary.producer_batches + summary.snapped_batches + summary.continuity_batches, 6);

        let calibration = config.channel(1).unwrap().calibration.clone().unwrap();
        assert_eq!(calibration.apply(3.0), 7.0);
    }

    /// A corrupt payload is dropped without disturbing the channel clock
    #[tokio::test]
    async fn test_corrupt_frame_is_skipped() {
        let config = ConfigLoader::load_from_str(CONFIG, ConfigFormat::Toml).unwrap();
        let mut clocks = ChannelClocks::new(config.clock);
        clocks.register(2, 100.0);
        let decoder = FrameDecoder::new("rig.data.ch02");

        let now = Utc::now();
        let first = ScanFrame::new(stamp(now), vec![0.0; 4]);
        let samples = clocks.push(2, &decoder.decode(&encode(&first)).unwrap()).unwrap();
        let last = samples[3].timestamp_ms;

        assert!(decoder.decode(b"\x01\x02").is_err());
        assert_eq!(decoder.metrics().snapshot().failures(), 1);

        let second = ScanFrame::new(stamp(now + TimeDelta::milliseconds(40)), vec![0.0; 4]);
        let samples = clocks.push(2, &decoder.decode(&encode(&second)).unwrap()).unwrap();
        assert!((samples[0].timestamp_ms - (last + 10.0)).abs() < 0.01);
        assert_ne!(
            clocks.get(2).unwrap().last_outcome().unwrap().source,
            TimestampSource::LocalFallback
        );
    }
}

#[cfg(test)]
mod export_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bulk_transfer::{
        render_csv, serve_ws_listener, BulkTransferSession, ExportResponder, NoopObserver,
        ResponderOptions, SessionOptions, SyntheticSource, TransferMetrics, WsExportClient,
    };
    use bus::{ConnectionRegistry, InMemoryBus};
    use contracts::{
        CalibrationFormula, CalibrationSpec, ExportRequest, Identity, TelemetryConfig,
        TransferError, TransferState,
    };
    use tokio::net::TcpListener;

    fn request() -> ExportRequest {
        ExportRequest::new(9, [1, 2, 5], "2024-05-01T12:00:00Z", "2024-05-01T12:00:30Z")
            .unwrap()
            .with_filename("rig.csv")
    }

    fn source() -> SyntheticSource {
        SyntheticSource::new(20.0)
            .with_calibration(
                1,
                CalibrationSpec {
                    id: Some("cal-1".into()),
                    formula: CalibrationFormula::Linear { a: 0.5, b: 0.0 },
                },
            )
            .with_missing(5)
    }

    /// Registry → lease → session against a responder on the same bus
    #[tokio::test]
    async fn test_e2e_bus_export() {
        let config = TelemetryConfig::default();
        let registry = ConnectionRegistry::<InMemoryBus>::new();
        let identity = Identity::new("exporter-it");
        let handle = registry
            .get_or_create(&identity, || async { Ok(InMemoryBus::new("memory://export-it")) })
            .await
            .unwrap();
        let bus = handle.connection().unwrap().clone();

        let source = Arc::new(source());
        let options = ResponderOptions {
            chunk_size: 4096,
            ..ResponderOptions::default()
        };
        let responder = ExportResponder::spawn(bus.clone(), config.export.subject.clone(), source.clone(), options)
            .await
            .unwrap();

        let metrics = Arc::new(TransferMetrics::default());
        let lease = handle.lease().unwrap();
        assert_eq!(handle.open_sessions(), 1);

        let mut session = BulkTransferSession::new(
            handle.clone(),
            SessionOptions::from_config(&config.bus, &config.export)
                .with_request_timeout(Duration::from_secs(2)),
        )
        .with_metrics(metrics.clone());
        let payload = session.export(&request(), &mut NoopObserver).await.unwrap();
        drop(lease);

        let expected = render_csv(source.as_ref(), &request()).await.unwrap();
        assert_eq!(payload.bytes, expected.body);
        assert_eq!(payload.file_name, "rig.csv");
        assert_eq!(payload.missing_channel_ids, vec![5]);
        assert_eq!(session.state(), TransferState::Completed);
        assert!(payload.size > 4096, "payload should span several chunks");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.bytes_received, payload.size);
        assert_eq!(handle.open_sessions(), 0);

        responder.shutdown().await;
        registry.close_all().await;
        assert!(bus.is_closed());
        assert!(!registry.contains(&identity));
    }

    /// Two sessions share one registered connection
    #[tokio::test]
    async fn test_sessions_share_connection() {
        let registry = ConnectionRegistry::<InMemoryBus>::new();
        let identity = Identity::new("shared");
        let first = registry
            .get_or_create(&identity, || async { Ok(InMemoryBus::new("memory://shared")) })
            .await
            .unwrap();
        let second = registry
            .get_or_create(&identity, || async {
                Err(TransferError::NotConnected {
                    identity: "should not connect twice".into(),
                })
            })
            .await
            .unwrap();
        assert!(first.ptr_eq(&second));

        let bus = first.connection().unwrap().clone();
        let _responder = ExportResponder::spawn(
            bus.clone(),
            "export.request",
            Arc::new(source()),
            ResponderOptions::default(),
        )
        .await
        .unwrap();

        let options = SessionOptions::default().with_request_timeout(Duration::from_secs(2));
        let (a, b) = tokio::join!(
            async {
                BulkTransferSession::new(second.clone(), options.clone())
                    .export(&request(), &mut NoopObserver)
                    .await
            },
            async {
                BulkTransferSession::new(second.clone(), options.clone())
                    .export(&request(), &mut NoopObserver)
                    .await
            }
        );
        assert_eq!(a.unwrap().bytes, b.unwrap().bytes);
    }

    /// Same export over the socket transport
    #[tokio::test]
    async fn test_e2e_socket_export() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/export", listener.local_addr().unwrap());
        let source = Arc::new(source());
        tokio::spawn(serve_ws_listener(listener, source.clone(), ResponderOptions::default()));

        let payload = WsExportClient::new(url)
            .with_idle_timeout(Some(Duration::from_secs(5)))
            .export(&request(), &mut NoopObserver)
            .await
            .unwrap();

        let expected = render_csv(source.as_ref(), &request()).await.unwrap();
        assert_eq!(payload.bytes, expected.body);
        assert_eq!(payload.missing_channel_ids, vec![5]);
        let header = std::str::from_utf8(&payload.bytes[..60]).unwrap();
        assert!(header.starts_with("timestamp,channel,raw_value,calibrated_value,calibration_id"));
    }
}
