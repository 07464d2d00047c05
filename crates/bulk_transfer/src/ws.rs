//! Socket-framed export client
//!
//! One WebSocket carries the request (text), JSON control frames (text) and
//! chunks (binary). Same frame vocabulary as the bus variant.

use std::time::Duration;

use contracts::{ExportConfig, ExportPayload, ExportRequest, TransferError, TransferFrame};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, warn};

use crate::assembler::{AssemblyStep, TransferAssembler};
use crate::observer::TransferObserver;

#[derive(Debug, Clone)]
pub struct WsExportClient {
    url: String,
    connect_timeout: Duration,
    idle_timeout: Option<Duration>,
}

impl WsExportClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(120)),
        }
    }

    pub fn from_config(config: &ExportConfig) -> Self {
        Self::new(config.websocket_url.clone()).with_idle_timeout(config.stream_idle_timeout())
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run one export over a fresh socket
    ///
    /// # Errors
    /// - `NegotiationTransport` / `NegotiationTimeout` naming the URL when the
    ///   socket cannot be opened
    /// - `RemoteError` on an error frame or a 1011 close
    /// - `ChannelClosed` when the socket ends before `complete`
    /// - `StreamTimeout`, `SizeMismatch`, `MalformedFrame` as for the bus variant
    #[instrument(name = "ws_export", skip(self, request, observer), fields(url = %self.url))]
    pub async fn export(
        &self,
        request: &ExportRequest,
        observer: &mut dyn TransferObserver,
    ) -> Result<ExportPayload, TransferError> {
        request.validate()?;
        let body = serde_json::to_string(request)
            .map_err(|e| TransferError::invalid_request(format!("cannot encode request: {e}")))?;

        let (socket, _) = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| TransferError::NegotiationTimeout {
                endpoint: self.url.clone(),
                timeout_ms: self.connect_timeout.as_millis() as u64,
            })?
            .map_err(|e| TransferError::NegotiationTransport {
                endpoint: self.url.clone(),
                message: e.to_string(),
            })?;
        debug!("socket connected");

        let (mut write, mut read) = socket.split();
        write
            .send(Message::Text(body.into()))
            .await
            .map_err(|e| TransferError::NegotiationTransport {
                endpoint: self.url.clone(),
                message: e.to_string(),
            })?;

        let mut assembler = TransferAssembler::new()
            .with_content_type(request.format.content_type());
        if let Some(name) = &request.requested_filename {
            assembler = assembler.with_file_name(name.clone());
        }

        let outcome = loop {
            let message = match self.idle_timeout {
                Some(idle) => match tokio::time::timeout(idle, read.next()).await {
                    Ok(message) => message,
                    Err(_) => {
                        break Err(TransferError::StreamTimeout {
                            idle_ms: idle.as_millis() as u64,
                        })
                    }
                },
                None => read.next().await,
            };

            let frame = match message {
                Some(Ok(Message::Text(text))) => match TransferFrame::from_json_text(&text) {
                    Ok(frame) => frame,
                    Err(err) => break Err(err),
                },
                Some(Ok(Message::Binary(bytes))) => TransferFrame::Chunk(bytes),
                Some(Ok(Message::Close(frame))) => break Err(self.closed_early(frame)),
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    warn!(error = %err, "socket read failed");
                    break Err(self.channel_closed());
                }
                None => break Err(self.channel_closed()),
            };

            match assembler.push(frame) {
                Ok(AssemblyStep::Meta(meta)) => observer.on_meta(&meta),
                Ok(AssemblyStep::Progress(total)) => observer.on_progress(total),
                Ok(AssemblyStep::Summary(missing)) => observer.on_summary(&missing),
                Ok(AssemblyStep::Ignored) => {}
                Ok(AssemblyStep::Complete(payload)) => break Ok(payload),
                Err(err) => break Err(err),
            }
        };

        let close = match &outcome {
            Ok(_) => CloseFrame {
                code: CloseCode::Normal,
                reason: "complete".into(),
            },
            Err(_) => CloseFrame {
                code: CloseCode::Error,
                reason: "export failed".into(),
            },
        };
        // peer may already be gone
        let _ = write.send(Message::Close(Some(close))).await;

        match &outcome {
            Ok(payload) => info!(bytes = payload.size, file = %payload.file_name, "socket export completed"),
            Err(err) => warn!(error = %err, kind = err.label(), "socket export failed"),
        }
        outcome
    }

    fn channel_closed(&self) -> TransferError {
        TransferError::ChannelClosed {
            channel: self.url.clone(),
        }
    }

    fn closed_early(&self, frame: Option<CloseFrame>) -> TransferError {
        match frame {
            Some(frame) if frame.code == CloseCode::Error => TransferError::RemoteError {
                message: if frame.reason.is_empty() {
                    "server closed with internal error".to_string()
                } else {
                    frame.reason.as_str().to_string()
                },
            },
            _ => self.channel_closed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NoopObserver;
    use crate::responder::{Faults, ResponderOptions};
    use crate::source::{render_csv, SyntheticSource};
    use crate::ws_server::serve_ws_listener;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn request() -> ExportRequest {
        ExportRequest::new(3, [1, 4], "2024-01-01T00:00:00Z", "2024-01-01T00:00:03Z")
            .unwrap()
            .with_filename("run.csv")
    }

    async fn bind() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/export", listener.local_addr().unwrap());
        (listener, url)
    }

    #[tokio::test]
    async fn test_socket_happy_path() {
        let (listener, url) = bind().await;
        let source = Arc::new(SyntheticSource::new(200.0).with_missing(4));
        let options = ResponderOptions {
            chunk_size: 1024,
            ..ResponderOptions::default()
        };
        tokio::spawn(serve_ws_listener(listener, source.clone(), options));

        #[derive(Default)]
        struct Seen {
            meta: bool,
            progress: u64,
        }
        impl TransferObserver for Seen {
            fn on_meta(&mut self, _meta: &contracts::MetaFrame) {
                self.meta = true;
            }
            fn on_progress(&mut self, received_bytes: u64) {
                self.progress = received_bytes;
            }
        }

        let mut seen = Seen::default();
        let payload = WsExportClient::new(url).export(&request(), &mut seen).await.unwrap();

        let expected = render_csv(source.as_ref(), &request()).await.unwrap();
        assert_eq!(payload.bytes, expected.body);
        assert_eq!(payload.file_name, "run.csv");
        assert_eq!(payload.content_type, "text/csv");
        assert_eq!(payload.missing_channel_ids, vec![4]);
        assert!(seen.meta);
        assert_eq!(seen.progress, payload.size);
    }

    #[tokio::test]
    async fn test_unexpected_close_is_channel_closed() {
        let (listener, url) = bind().await;
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _request = ws.next().await;
            ws.send(Message::Binary(bytes::Bytes::from_static(b"partial")))
                .await
                .unwrap();
            let _ = ws
                .send(Message::Close(Some(CloseFrame {
                    code: CloseCode::Away,
                    reason: "".into(),
                })))
                .await;
        });

        let err = WsExportClient::new(url.clone())
            .export(&request(), &mut NoopObserver)
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::ChannelClosed { channel: url });
    }

    #[tokio::test]
    async fn test_remote_error_frame() {
        let (listener, url) = bind().await;
        let options = ResponderOptions {
            chunk_size: 128,
            faults: Faults {
                fail_after_chunks: Some((1, "disk full".into())),
                ..Faults::default()
            },
            ..ResponderOptions::default()
        };
        tokio::spawn(serve_ws_listener(listener, Arc::new(SyntheticSource::new(50.0)), options));

        let err = WsExportClient::new(url)
            .export(&request(), &mut NoopObserver)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransferError::RemoteError {
                message: "disk full".into()
            }
        );
    }

    #[tokio::test]
    async fn test_connect_failure_names_url() {
        let (listener, url) = bind().await;
        drop(listener);

        let err = WsExportClient::new(url.clone())
            .export(&request(), &mut NoopObserver)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::NegotiationTransport { ref endpoint, .. } if *endpoint == url
        ));
    }
}
