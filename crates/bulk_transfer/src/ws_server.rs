//! Serving side of the socket export protocol

use std::sync::Arc;

use bytes::Bytes;
use contracts::{ExportRequest, MetaFrame, SummaryFrame, TransferFrame};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing::{debug, info, instrument, warn};

use crate::responder::{rejection_reason, Fault, ResponderOptions};
use crate::source::{chunk_channel, stream_csv, ExportSource};

type Socket = WebSocketStream<TcpStream>;

/// Accept sockets forever, one export per connection
pub async fn serve_ws_listener<S>(
    listener: TcpListener,
    source: Arc<S>,
    options: ResponderOptions,
) -> std::io::Result<()>
where
    S: ExportSource + Send + Sync + 'static,
{
    info!(addr = ?listener.local_addr().ok(), "socket exporter listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let source = source.clone();
        let options = options.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_ws_export(stream, source.as_ref(), &options).await {
                warn!(%peer, error = %err, "socket export aborted");
            }
        });
    }
}

/// How the chunk loop ended
enum Streamed {
    Done(u64),
    Failed(String),
    Stalled,
}

/// Serve one export on an accepted TCP stream
///
/// Chunks go out as the CSV is read from the source; the size is only known
/// once the summary frame is sent.
#[instrument(name = "ws_serve", skip_all, fields(peer = ?stream.peer_addr().ok()))]
pub async fn serve_ws_export<S>(
    stream: TcpStream,
    source: &S,
    options: &ResponderOptions,
) -> Result<(), WsError>
where
    S: ExportSource + Sync,
{
    let mut socket = accept_async(stream).await?;

    let Some(first) = socket.next().await else {
        return Ok(());
    };
    let Message::Text(text) = first? else {
        return fail(&mut socket, "expected JSON request".to_string()).await;
    };

    let request: ExportRequest = match serde_json::from_str(&text) {
        Ok(request) => request,
        Err(e) => return fail(&mut socket, format!("invalid request payload: {e}")).await,
    };
    if let Err(err) = request.validate().and_then(|()| request.range().map(|_| ())) {
        return fail(&mut socket, rejection_reason(err)).await;
    }

    let file_name = request.file_name();
    send_frame(
        &mut socket,
        TransferFrame::Meta(MetaFrame {
            file_name: Some(file_name.clone()),
            content_type: Some(request.format.content_type().to_string()),
            size: None,
        }),
    )
    .await?;

    let (tx, rx) = chunk_channel();
    let producer = stream_csv(source, &request, options.chunk_size, tx);
    let consumer = async {
        // owning the receiver here releases a blocked producer once we stop
        let mut rx = rx;
        let mut sent = 0u64;
        let mut idx = 0usize;
        while let Some(chunk) = rx.recv().await {
            match options.fault_at(idx) {
                Some(Fault::Fail(message)) => return Ok(Streamed::Failed(message)),
                Some(Fault::Stall) => {
                    debug!(chunks = idx, "stalling export");
                    drop(rx);
                    // hold the socket open until the client gives up
                    while let Some(Ok(_)) = socket.next().await {}
                    return Ok(Streamed::Stalled);
                }
                None => {}
            }
            sent += chunk.len() as u64;
            send_frame(&mut socket, TransferFrame::Chunk(chunk)).await?;
            idx += 1;
        }
        Ok::<_, WsError>(Streamed::Done(sent))
    };
    let (produced, streamed) = tokio::join!(producer, consumer);

    let sent = match streamed? {
        Streamed::Done(sent) => sent,
        Streamed::Failed(message) => return fail(&mut socket, message).await,
        Streamed::Stalled => return Ok(()),
    };
    let summary = match produced {
        Ok(summary) => summary,
        Err(err) => return fail(&mut socket, rejection_reason(err)).await,
    };

    send_frame(
        &mut socket,
        TransferFrame::Summary(SummaryFrame {
            bytes_sent: Some(options.announced_size(sent)),
            missing_channels: summary.missing_channel_ids,
        }),
    )
    .await?;
    send_frame(&mut socket, TransferFrame::Complete).await?;
    socket.close(None).await.ok();

    info!(bytes = sent, file = %file_name, "socket export sent");
    Ok(())
}

async fn send_frame(socket: &mut Socket, frame: TransferFrame) -> Result<(), WsError> {
    let message = match frame.to_json_text() {
        Some(text) => Message::Text(text.into()),
        None => Message::Binary(match frame {
            TransferFrame::Chunk(bytes) => bytes,
            _ => Bytes::new(),
        }),
    };
    socket.send(message).await
}

/// Send an error frame, then close with 1011
async fn fail(socket: &mut Socket, message: String) -> Result<(), WsError> {
    warn!(reason = %message, "socket export failed");
    send_frame(socket, TransferFrame::Error { message }).await?;
    socket
        .close(Some(CloseFrame {
            code: CloseCode::Error,
            reason: "export failed".into(),
        }))
        .await
        .ok();
    Ok(())
}
