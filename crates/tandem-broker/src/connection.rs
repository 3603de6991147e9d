//! Per-connection lifecycle: one reader task (this function) and one writer
//! task per accepted socket, decoupled by the client's bounded outbox.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tandem_protocol::codec::{FrameCodec, FrameCodecError};
use tandem_protocol::{ClientId, Frame};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::registry::SharedRegistry;
use crate::router;

/// Drive one client connection until EOF, an I/O error, or a frame-size
/// violation, then tear the session down.
pub async fn handle_client(stream: TcpStream, shared: SharedRegistry, config: Arc<BrokerConfig>) {
    let peer = stream.peer_addr().ok();
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, FrameCodec::new(config.max_frame_bytes));
    let writer = FramedWrite::new(write_half, FrameCodec::new(config.max_frame_bytes));

    let (tx, rx) = mpsc::channel::<String>(config.outbox_capacity);
    let id = shared.lock().await.insert(tx);
    info!(client = id, ?peer, "client connected");

    tokio::spawn(drain_outbox(id, rx, writer));

    while let Some(result) = reader.next().await {
        match result {
            Ok(raw) => {
                let msg: Frame = match serde_json::from_slice(&raw) {
                    Ok(msg) => msg,
                    Err(e) => {
                        debug!(client = id, error = %e, "dropping malformed frame");
                        continue;
                    }
                };
                router::route(&shared, id, msg, &config).await;
            }
            Err(FrameCodecError::FrameTooLong(limit)) => {
                warn!(client = id, limit, "frame size limit exceeded, closing");
                let registry = shared.lock().await;
                if let Some(client) = registry.client(id) {
                    if let Ok(line) = Frame::error(router::FRAME_TOO_LARGE).to_line() {
                        client.enqueue(&line);
                    }
                }
                break;
            }
            Err(FrameCodecError::Io(e)) => {
                // EOF and resets are normal disconnects, not broker errors.
                match e.kind() {
                    std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof => {
                        debug!(client = id, "connection closed: {e}")
                    }
                    _ => warn!(client = id, error = %e, "read error"),
                }
                break;
            }
        }
    }

    // Dropping the session's handle closes the outbox; the writer drains
    // whatever is queued (e.g. the oversize error frame) and exits.
    shared.lock().await.remove(id);
    info!(client = id, "client disconnected");
}

/// Writer half: drain the outbox to the socket. Exits when the outbox is
/// closed and empty or the write fails; routing never blocks on this.
async fn drain_outbox(
    id: ClientId,
    mut rx: mpsc::Receiver<String>,
    mut writer: FramedWrite<OwnedWriteHalf, FrameCodec>,
) {
    while let Some(line) = rx.recv().await {
        if let Err(e) = writer.send(line).await {
            debug!(client = id, error = %e, "write failed, stopping writer");
            break;
        }
    }
}
