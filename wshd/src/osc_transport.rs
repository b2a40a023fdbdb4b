//! Runs a router link over a PTY-multiplexed duplex stream using the OSC
//! framing from §4.1.2, grounded on `wsh-codec`'s [`OscDemuxer`]/[`encode_osc`]
//! and the same register-link/writer-task shape `transport.rs` uses for the
//! line-framed transports.
//!
//! Actually spawning and managing a PTY is outside this crate's scope (§1:
//! the fabric is carried by a PTY, not responsible for creating one); this
//! module only drives the framing over whatever duplex byte stream the
//! embedding application hands it.

use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::ReadHalf;
use tokio::io::WriteHalf;
use tokio::sync::mpsc;
use wsh_codec::DemuxEvent;
use wsh_codec::OscDemuxer;
use wsh_codec::OscDirection;
use wsh_codec::encode_osc;
use wsh_protocol::RpcMessage;
use wsh_router::ChannelSink;
use wsh_router::LinkId;
use wsh_router::Router;

const CONNECTION_CHANNEL_DEPTH: usize = 128;
const READ_CHUNK_SIZE: usize = 4096;

/// Drive one OSC-framed duplex connection until EOF, registering it as an
/// untrusted link on `router` for the lifetime of the connection. Bytes that
/// are not part of a recognized OSC frame are handed to `passthrough` (the
/// user-visible terminal stream this fabric is multiplexed onto); `None`
/// drops them.
pub async fn run_osc_connection<S>(
    stream: S,
    router: Arc<Router>,
    passthrough: Option<mpsc::Sender<u8>>,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (read_half, write_half): (ReadHalf<S>, WriteHalf<S>) = tokio::io::split(stream);
    let (tx, rx) = mpsc::channel::<RpcMessage>(CONNECTION_CHANNEL_DEPTH);
    let link_id = router.register_untrusted_link(Arc::new(ChannelSink::new(tx)));

    let writer_task = tokio::spawn(run_writer(write_half, rx));
    run_reader(read_half, Arc::clone(&router), link_id, passthrough).await;

    router.unregister_link(link_id);
    writer_task.abort();
}

async fn run_writer<W>(mut write_half: W, mut rx: mpsc::Receiver<RpcMessage>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = rx.recv().await {
        let encoded = encode_osc(&msg, OscDirection::ServerToClient);
        if write_half.write_all(&encoded).await.is_err() {
            break;
        }
    }
}

async fn run_reader<R>(
    mut read_half: R,
    router: Arc<Router>,
    link_id: LinkId,
    passthrough: Option<mpsc::Sender<u8>>,
) where
    R: AsyncRead + Unpin,
{
    let mut demuxer = OscDemuxer::new(OscDirection::ClientToServer);
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        let read = match read_half.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                tracing::warn!(error = %err, "osc transport read error");
                break;
            }
        };
        for event in demuxer.push_bytes(&buf[..read]) {
            match event {
                DemuxEvent::Frame(bytes) => match serde_json::from_slice::<RpcMessage>(&bytes) {
                    Ok(msg) => match msg.validate() {
                        Ok(_) => router.handle_incoming(link_id, msg).await,
                        Err(err) => tracing::warn!(error = %err, "dropping invalid osc frame"),
                    },
                    Err(err) => tracing::warn!(error = %err, "dropping unparseable osc frame"),
                },
                DemuxEvent::PassThrough(byte) => {
                    if let Some(tx) = &passthrough {
                        let _ = tx.send(byte).await;
                    }
                }
            }
        }
    }
}
