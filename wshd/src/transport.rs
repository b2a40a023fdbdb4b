//! Accepts RPC connections on one of the line-framed transports from §1/§6
//! and wires each one up to the [`Router`] as an untrusted link, grounded on
//! `codex-rs/app-server`'s `AppServerTransport` + stdio/websocket accept
//! loops, generalized from its JSON-RPC connection plumbing to this crate's
//! [`Router::register_untrusted_link`]/[`Router::handle_incoming`] pair.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use futures::SinkExt;
use futures::StreamExt;
use tokio::io::stdin;
use tokio::io::stdout;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::codec::FramedRead;
use tokio_util::codec::FramedWrite;
use wsh_codec::NdjsonCodec;
use wsh_protocol::RpcMessage;
use wsh_router::ChannelSink;
use wsh_router::Router;

/// Depth of the per-connection outbound channel a transport's writer task
/// drains; bounds how far a burst of router sends can outrun a slow peer.
const CONNECTION_CHANNEL_DEPTH: usize = 128;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Transport {
    /// Newline-delimited JSON over the process's own stdin/stdout.
    Stdio,
    /// Newline-delimited JSON over a plain TCP connection.
    Tcp { bind_address: SocketAddr },
    /// One `RpcMessage` JSON object per websocket text frame.
    WebSocket { bind_address: SocketAddr },
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum TransportParseError {
    #[error(
        "unsupported --listen URL `{0}`; expected `stdio://`, `tcp://IP:PORT`, or `ws://IP:PORT`"
    )]
    UnsupportedListenUrl(String),
    #[error("invalid --listen URL `{0}`; expected an `IP:PORT` socket address")]
    InvalidSocketAddress(String),
}

impl Transport {
    pub const DEFAULT_LISTEN_URL: &'static str = "stdio://";

    pub fn from_listen_url(listen_url: &str) -> Result<Self, TransportParseError> {
        if listen_url == Self::DEFAULT_LISTEN_URL {
            return Ok(Self::Stdio);
        }
        if let Some(rest) = listen_url.strip_prefix("tcp://") {
            return Ok(Self::Tcp {
                bind_address: parse_bind_address(listen_url, rest)?,
            });
        }
        if let Some(rest) = listen_url.strip_prefix("ws://") {
            return Ok(Self::WebSocket {
                bind_address: parse_bind_address(listen_url, rest)?,
            });
        }
        Err(TransportParseError::UnsupportedListenUrl(
            listen_url.to_string(),
        ))
    }
}

fn parse_bind_address(whole: &str, rest: &str) -> Result<SocketAddr, TransportParseError> {
    rest.parse()
        .map_err(|_| TransportParseError::InvalidSocketAddress(whole.to_string()))
}

impl FromStr for Transport {
    type Err = TransportParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_listen_url(s)
    }
}

/// Run the configured transport until shutdown (stdio EOF, or Ctrl-C for the
/// listening transports).
pub async fn run(transport: Transport, router: Arc<Router>) -> anyhow::Result<()> {
    match transport {
        Transport::Stdio => run_stdio(router).await,
        Transport::Tcp { bind_address } => run_tcp(bind_address, router).await,
        Transport::WebSocket { bind_address } => run_websocket(bind_address, router).await,
    }
}

async fn run_stdio(router: Arc<Router>) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel::<RpcMessage>(CONNECTION_CHANNEL_DEPTH);
    let link_id = router.register_untrusted_link(Arc::new(ChannelSink::new(tx)));

    let writer_task = tokio::spawn(async move {
        let mut framed = FramedWrite::new(stdout(), NdjsonCodec::new());
        while let Some(msg) = rx.recv().await {
            if framed.send(&msg).await.is_err() {
                break;
            }
        }
    });

    let mut framed = FramedRead::new(stdin(), NdjsonCodec::new());
    while let Some(Ok(msg)) = framed.next().await {
        router.handle_incoming(link_id, msg).await;
    }

    router.unregister_link(link_id);
    writer_task.abort();
    Ok(())
}

async fn run_tcp(bind_address: SocketAddr, router: Arc<Router>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_address).await?;
    tracing::info!(%bind_address, "wshd tcp transport listening");
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        let router = Arc::clone(&router);
                        tokio::spawn(async move {
                            tracing::debug!(%peer_addr, "tcp connection accepted");
                            run_tcp_connection(stream, router).await;
                        });
                    }
                    Err(err) => tracing::error!(error = %err, "failed to accept tcp connection"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down tcp transport");
                return Ok(());
            }
        }
    }
}

async fn run_tcp_connection(stream: TcpStream, router: Arc<Router>) {
    let (read_half, write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<RpcMessage>(CONNECTION_CHANNEL_DEPTH);
    let link_id = router.register_untrusted_link(Arc::new(ChannelSink::new(tx)));

    let writer_task = tokio::spawn(async move {
        let mut framed = FramedWrite::new(write_half, NdjsonCodec::new());
        while let Some(msg) = rx.recv().await {
            if framed.send(&msg).await.is_err() {
                break;
            }
        }
    });

    let mut framed = FramedRead::new(read_half, NdjsonCodec::new());
    while let Some(Ok(msg)) = framed.next().await {
        router.handle_incoming(link_id, msg).await;
    }

    router.unregister_link(link_id);
    writer_task.abort();
}

async fn run_websocket(bind_address: SocketAddr, router: Arc<Router>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_address).await?;
    tracing::info!(%bind_address, "wshd websocket transport listening");
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        let router = Arc::clone(&router);
                        tokio::spawn(async move {
                            tracing::debug!(%peer_addr, "websocket connection accepted");
                            run_websocket_connection(stream, router).await;
                        });
                    }
                    Err(err) => tracing::error!(error = %err, "failed to accept websocket connection"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down websocket transport");
                return Ok(());
            }
        }
    }
}

async fn run_websocket_connection(stream: TcpStream, router: Arc<Router>) {
    let websocket_stream = match accept_async(stream).await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(error = %err, "websocket handshake failed");
            return;
        }
    };
    let (mut ws_writer, mut ws_reader) = websocket_stream.split();

    let (tx, mut rx) = mpsc::channel::<RpcMessage>(CONNECTION_CHANNEL_DEPTH);
    let link_id = router.register_untrusted_link(Arc::new(ChannelSink::new(tx)));

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = serde_json::to_string(&msg).unwrap_or_else(|_| "{}".to_string());
            if ws_writer.send(WsMessage::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(incoming) = ws_reader.next().await {
        match incoming {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<RpcMessage>(&text) {
                Ok(msg) => router.handle_incoming(link_id, msg).await,
                Err(err) => tracing::warn!(error = %err, "dropping unparseable websocket frame"),
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "websocket receive error");
                break;
            }
        }
    }

    router.unregister_link(link_id);
    writer_task.abort();
}
