use std::net::SocketAddr;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use wshd::Transport;
use wshd::WshdConfig;

#[derive(Debug, Parser)]
#[command(name = "wshd", about = "wsh RPC fabric daemon")]
struct Cli {
    /// Transport to listen on: `stdio://`, `tcp://IP:PORT`, or `ws://IP:PORT`.
    #[arg(long, default_value = Transport::DEFAULT_LISTEN_URL)]
    listen: Transport,

    /// Optional address to additionally serve the `/ai-chat` HTTP endpoint on.
    #[arg(long)]
    http_listen: Option<SocketAddr>,

    /// HMAC secret used to sign/verify connection JWTs.
    #[arg(long, env = "WSHD_JWT_SECRET", default_value = "wshd-dev-secret")]
    jwt_secret: String,

    /// Anthropic API key for the `/ai-chat` endpoint.
    #[arg(long, env = "ANTHROPIC_API_KEY")]
    anthropic_api_key: Option<String>,

    /// Anthropic model used for `/ai-chat` requests.
    #[arg(long, default_value = "claude-sonnet-4-5-20250929")]
    anthropic_model: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(wshd::run_main(WshdConfig {
        transport: cli.listen,
        http_listen: cli.http_listen,
        jwt_secret: cli.jwt_secret.into_bytes(),
        anthropic_api_key: cli.anthropic_api_key,
        anthropic_model: cli.anthropic_model,
    }))
}
