use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use warc_replay::{serve, ReplayIndex, WARC_REPLAY_VERSION};

/// Serve archived HTTP responses from WARC files through a forward proxy.
#[derive(Debug, Parser)]
#[command(name = "warc-replay", version = WARC_REPLAY_VERSION)]
struct ReplayCli {
    /// Port to listen on.
    #[arg(short, long, default_value_t = 1080, env = "WARC_REPLAY_PORT")]
    port: u16,

    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// WARC container file (plain or gzipped); repeatable.
    #[arg(short = 'w', long = "warc", required = true)]
    warc_files: Vec<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = ReplayCli::parse();

    let index = ReplayIndex::build(&cli.warc_files)
        .context("failed to index WARC containers")?;
    tracing::info!(
        records = index.len(),
        responses = index.response_count(),
        files = cli.warc_files.len(),
        "index built"
    );

    let addr = format!("{}:{}", cli.bind, cli.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "replay proxy listening");

    serve(listener, Arc::new(index)).await?;
    Ok(())
}
