use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use shoal::client::{Client, Config};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "A simplified BitTorrent-style peer-to-peer file distribution engine"
)]
struct Args {
    /// Path to the torrent descriptor file
    torrent: PathBuf,

    /// Directory to download into (the file is named by the descriptor)
    #[arg(short = 'd', long, default_value = ".")]
    download_dir: PathBuf,

    /// TCP port to listen on for inbound peers
    #[arg(short, long, default_value_t = 6881)]
    port: u16,

    /// Outstanding block requests per peer session
    #[arg(long, default_value_t = 5)]
    pipeline_depth: usize,

    /// Block request size in bytes
    #[arg(long, default_value_t = 16384)]
    block_size: u32,

    /// Maximum simultaneous peer sessions
    #[arg(long, default_value_t = 50)]
    max_sessions: usize,

    /// Seconds before an unanswered block request is re-queued
    #[arg(long, default_value_t = 30)]
    request_timeout: u64,

    /// Keepalive interval in seconds
    #[arg(long, default_value_t = 120)]
    keepalive: u64,
}

impl Args {
    fn into_config(self) -> Config {
        let mut config = Config::new(self.torrent);
        config.download_dir = self.download_dir;
        config.listen_port = self.port;
        config.pipeline_depth = self.pipeline_depth;
        config.block_size = self.block_size;
        config.max_sessions = self.max_sessions;
        config.request_timeout = Duration::from_secs(self.request_timeout);
        config.keepalive_interval = Duration::from_secs(self.keepalive);
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let client = Arc::new(
        Client::new(args.into_config())
            .await
            .context("failed to start client")?,
    );

    let mut runner = tokio::spawn(client.clone().run());
    tokio::select! {
        result = &mut runner => {
            // The engine only returns early on a fatal error.
            return result?.map_err(Into::into);
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
            client.shutdown();
        }
    }
    runner.await??;
    Ok(())
}
