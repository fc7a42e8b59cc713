#![forbid(unsafe_code)]

//! HTTP gateway: serves the browser UI and the four `/api` endpoints that
//! forward to yt-dlp and ffmpeg.

use std::{net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tubegrab::{
    api::{self, AppState},
    config::{DEFAULT_ENV_FILE, EnvConfig, GatewayConfig, load_env_layers},
    extractor::{YtDlp, probe_tool},
    mux::Ffmpeg,
};

const DEFAULT_LOG_FILTER: &str = "tubegrab=info,gateway=info,tower_http=info";

#[derive(Parser, Debug)]
#[command(author, version, about = "Video metadata and download gateway.")]
struct Cli {
    #[arg(
        long = "env-file",
        value_name = "PATH",
        default_value = DEFAULT_ENV_FILE,
        help = "Dotenv-style file read before the process environment"
    )]
    env_file: PathBuf,
    #[arg(long, value_name = "ADDR", help = "Interface to bind (overrides HOST)")]
    host: Option<String>,
    #[arg(short, long, value_name = "PORT", help = "Port to listen on (overrides PORT)")]
    port: Option<u16>,
    #[arg(
        long = "public-dir",
        value_name = "PATH",
        help = "Directory holding the browser UI (overrides PUBLIC_DIR)"
    )]
    public_dir: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> EnvConfig {
        EnvConfig {
            port: self.port,
            host: self.host.clone(),
            public_dir: self.public_dir.clone(),
            ..EnvConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    run(config).await
}

fn resolve_config(cli: &Cli) -> Result<GatewayConfig> {
    let layers = load_env_layers(&cli.env_file)
        .with_context(|| format!("loading configuration from {}", cli.env_file.display()))?;
    Ok(layers.overlay(cli.overrides()).resolve())
}

async fn run(config: GatewayConfig) -> Result<()> {
    probe_tool(&config.ytdlp_path, "--version").await;
    probe_tool(&config.ffmpeg_path, "-version").await;
    if !config.public_dir.join("index.html").is_file() {
        warn!(path = %config.public_dir.display(), "browser UI not found; only /api is served");
    }

    let extractor = YtDlp::new(&config.ytdlp_path).with_cookies(config.cookies_file.clone());
    let muxer = Ffmpeg::new(&config.ffmpeg_path);
    info!(
        ytdlp = %extractor.program().display(),
        ffmpeg = %muxer.program().display(),
        public_dir = %config.public_dir.display(),
        "external tools configured"
    );
    let state = AppState::new(extractor, muxer, config.public_dir.clone());
    let app = api::router(state);

    let addr = SocketAddr::new(
        config
            .host
            .parse()
            .with_context(|| format!("parsing HOST {}", config.host))?,
        config.port,
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!("Server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!("Failed to install Ctrl+C handler: {}", err);
    }
    info!("shutting down");
}
