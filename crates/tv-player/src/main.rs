mod app;
mod core;
mod mpv;
mod surface;
mod theme;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use tv_proto::catalog::CatalogFetcher;
use tv_proto::config::Config;

use crate::core::{PlayerCore, PlayerEvent};
use crate::mpv::MpvEngine;
use crate::surface::TerminalSurface;

/// Debug for our own crates, quiet HTTP client internals.
const DEFAULT_LOG_FILTER: &str =
    "info,tvplay=debug,tv_proto=debug,hyper_util=warn,reqwest=warn,hyper=warn";

/// Watch live TV channels from a remote markdown channel list.
#[derive(Debug, Parser)]
#[command(name = "tvplay", version)]
struct Cli {
    /// Channel list location (http(s) URL or file), overrides the config.
    #[arg(long, value_name = "URL|PATH")]
    catalog: Option<String>,
    /// Config file to use instead of the default location.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Only look for mpv on PATH.
    #[arg(long)]
    use_system_mpv: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            error!("tvplay failed: {:#}", e);
            eprintln!("tvplay: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let data_dir = tv_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("tvplay.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // RUST_LOG wins over the default filter.
    let log_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    eprintln!("tvplay log: {}", log_path.display());
    info!("tvplay starting…");

    // ── Config ───────────────────────────────────────────────────────────────
    let config_path = cli.config.clone().unwrap_or_else(Config::config_path);
    let mut config = match Config::load_from(&config_path) {
        Ok(c) => {
            info!("Config loaded from: {:?}", config_path);
            c
        }
        Err(e) => {
            warn!("Failed to load config {:?}, using defaults: {}", config_path, e);
            Config::default()
        }
    };
    if let Some(source) = cli.catalog {
        config.catalog.source = source;
    }
    tv_proto::platform::set_use_system_deps(cli.use_system_mpv);

    let fetcher = CatalogFetcher::from_config(&config.catalog)?;

    // ── Channels: UI → PlayerCore, PlayerCore → UI ───────────────────────────
    let (event_tx, event_rx) = mpsc::channel::<PlayerEvent>(256);
    let (surface_tx, surface_rx) = mpsc::unbounded_channel();

    let surface = TerminalSurface::new(surface_tx);
    let engine = MpvEngine::new(&config.mpv, event_tx.clone());
    let mut player = PlayerCore::new(surface, engine);

    // ── Run TUI ──────────────────────────────────────────────────────────────
    app::install_panic_hook();
    let ui_app = app::App::new(event_tx.clone());
    let ui_shutdown_tx = event_tx.clone();
    drop(event_tx);
    let ui = tokio::spawn(async move {
        let result = ui_app.run(surface_rx).await;
        // the player loop must end even when the UI failed
        let _ = ui_shutdown_tx.send(PlayerEvent::Shutdown).await;
        result
    });

    // ── Catalog, then the event loop ─────────────────────────────────────────
    info!("Loading channels from {}", fetcher.source());
    let end = player
        .play(fetcher.load_catalog(), event_rx, config.ui.start_fullscreen)
        .await;
    ui.await??;

    info!("tvplay exiting: {:?}", end);
    Ok(end.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_log_filter_covers_both_crates() {
        assert!(tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
        let directives: Vec<&str> = DEFAULT_LOG_FILTER.split(',').collect();
        assert!(directives.contains(&"tvplay=debug"));
        assert!(directives.contains(&"tv_proto=debug"));
        assert!(directives.contains(&"reqwest=warn"));
    }

    #[test]
    fn cli_overrides_parse() {
        let cli = Cli::parse_from(["tvplay", "--catalog", "lists/finland.md", "--use-system-mpv"]);
        assert_eq!(cli.catalog.as_deref(), Some("lists/finland.md"));
        assert!(cli.use_system_mpv);
        assert!(cli.config.is_none());
    }
}
