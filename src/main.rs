use std::io::IsTerminal;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use nas_files::{AppState, Config, FileManager};

#[derive(Parser, Debug)]
#[command(name = "nas-files")]
#[command(about = "Browser file manager for a local storage directory")]
#[command(version)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "NAS_FILES_PORT", default_value = "3000")]
    port: u16,

    /// Address to bind to
    #[arg(short, long, env = "NAS_FILES_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Storage root to manage
    #[arg(short, long, env = "NAS_FILES_ROOT", default_value = "/nas-files")]
    root: PathBuf,

    /// Directory with the browser front end
    #[arg(long, env = "NAS_FILES_STATIC_DIR")]
    static_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, env = "NAS_FILES_VERBOSE")]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, env = "NAS_FILES_JSON_LOGS")]
    json: bool,

    /// Config file path (optional)
    #[arg(short, long, env = "NAS_FILES_CONFIG")]
    config: Option<PathBuf>,
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("nas_files={level},tower_http={level}")));

    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_ansi(std::io::stderr().is_terminal()))
            .try_init()
            .ok();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&cli);

    // Load config from file if provided, otherwise use defaults
    let config = if let Some(config_path) = &cli.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };

    std::fs::create_dir_all(&cli.root)
        .map_err(|e| format!("Cannot create storage root {}: {}", cli.root.display(), e))?;
    let root_dir = cli.root.canonicalize()?;
    if !root_dir.is_dir() {
        return Err(format!("Storage root is not a directory: {}", root_dir.display()).into());
    }

    let files = FileManager::new(root_dir.clone(), &config);
    files.ensure_layout().await?;
    info!("Serving files from: {}", root_dir.display());

    if let Some(dir) = &cli.static_dir {
        info!("Serving front end from: {}", dir.display());
    }

    let state = AppState::with_files(files, config);
    let app = nas_files::app(state, cli.static_dir.as_deref());

    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port).parse()?;
    info!("Starting nas-files on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
