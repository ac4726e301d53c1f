#![cfg_attr(all(windows, not(debug_assertions)), windows_subsystem = "windows")]

use clap::Parser;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use wallrotate::config::ConfigStore;
use wallrotate::credentials::CredentialStore;
use wallrotate::orchestrator::Orchestrator;
use wallrotate::sources::{http_client, SourceRouter};
use wallrotate::state::{drain_events, AppState};
use wallrotate::{autostart, events, file_manager, logger, web_server};

#[derive(Parser, Debug)]
#[command(name = "wallrotate", version, about = "Rotates the desktop wallpaper in the background")]
struct Args {
    /// Directory holding config.json, .env and logs/.
    #[arg(long, env = "WALLROTATE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Port of the local control panel.
    #[arg(long, default_value_t = 11452)]
    port: u16,

    /// Do not restart the update loop even if it was running at last exit.
    #[arg(long)]
    no_resume: bool,

    #[arg(long, conflicts_with = "remove_autostart")]
    install_autostart: bool,

    #[arg(long)]
    remove_autostart: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let app_data_dir = match file_manager::init_app_data_dir(args.data_dir.as_deref()) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Failed to initialize app data directory: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let _logger = match logger::setup_logging(&app_data_dir) {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("Failed to setup logging: {}", e);
            None
        }
    };

    info!("--- WallRotate started ---");

    if args.install_autostart {
        if let Err(e) = autostart::set_autostart() {
            error!("Failed to set autostart: {}", e);
        }
    }
    if args.remove_autostart {
        if let Err(e) = autostart::remove_autostart() {
            error!("Failed to remove autostart: {}", e);
        }
    }

    let code = match run(&args, app_data_dir).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    };
    info!("--- WallRotate shutting down ---");
    code
}

async fn run(args: &Args, app_data_dir: PathBuf) -> wallrotate::Result<()> {
    // Bound first so a taken port exits before any run exists to tear down.
    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));
    let listener = TcpListener::bind(addr).await?;

    let store = Arc::new(ConfigStore::open(app_data_dir.join("config.json")).await);
    let credentials = Arc::new(CredentialStore::open(app_data_dir.join(".env")));
    let router = Arc::new(SourceRouter::system(http_client()?, credentials.clone()));

    let (tx, rx) = events::channel();
    let orchestrator = Orchestrator::new(store.clone(), router, tx);
    let state = Arc::new(AppState::new(orchestrator, credentials, app_data_dir));
    let drain = tokio::spawn(drain_events(state.clone(), rx));

    info!("Control panel listening on http://{}", addr);
    let config = store.snapshot().await;
    if config.running && !args.no_resume {
        info!("Resuming wallpaper updates from last session");
        if let Err(e) = state.orchestrator.start(config.enabled_sources).await {
            warn!("Could not resume wallpaper updates: {}", e);
        }
    }

    let served = web_server::serve(state.clone(), listener, shutdown_signal()).await;
    if let Err(e) = &served {
        error!("Web server failed: {}", e);
    }

    state.orchestrator.request_shutdown().await;
    drain.abort();
    served
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl-C received"),
        Err(e) => {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
