mod ui;

use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use deceive_chat_interceptor::ChatInterceptor;
use deceive_common::{ChatTargetCell, PresenceMode};
use deceive_config_interceptor::ConfigInterceptor;
use deceive_launcher::{Game, Launcher};
use deceive_supervisor::Supervisor;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::ui::{ConsoleUi, Ui};

#[derive(Parser)]
#[command(name = "league-deceiver", about = "Hides your presence from the game client's chat backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Override the directory config, certs, and logs are read from/written
    /// to instead of the platform default.
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the game client through the deceiver (default when no
    /// subcommand is given).
    Launch(LaunchArgs),
    /// Install the generated CA certificate into the system trust store.
    TrustCa,
}

/// The CLI surface's status values. Kept as its own `ValueEnum` rather
/// than parsing a free-form string: an unrecognized `--status` is then
/// a clap parse error, not a silent fallback to some default mode.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
#[clap(rename_all = "lowercase")]
enum StatusArg {
    Offline,
    Online,
    Mobile,
}

impl From<StatusArg> for PresenceMode {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Offline => Self::Offline,
            StatusArg::Online => Self::Online,
            StatusArg::Mobile => Self::Mobile,
        }
    }
}

#[derive(clap::Args)]
struct LaunchArgs {
    /// Which product to launch. Defaults to the last game launched
    /// (`defaultGame` in the persisted config), falling back to `prompt`
    /// if none was ever saved.
    #[arg(value_enum)]
    game: Option<Game>,

    /// Presence visibility to start in (offline, online, mobile).
    #[arg(long, value_enum, default_value = "offline")]
    status: StatusArg,

    /// Show the tray UI in addition to the console.
    #[arg(long, default_value_t = true)]
    tray: bool,

    /// Patchline passed to the client when a product is specified.
    #[arg(long, default_value = "live")]
    patchline: String,

    /// Override the Riot Client binary path instead of auto-detecting it.
    #[arg(long)]
    client_path: Option<String>,
}

fn init_telemetry(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry.with(fmt::layer().json().with_target(true).with_thread_ids(false)).init();
    } else {
        registry.with(fmt::layer().with_target(false).with_thread_ids(false).with_ansi(true)).init();
    }
}

async fn trust_ca() -> anyhow::Result<()> {
    let cert_dir = deceive_tls::cert_dir()?;
    let ca_path = cert_dir.join("server.pem");

    if !ca_path.exists() {
        eprintln!("CA certificate not found at {}. Run `league-deceiver launch` once to generate it.", ca_path.display());
        return Ok(());
    }

    eprintln!("Installing CA certificate: {}", ca_path.display());

    #[cfg(target_os = "macos")]
    {
        let status = std::process::Command::new("security")
            .args(["add-trusted-cert", "-r", "trustRoot", "-k", &format!("{}/Library/Keychains/login.keychain-db", std::env::var("HOME").unwrap_or_default())])
            .arg(&ca_path)
            .status()?;
        if status.success() {
            eprintln!("CA certificate installed successfully. Restart the game client to pick up the change.");
        } else {
            eprintln!("Failed to install CA certificate (exit code: {status})");
        }
    }

    #[cfg(target_os = "linux")]
    {
        let dest = std::path::PathBuf::from("/usr/local/share/ca-certificates/league-deceiver-ca.crt");
        eprintln!("Copying CA to {} (may require sudo)", dest.display());
        let status = std::process::Command::new("sudo").arg("cp").arg(&ca_path).arg(&dest).status()?;
        if status.success() {
            let update = std::process::Command::new("sudo").arg("update-ca-certificates").status()?;
            if update.success() {
                eprintln!("CA certificate installed successfully.");
            } else {
                eprintln!("update-ca-certificates failed (exit code: {update})");
            }
        } else {
            eprintln!("Failed to copy CA certificate (exit code: {status})");
        }
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        eprintln!("Automatic trust installation is not supported on this OS.\nManually import the CA certificate from: {}", ca_path.display());
    }

    Ok(())
}

async fn run_launch(args: LaunchArgs) -> anyhow::Result<()> {
    use deceive_tls::CertManager as _;

    let mode = PresenceMode::from(args.status);
    let config = deceive_config::discover_and_load();
    let game = args.game.unwrap_or_else(|| config.default_game.as_deref().map_or(Game::Prompt, Game::from_config_str));

    let cert_manager = deceive_tls::FsCertManager::new()?;
    let (cert_path, key_path) = cert_manager.ensure_certs()?;
    let rustls_config = cert_manager.build_rustls_config(&cert_path, &key_path)?;

    let chat_target = Arc::new(ChatTargetCell::new());
    let supervisor = Supervisor::new(mode, true, config.connect_to_muc);

    let chat_interceptor = ChatInterceptor::new(rustls_config, Arc::clone(&chat_target), Arc::clone(&supervisor));
    let (chat_port, mut chat_handle) = chat_interceptor.start().await?;
    info!(port = chat_port, "chat interceptor bound");

    let config_interceptor = ConfigInterceptor::new(chat_port, Arc::clone(&chat_target));
    let (config_port, mut config_handle) = config_interceptor.start().await?;
    info!(port = config_port, "config interceptor bound");

    let launcher = match Launcher::discover(args.client_path.as_deref()) {
        Ok(launcher) => launcher,
        Err(err) => {
            error!(%err, "could not find the Riot Client binary");
            std::process::exit(1);
        },
    };
    launcher.stop_running();
    let _child = launcher.launch(config_port, game, &args.patchline)?;

    if let Err(err) = deceive_config::update_config(|cfg| {
        cfg.default_game = Some(game.as_config_str().to_string());
        cfg.default_status = mode.label().to_string();
    }) {
        warn!(%err, "failed to persist launch settings");
    }

    let ui: Box<dyn Ui> = Box::new(ConsoleUi);
    ui.notify(&format!("League Deceiver running — appearing {mode}."));
    let _ = args.tray;

    wait_for_shutdown_signal().await?;
    info!("shutting down");

    supervisor.stop().await;
    chat_handle.stop().await;
    config_handle.stop().await;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = terminate.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    if let Some(dir) = cli.config_dir {
        deceive_config::set_config_dir(dir);
    }

    info!(version = env!("CARGO_PKG_VERSION"), "league-deceiver starting");

    match cli.command {
        None => run_launch(LaunchArgs { game: None, status: StatusArg::Offline, tray: true, patchline: "live".to_string(), client_path: None }).await,
        Some(Commands::Launch(args)) => run_launch(args).await,
        Some(Commands::TrustCa) => trust_ca().await,
    }
}
