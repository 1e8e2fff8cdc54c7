//! tartd — the pushtart daemon.
//!
//! Single binary that assembles the orchestrator:
//! - Tart store (redb)
//! - Process supervisor
//! - Sentry loop
//! - Command surface and deploy pipeline, served on a console socket
//!
//! # Usage
//!
//! ```text
//! tartd run --config /etc/pushtart.toml
//! tartd exec new-tart --tart /blog --owner alice
//! tartd exec tart-restart-mode --tart /blog --enabled yes --lull-period 5
//! tartd deploy --tart /blog
//! ```
//!
//! `exec` and `deploy` forward to the running daemon over its console
//! socket (`<data_path>/tartd.sock`). With no daemon listening they open
//! the store themselves; tarts they start are adopted by PID on the next
//! `run`.

mod console;
mod control;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use control::ControlRequest;
use tart_commands::Orchestrator;
use tart_core::ServerConfig;
use tart_deploy::GitCheckout;
use tart_sentry::Sentry;
use tart_state::{StateStore, TartStore};
use tart_supervisor::{Supervisor, SupervisorSettings};
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "tartd", about = "pushtart daemon and management console")]
struct Cli {
    /// Server configuration file. Created with defaults if missing.
    #[arg(long, global = true, default_value = "pushtart.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon: supervise tarts until interrupted.
    Run,

    /// Run one management command as the trusted console.
    Exec {
        /// Command name, e.g. list-tarts or new-tart.
        command: String,

        /// Command parameters as --key value pairs.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Deploy the latest push of a tart.
    Deploy {
        /// Push URL of the tart.
        #[arg(long)]
        tart: String,

        /// Act as this user instead of the trusted console.
        #[arg(long, default_value = "")]
        user: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = ServerConfig::load_or_generate(&cli.config)?;

    match cli.command {
        Command::Run => run_daemon(config).await,
        Command::Exec { command, args } => {
            let params = console::parse_params(&args)?;
            let request = ControlRequest::Exec {
                command,
                params,
                user: String::new(),
            };
            run_request(config, request).await
        }
        Command::Deploy { tart, user } => {
            run_request(config, ControlRequest::Deploy { tart, user }).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tartd=debug,tart=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Open the store and build the supervisor every subcommand shares.
fn open_supervisor(config: &ServerConfig) -> anyhow::Result<Arc<Supervisor>> {
    std::fs::create_dir_all(&config.data_path)?;
    std::fs::create_dir_all(&config.deployment_path)?;

    let db_path = config.store_path();
    let store: Arc<dyn TartStore> = Arc::new(StateStore::open(&db_path)?);
    info!(path = ?db_path, "tart store opened");

    Ok(Arc::new(Supervisor::new(
        store,
        SupervisorSettings::from_config(config),
    )))
}

fn orchestrator(
    config: &ServerConfig,
    supervisor: Arc<Supervisor>,
) -> Arc<Orchestrator<GitCheckout>> {
    Arc::new(Orchestrator::new(
        supervisor,
        GitCheckout::new(config.repos_dir()),
    ))
}

async fn run_daemon(config: ServerConfig) -> anyhow::Result<ExitCode> {
    info!(name = %config.name, "pushtart daemon starting");
    let supervisor = open_supervisor(&config)?;
    let orchestrator = orchestrator(&config, supervisor.clone());

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ───────────────────────────────────────

    let sentry_handle = match config.sentry_interval() {
        Some(interval) => {
            let sentry = Sentry::new(supervisor, interval);
            Some(tokio::spawn(sentry.run(shutdown_rx.clone())))
        }
        None => {
            info!(
                run_sentry_interval = config.run_sentry_interval,
                "sentry disabled"
            );
            None
        }
    };

    // ── Console socket ─────────────────────────────────────────

    let socket_path = config.console_socket();
    let mut console_handle = tokio::spawn(async move {
        control::serve(&socket_path, orchestrator, shutdown_rx).await
    });

    info!("pushtart daemon ready");
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("shutdown signal received");
        }
        served = &mut console_handle => {
            // The console socket only returns early when it failed to bind.
            served??;
        }
    }

    let _ = shutdown_tx.send(true);
    if let Some(handle) = sentry_handle {
        let _ = handle.await;
    }
    if !console_handle.is_finished() {
        let _ = console_handle.await;
    }

    // Tart processes outlive the daemon and are adopted by PID next time.
    info!("pushtart daemon stopped");
    Ok(ExitCode::SUCCESS)
}

/// Hand `request` to the running daemon, or run it here when none is up.
async fn run_request(config: ServerConfig, request: ControlRequest) -> anyhow::Result<ExitCode> {
    let mut stdout = std::io::stdout();
    let socket_path = config.console_socket();
    let failed = match control::connect(&socket_path).await? {
        Some(stream) => {
            debug!(socket = %socket_path.display(), "forwarding to daemon");
            control::forward(stream, &request, &mut stdout).await?
        }
        None => {
            debug!("no daemon listening, opening the store directly");
            let orchestrator = orchestrator(&config, open_supervisor(&config)?);
            control::execute(&orchestrator, request, &mut stdout).await
        }
    };
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
