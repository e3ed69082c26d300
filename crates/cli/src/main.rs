mod config_commands;
mod session_commands;

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use {
    anyhow::bail,
    clap::{Parser, Subcommand},
    tokio_util::sync::CancellationToken,
    tracing::{error, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
    warelay_config::{RelayConfig, Severity},
    warelay_gateway::{Supervisor, SupervisorExit},
    warelay_metrics::MetricsRecorderConfig,
    warelay_whatsapp::{SidecarTransport, StderrPairingSink},
};

/// Exit status after the device was logged out.
const EXIT_LOGGED_OUT: u8 = 2;

#[derive(Parser)]
#[command(name = "warelay", about = "warelay: WhatsApp group relay", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: discover warelay.{toml,yaml,json} in ./ then
    /// ~/.config/warelay/).
    #[arg(long, short, global = true, env = "WARELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and relay messages (default when no subcommand is provided).
    Run,
    /// Persisted WhatsApp session.
    Session {
        #[command(subcommand)]
        action: session_commands::SessionAction,
    },
    /// Configuration inspection.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

/// Logs go to stderr; stdout is reserved for command output.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config_path = cli.config.as_deref();
    let outcome = match cli.command {
        None | Some(Commands::Run) => run(config_path).await,
        Some(Commands::Session { action }) => {
            match warelay_config::load_or_discover(config_path) {
                Ok(config) => session_commands::handle_session(action, &config).await,
                Err(e) => Err(e.into()),
            }
        },
        Some(Commands::Config { action }) => config_commands::handle_config(action, config_path),
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "warelay failed");
            ExitCode::FAILURE
        },
    }
}

/// Sidecar URL: the local port when warelay starts the sidecar itself,
/// otherwise the configured URL.
fn sidecar_url(config: &RelayConfig) -> String {
    if config.sidecar.auto_start {
        format!("ws://127.0.0.1:{}", config.sidecar.port)
    } else {
        config.transport.sidecar_url.clone()
    }
}

async fn run(config_path: Option<&Path>) -> anyhow::Result<ExitCode> {
    let config = warelay_config::load_or_discover(config_path)?;

    let report = warelay_config::validate(&config);
    for d in &report.diagnostics {
        match d.severity {
            Severity::Error => error!(path = %d.path, "{}", d.message),
            Severity::Warning => warn!(path = %d.path, "{}", d.message),
        }
    }
    if report.has_errors() {
        bail!(
            "configuration has {} error(s); see `warelay config check`",
            report.count(Severity::Error)
        );
    }

    let _metrics = warelay_metrics::init_metrics(MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        listen: config.metrics.listen,
        global_labels: vec![("session".into(), config.session.id.clone())],
    })?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        session_id = %config.session.id,
        "warelay starting"
    );

    let transport = Arc::new(SidecarTransport::new(sidecar_url(&config)));
    let supervisor =
        Supervisor::from_config(&config, transport, Arc::new(StderrPairingSink)).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    match supervisor.run(shutdown).await? {
        SupervisorExit::Shutdown => Ok(ExitCode::SUCCESS),
        SupervisorExit::LoggedOut => {
            eprintln!("Device was logged out. Run `warelay session clear` and pair again.");
            Ok(ExitCode::from(EXIT_LOGGED_OUT))
        },
    }
}

/// Resolve on ctrl-c, or SIGTERM on Unix.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
                return;
            },
            Err(e) => warn!(error = %e, "cannot listen for SIGTERM"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c; stop the process another way");
        std::future::pending::<()>().await;
    }
}
