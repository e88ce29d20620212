use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use opdeck::api::{AppState, create_router};
use opdeck::monitor::{DeviceMonitor, EventHub, MonitorConfig, SystemProber};
use opdeck::settings::{self, Settings, SettingsService};

const APP_NAME: &str = "opdeck";

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.common);

    match cli.command {
        Command::Serve(cmd) => {
            let settings = settings::load_settings(cli.common.config.as_deref())?;
            run_serve(settings, cmd)
        }
        Command::Config { command } => {
            let settings = settings::load_settings(cli.common.config.as_deref())?;
            handle_config(settings, command)
        }
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), APP_NAME, &mut io::stdout());
            Ok(())
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Opdeck - OP-Z / OP-1 sample manager server.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Reduce output to only errors
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Disable ANSI colors in output
    #[arg(long = "no-color", global = true)]
    no_color: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP server and device monitor
    Serve(ServeCommand),
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Host address to bind to (overrides config)
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the resolved configuration
    Show,
    /// Print the config file location
    Path,
}

fn init_logging(opts: &CommonOpts) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let level = if opts.quiet {
        "error"
    } else {
        match opts.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{APP_NAME}={level},tower_http={level}")));

    let disable_color =
        opts.no_color || std::env::var_os("NO_COLOR").is_some() || !io::stderr().is_terminal();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(!disable_color)
                .with_writer(io::stderr),
        )
        .try_init()
        .ok();
}

#[tokio::main]
async fn run_serve(settings: Settings, cmd: ServeCommand) -> Result<()> {
    let host = cmd.host.unwrap_or_else(|| settings.server.host.clone());
    let port = cmd.port.unwrap_or(settings.server.port);

    let monitor_config = MonitorConfig {
        poll_interval: Duration::from_millis(settings.monitor.poll_interval_ms),
        grace_window: Duration::from_secs(settings.monitor.grace_window_secs),
    };
    let prober = Arc::new(SystemProber::new(
        Duration::from_millis(settings.monitor.probe_timeout_ms),
        settings.monitor.extra_volume_roots.clone(),
    ));

    let service = Arc::new(SettingsService::new(settings));
    let hub = Arc::new(EventHub::new());
    let monitor = Arc::new(DeviceMonitor::new(
        Arc::clone(&hub),
        prober,
        Arc::clone(&service),
        monitor_config,
    ));

    let cancel = CancellationToken::new();
    monitor.spawn(cancel.clone());

    let state = AppState::new(hub, monitor, service);
    let router = create_router(state);

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    info!(%addr, "opdeck server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await
        .context("server error")?;

    info!("opdeck server stopped");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
    cancel.cancel();
}

fn handle_config(settings: Settings, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let rendered =
                serde_json::to_string_pretty(&settings).context("serializing configuration")?;
            println!("{rendered}");
        }
        ConfigCommand::Path => match settings::default_config_path() {
            Some(path) => println!("{}", path.display()),
            None => println!("(no config directory available)"),
        },
    }
    Ok(())
}
