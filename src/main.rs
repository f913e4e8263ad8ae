//! taskpool - bounded task dispatcher
//!
//! Entry point for both roles: `taskpool coordinator` owns the slot table
//! and hands out tasks, `taskpool worker` registers with it and classifies
//! the values it receives.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error, info};

use taskpool::channel::{ChannelAddr, UnixTransport};
use taskpool::cli::{Cli, Commands, ConfigSubcommand};
use taskpool::config::{self, TaskpoolConfig};
use taskpool::coordinator::Coordinator;
use taskpool::error::Result;
use taskpool::logging;
use taskpool::shutdown::ShutdownSignals;
use taskpool::worker::{SessionEnd, WorkerSession};

fn main() -> ExitCode {
    // Help and version are not errors
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprint!("{}", e.format_for_terminal());
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Config { subcommand } = &cli.command {
        logging::init_simple(tracing::Level::WARN)?;
        return handle_config_command(subcommand, cli.config.as_deref());
    }

    // Bad channel arguments are reported before anything else happens
    let addr = match &cli.command {
        Commands::Coordinator { channel, .. } | Commands::Worker { channel, .. } => channel.addr()?,
        Commands::Config { .. } => unreachable!("config commands are handled above"),
    };

    let mut config = TaskpoolConfig::load_unvalidated(cli.config.as_deref())?;
    apply_cli_overrides(&mut config, &cli.command);
    config.validate()?;

    // Held until exit so the file writer flushes
    let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting taskpool");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let result = match cli.command {
        Commands::Coordinator { .. } => runtime.block_on(run_coordinator(&config, addr)),
        Commands::Worker { .. } => runtime.block_on(run_worker(&config, addr)),
        Commands::Config { .. } => unreachable!("config commands are handled above"),
    };

    if let Err(ref e) = result {
        error!(error = %e.format_for_log(), "Exiting with error");
    }
    result
}

/// Flags on the command line beat every other source
fn apply_cli_overrides(config: &mut TaskpoolConfig, command: &Commands) {
    match command {
        Commands::Coordinator { slots, seed, .. } => {
            if let Some(slots) = slots {
                config.coordinator.slots = *slots;
            }
            if seed.is_some() {
                config.coordinator.seed = *seed;
            }
        }
        Commands::Worker { work_delay_ms, .. } => {
            if let Some(ms) = work_delay_ms {
                config.worker.work_delay_ms = *ms;
            }
        }
        Commands::Config { .. } => {}
    }
}

async fn run_coordinator(config: &TaskpoolConfig, addr: ChannelAddr) -> Result<()> {
    let signals = ShutdownSignals::install()?;
    let transport = Arc::new(UnixTransport::new(config.runtime_dir())?);

    let coordinator = Coordinator::bind(config.coordinator_config(), transport, &addr).await?;
    info!(addr = %coordinator.addr(), "Coordinator started");
    let stats = coordinator.run(signals.recv()).await?;

    debug!(?stats, "Coordinator finished");
    Ok(())
}

async fn run_worker(config: &TaskpoolConfig, addr: ChannelAddr) -> Result<()> {
    let signals = ShutdownSignals::install()?;
    let transport = UnixTransport::new(config.runtime_dir())?;
    let own = ChannelAddr::for_worker(std::process::id());

    let session = WorkerSession::start(config.session_config(), &transport, &addr, &own).await?;
    info!(coordinator = %addr, own = %own, "Worker started");

    match session.run(signals.recv()).await? {
        SessionEnd::Cancelled => Ok(()),
    }
}

fn handle_config_command(subcommand: &ConfigSubcommand, config_path: Option<&str>) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show => {
            let cfg = TaskpoolConfig::load(config_path)?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), *force)?;
            println!("Configuration file created: {}", written.display());
        }
        ConfigSubcommand::Validate => {
            let source = TaskpoolConfig::find_config_file(config_path)?;
            TaskpoolConfig::load(config_path)?;
            match source {
                Some(path) => println!("Configuration is valid: {}", path.display()),
                None => println!("Configuration is valid (defaults)."),
            }
        }
    }

    Ok(())
}
