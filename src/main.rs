//! Refresh Worker - queue-driven document refresh robot
//!
//! Seeds a work queue from an upstream table, then for each element downloads
//! the referenced document, refreshes it through an external application
//! under a hard timeout, and uploads the result back.

mod cli;
mod config;
mod controller;
mod environment;
mod error;
mod executor;
mod logging;
mod operation;
mod queue;
mod remote;
mod types;
mod version;

use std::sync::Arc;

use clap::Parser;
use tracing::{debug, info};

use crate::cli::{Cli, Commands, ConfigSubcommand};
use crate::config::{RemoteKind, WorkerConfig};
use crate::controller::{ControllerSettings, RetryController, RunState};
use crate::environment::HostEnvironment;
use crate::error::{Error, Result};
use crate::executor::{ExecutorSettings, TaskExecutor};
use crate::operation::{ExternalApplication, NameReaper, ProcessReaper};
use crate::queue::{seed_from_upstream, NewElement, QueueSource, SqliteQueue};
use crate::remote::{
    CertificateAuth, CredentialStore, Credentials, EnvCredentialStore, LocalStore, RemoteStore, SessionCache,
    SharePointStore, StaticCredentialStore,
};
use crate::types::TaskPayload;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = dispatch(cli) {
        debug!(error = %e.format_for_log(), "Worker stopped");
        eprint!("{}", e.format_for_terminal());
        std::process::exit(e.exit_code());
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    // Commands that need no configuration
    match &cli.command {
        Commands::Version => {
            version::print_version();
            return Ok(());
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            return handle_config_command(subcommand.clone());
        }
        _ => {}
    }

    let config_path = match &cli.command {
        Commands::Run { config, .. } | Commands::Seed { config } | Commands::Enqueue { config, .. } => {
            config.clone()
        }
        Commands::Version | Commands::Config { .. } => None,
    };

    let config = WorkerConfig::load(config_path.as_deref())?;

    // The guards must be kept alive for the lifetime of the program
    let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

    let build = version::build_info();
    info!(
        version = %build.full_version(),
        target = %build.target,
        "Starting refresh worker"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create runtime: {}", e)))?;

    match cli.command {
        Commands::Run { no_seed, .. } => runtime.block_on(run_worker(config, no_seed)),
        Commands::Seed { .. } => runtime.block_on(seed(config)),
        Commands::Enqueue {
            reference,
            data,
            queue,
            ..
        } => runtime.block_on(enqueue(config, reference, data, queue)),
        Commands::Version | Commands::Config { .. } => Ok(()),
    }
}

fn open_queue(config: &WorkerConfig) -> Result<Arc<SqliteQueue>> {
    Ok(Arc::new(SqliteQueue::open(
        &config.database_path(),
        &config.queue.upstream_table,
    )?))
}

fn build_sessions(config: &WorkerConfig) -> Result<SessionCache> {
    let (store, credentials): (Arc<dyn RemoteStore>, Arc<dyn CredentialStore>) = match config.remote.kind {
        RemoteKind::Sharepoint => {
            let credentials: Arc<dyn CredentialStore> = Arc::new(EnvCredentialStore);
            let auth = CertificateAuth::new(
                config.remote.authority.clone(),
                credentials.clone(),
                config.remote.certificate_credential.clone(),
            );
            let store = SharePointStore::new(
                std::time::Duration::from_secs(config.remote.request_timeout_secs),
                auth,
            )?;
            (Arc::new(store), credentials)
        }
        RemoteKind::Local => (
            Arc::new(LocalStore::new(&config.remote.local_root)),
            Arc::new(StaticCredentialStore(Credentials::new("local", ""))),
        ),
    };
    Ok(SessionCache::new(store, credentials, config.remote.credential.clone()))
}

async fn seed_queue(config: &WorkerConfig, queue: &SqliteQueue) -> Result<usize> {
    seed_from_upstream(
        queue,
        queue,
        &config.robot.queue_name,
        chrono::Utc::now(),
        chrono::Duration::hours(i64::from(config.queue.seed_interval_hours)),
    )
    .await
}

/// Seed, then process the queue under the retry controller
async fn run_worker(config: WorkerConfig, no_seed: bool) -> Result<()> {
    info!(
        queue = %config.robot.queue_name,
        max_retry_count = config.robot.max_retry_count,
        max_task_count = config.robot.max_task_count,
        program = %config.application.program,
        "Configuration loaded"
    );

    let queue = open_queue(&config)?;
    if !no_seed {
        seed_queue(&config, &queue).await?;
    }

    let sessions = Arc::new(build_sessions(&config)?);
    let reaper: Arc<dyn ProcessReaper> = Arc::new(NameReaper::new(&config.application.process_names));
    let executor = TaskExecutor::new(
        ExecutorSettings::from_config(&config),
        sessions.clone(),
        Arc::new(ExternalApplication::from_settings(&config.application)),
        reaper.clone(),
    );
    let environment = HostEnvironment::new(
        config.work_dir(),
        sessions,
        reaper,
        config.application.kill_settle(),
    )?;

    let controller = RetryController::new(
        queue,
        Arc::new(executor),
        Arc::new(environment),
        ControllerSettings::from(&config.robot),
    );

    let mut state = RunState::default();
    let report = controller.run(&mut state).await?;

    println!(
        "Processed {} element(s): {} done, {} failed (business), {} infrastructure error(s)",
        report.completed + report.business_failures,
        report.completed,
        report.business_failures,
        report.infrastructure_errors
    );
    Ok(())
}

async fn seed(config: WorkerConfig) -> Result<()> {
    let queue = open_queue(&config)?;
    let added = seed_queue(&config, &queue).await?;
    println!(
        "Queued {} element(s) from {} into {}",
        added, config.queue.upstream_table, config.robot.queue_name
    );
    Ok(())
}

async fn enqueue(
    config: WorkerConfig,
    reference: String,
    data: Option<String>,
    queue_name: Option<String>,
) -> Result<()> {
    if let Some(ref json) = data {
        serde_json::from_str::<TaskPayload>(json)?;
    }
    let queue_name = queue_name.unwrap_or_else(|| config.robot.queue_name.clone());

    let queue = open_queue(&config)?;
    queue
        .bulk_enqueue(&queue_name, vec![NewElement::new(reference.clone(), data)])
        .await?;

    info!(queue = %queue_name, reference = %reference, "Enqueued element");
    println!("Enqueued '{}' into {}", reference, queue_name);
    Ok(())
}

fn handle_config_command(subcommand: ConfigSubcommand) -> Result<()> {
    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = WorkerConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration written to {}", written.display());
        }
        ConfigSubcommand::Validate { config } => {
            WorkerConfig::load(config.as_deref())?;
            println!("Configuration is valid.");
        }
    }

    Ok(())
}
