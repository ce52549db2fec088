//! scalesync CLI - Command line interface for the sync engine.
//!
//! This tool pushes measurements from a ledger export to the configured
//! targets, replays inbound commands and manages the target configuration.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use scalesync_common::{Measurement, User, UserId};
use scalesync_sync::{
    resolve_user, BatchReport, BatchStatus, CommandDispatcher, DispatchOutcome, InboundCommand,
    JsonFileLedger, LedgerGateway, Orchestrator, SyncConfig, TargetOutcome,
};
use scalesync_targets::create_default_registry;

#[derive(Parser)]
#[command(name = "scalesync")]
#[command(about = "scalesync - Push body-composition measurements to sync targets")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (default: <config dir>/scalesync/config.json).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Ledger export (default: <data dir>/scalesync/ledger.json).
    #[arg(short, long, global = true)]
    ledger: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Fields of a measurement given on the command line.
#[derive(clap::Args)]
struct MeasurementArgs {
    /// Timestamp, RFC 3339 or epoch milliseconds.
    #[arg(short, long)]
    date: String,

    /// Weight in kg.
    #[arg(short, long)]
    weight: f64,

    /// Body fat in percent.
    #[arg(long, default_value_t = 0.0)]
    fat: f64,

    /// Body water in percent.
    #[arg(long, default_value_t = 0.0)]
    water: f64,

    /// Muscle in percent.
    #[arg(long, default_value_t = 0.0)]
    muscle: f64,
}

#[derive(Subcommand)]
enum Commands {
    /// Show configured targets.
    Status,

    /// Connect every enabled target.
    Connect,

    /// Push all measurements of the selected user.
    FullSync,

    /// Push a new measurement.
    Insert {
        #[command(flatten)]
        measurement: MeasurementArgs,

        /// Also store the weight in the ledger for the selected user.
        #[arg(long)]
        record: bool,
    },

    /// Push a changed measurement.
    Update {
        #[command(flatten)]
        measurement: MeasurementArgs,
    },

    /// Delete the measurement at a timestamp from every target.
    Delete {
        /// Timestamp, RFC 3339 or epoch milliseconds.
        #[arg(short, long)]
        date: String,
    },

    /// Remove all data written by scalesync from every target.
    Clear,

    /// Apply an inbound command given as key=value extras or JSON.
    Command {
        /// Extras such as mode=insert userId=1 weight=70.5 date=1704441600000.
        extras: Vec<String>,

        /// Command as a JSON object with the same keys.
        #[arg(long, conflicts_with = "extras")]
        json: Option<String>,
    },

    /// List ledger users.
    Users,

    /// Save the user to sync, or clear the selection.
    SelectUser {
        /// User id; omit to fall back to the first user.
        id: Option<i64>,
    },

    /// Enable a target in the configuration file.
    Enable {
        /// Target name.
        name: String,
    },

    /// Disable a target in the configuration file.
    Disable {
        /// Target name.
        name: String,
    },

    /// Create an empty ledger export.
    InitLedger {
        /// Users as id=name.
        #[arg(short, long = "user", required = true)]
        users: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = match cli.config {
        Some(path) => path,
        None => SyncConfig::default_path().context("No configuration directory available")?,
    };
    let ledger_path = match cli.ledger {
        Some(path) => path,
        None => dirs::data_dir()
            .map(|dir| dir.join("scalesync").join("ledger.json"))
            .context("No data directory available")?,
    };

    match cli.command {
        Commands::Status => cmd_status(&config_path).await,

        Commands::Connect => cmd_connect(&config_path).await,

        Commands::FullSync => cmd_full_sync(&config_path, &ledger_path).await,

        Commands::Insert {
            measurement,
            record,
        } => cmd_insert(&config_path, &ledger_path, &measurement, record).await,

        Commands::Update { measurement } => cmd_update(&config_path, &measurement).await,

        Commands::Delete { date } => cmd_delete(&config_path, &date).await,

        Commands::Clear => cmd_clear(&config_path).await,

        Commands::Command { extras, json } => {
            cmd_command(&config_path, &ledger_path, &extras, json.as_deref()).await
        }

        Commands::Users => cmd_users(&ledger_path).await,

        Commands::SelectUser { id } => cmd_select_user(&ledger_path, id).await,

        Commands::Enable { name } => cmd_set_enabled(&config_path, &name, true).await,

        Commands::Disable { name } => cmd_set_enabled(&config_path, &name, false).await,

        Commands::InitLedger { users } => cmd_init_ledger(&ledger_path, &users).await,
    }
}

/// Parse RFC 3339 or epoch milliseconds.
fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(millis) = value.trim().parse::<i64>() {
        return DateTime::<Utc>::from_timestamp_millis(millis)
            .with_context(|| format!("Timestamp out of range: {}", value));
    }
    let parsed = DateTime::parse_from_rfc3339(value.trim())
        .with_context(|| format!("Invalid timestamp: {}", value))?;
    Ok(parsed.with_timezone(&Utc))
}

fn to_measurement(args: &MeasurementArgs) -> Result<Measurement> {
    Ok(Measurement::new(
        parse_date(&args.date)?,
        args.weight,
        args.fat,
        args.water,
        args.muscle,
    ))
}

async fn load_orchestrator(config_path: &Path) -> Result<Orchestrator> {
    let config = SyncConfig::load(config_path)
        .await
        .with_context(|| format!("Failed to load configuration {}", config_path.display()))?;
    if config.targets.is_empty() {
        info!("No targets configured in {}", config_path.display());
    }

    let registry = create_default_registry();
    Orchestrator::from_config(&config, &registry).context("Failed to set up targets")
}

async fn open_ledger(ledger_path: &Path) -> Result<JsonFileLedger> {
    JsonFileLedger::open(ledger_path)
        .await
        .with_context(|| format!("Failed to open ledger {}", ledger_path.display()))
}

/// Print per-target outcomes and fail unless every attempted target succeeded.
fn report(batch: &BatchReport) -> Result<()> {
    println!("{} ({}):", batch.operation, batch.id);
    for (name, outcome) in &batch.outcomes {
        match outcome {
            TargetOutcome::Skipped => println!("  {}: skipped (disabled)", name),
            TargetOutcome::Succeeded => println!("  {}: ok", name),
            TargetOutcome::Failed(failure) => println!("  {}: {}", name, failure.user_message()),
        }
    }

    match batch.status() {
        BatchStatus::NothingToDo => {
            println!("No enabled targets.");
            Ok(())
        }
        BatchStatus::Succeeded => Ok(()),
        BatchStatus::PartialFailure | BatchStatus::Failed => {
            let failed = batch.failures().count();
            anyhow::bail!("{} of {} targets failed", failed, batch.outcomes.len())
        }
    }
}

/// Run one operation, then close every session.
async fn run_batch<F, Fut>(orchestrator: Orchestrator, operation: F) -> Result<()>
where
    F: FnOnce(Arc<Orchestrator>) -> Fut,
    Fut: std::future::Future<Output = Result<BatchReport>>,
{
    let orchestrator = Arc::new(orchestrator);
    let result = operation(orchestrator.clone()).await;
    orchestrator.close_all().await;
    report(&result?)
}

/// Show configured targets.
async fn cmd_status(config_path: &Path) -> Result<()> {
    let orchestrator = load_orchestrator(config_path).await?;

    println!("Configuration: {}", config_path.display());
    println!(
        "Operation timeout: {}s",
        orchestrator.operation_timeout().as_secs()
    );
    let states = orchestrator.states().await;
    if states.is_empty() {
        println!("No targets configured.");
    }
    for state in states {
        println!("  {}: {}", state.name, state.connection);
    }

    Ok(())
}

/// Connect every enabled target.
async fn cmd_connect(config_path: &Path) -> Result<()> {
    let orchestrator = load_orchestrator(config_path).await?;
    run_batch(orchestrator, |o| async move { Ok(o.connect_all().await) }).await
}

/// Push every measurement of the selected user.
async fn cmd_full_sync(config_path: &Path, ledger_path: &Path) -> Result<()> {
    let orchestrator = load_orchestrator(config_path).await?;
    let ledger = open_ledger(ledger_path).await?;

    run_batch(orchestrator, |o| async move {
        o.full_sync(&ledger).await.context("Full sync failed")
    })
    .await
}

/// Push a new measurement, optionally recording it in the ledger first.
async fn cmd_insert(
    config_path: &Path,
    ledger_path: &Path,
    args: &MeasurementArgs,
    record: bool,
) -> Result<()> {
    let mut measurement = to_measurement(args)?;

    if record {
        let ledger = open_ledger(ledger_path).await?;
        let user = resolve_user(&ledger)
            .await
            .context("No ledger user to record for")?;
        let id = ledger
            .insert_measurement(measurement.timestamp, measurement.weight, user.id)
            .await
            .context("Failed to record measurement")?;
        info!("Recorded measurement {} for {}", id, user.username);
        measurement = measurement.with_id(id);
    }

    let orchestrator = load_orchestrator(config_path).await?;
    run_batch(orchestrator, |o| async move { Ok(o.insert(measurement).await) }).await
}

/// Push a changed measurement.
async fn cmd_update(config_path: &Path, args: &MeasurementArgs) -> Result<()> {
    let measurement = to_measurement(args)?;
    let orchestrator = load_orchestrator(config_path).await?;
    run_batch(orchestrator, |o| async move { Ok(o.update(measurement).await) }).await
}

/// Delete the measurement at a timestamp.
async fn cmd_delete(config_path: &Path, date: &str) -> Result<()> {
    let timestamp = parse_date(date)?;
    let orchestrator = load_orchestrator(config_path).await?;
    run_batch(orchestrator, |o| async move { Ok(o.delete(timestamp).await) }).await
}

/// Remove all scalesync data from every target.
async fn cmd_clear(config_path: &Path) -> Result<()> {
    let orchestrator = load_orchestrator(config_path).await?;
    run_batch(orchestrator, |o| async move { Ok(o.clear().await) }).await
}

/// Apply an inbound command through the dispatcher.
async fn cmd_command(
    config_path: &Path,
    ledger_path: &Path,
    extras: &[String],
    json: Option<&str>,
) -> Result<()> {
    let command = match json {
        Some(json) => InboundCommand::from_json(json)?,
        None => {
            let mut pairs = HashMap::new();
            for extra in extras {
                let (key, value) = extra
                    .split_once('=')
                    .with_context(|| format!("Expected key=value, got '{}'", extra))?;
                pairs.insert(key.to_string(), value.to_string());
            }
            InboundCommand::from_extras(&pairs)?
        }
    };
    info!("Applying {} command", command.mode);

    let orchestrator = Arc::new(load_orchestrator(config_path).await?);
    let ledger: Arc<dyn LedgerGateway> = Arc::new(open_ledger(ledger_path).await?);

    let (dispatcher, handle) = CommandDispatcher::new();
    let worker = tokio::spawn(handle.run(orchestrator.clone(), ledger));

    let outcome = dispatcher.submit(command).await;
    dispatcher.shutdown().await;
    worker.await.context("Dispatcher task failed")?;
    orchestrator.close_all().await;

    match outcome.context("Command failed")? {
        DispatchOutcome::Applied(batch) => report(&batch),
        DispatchOutcome::Ignored { reason } => {
            println!("Ignored: {}", reason);
            Ok(())
        }
    }
}

/// List ledger users.
async fn cmd_users(ledger_path: &Path) -> Result<()> {
    let ledger = open_ledger(ledger_path).await?;
    let users = ledger.list_users().await?;
    let selected = resolve_user(&ledger).await.ok().map(|user| user.id);

    if users.is_empty() {
        println!("No users in ledger.");
    }
    for user in users {
        let marker = if Some(user.id) == selected { "*" } else { " " };
        println!("{} {} {}", marker, user.id, user.username);
    }

    Ok(())
}

/// Save or clear the selected user.
async fn cmd_select_user(ledger_path: &Path, id: Option<i64>) -> Result<()> {
    let ledger = open_ledger(ledger_path).await?;
    let user = id.map(UserId::new);

    if let Some(user) = user {
        let users = ledger.list_users().await?;
        if !users.iter().any(|u| u.id == user) {
            anyhow::bail!("No user with id {} in ledger", user);
        }
    }

    ledger
        .set_selected_user_id(user)
        .await
        .context("Failed to save selection")?;

    match user {
        Some(user) => println!("Selected user {}", user),
        None => println!("Selection cleared"),
    }

    Ok(())
}

/// Enable or disable a target in the configuration file.
async fn cmd_set_enabled(config_path: &Path, name: &str, enabled: bool) -> Result<()> {
    let mut config = SyncConfig::load(config_path).await?;
    config.set_enabled(name, enabled)?;
    config
        .save(config_path)
        .await
        .context("Failed to save configuration")?;

    println!(
        "Target {} {}",
        name,
        if enabled { "enabled" } else { "disabled" }
    );

    Ok(())
}

/// Create an empty ledger export.
async fn cmd_init_ledger(ledger_path: &Path, users: &[String]) -> Result<()> {
    if ledger_path.exists() {
        anyhow::bail!("Ledger already exists: {}", ledger_path.display());
    }

    let users = users
        .iter()
        .map(|spec| {
            let (id, name) = spec
                .split_once('=')
                .with_context(|| format!("Expected id=name, got '{}'", spec))?;
            let id: i64 = id
                .trim()
                .parse()
                .with_context(|| format!("Invalid user id '{}'", id))?;
            Ok(User {
                id: UserId::new(id),
                username: name.trim().to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    JsonFileLedger::create(ledger_path, users)
        .await
        .context("Failed to create ledger")?;

    println!("Ledger created: {}", ledger_path.display());

    Ok(())
}
