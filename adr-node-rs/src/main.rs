//! ADR Node - CLI for the demand-response coordinator
//!
//! Runs a VTN coordinator and one VEN agent connected by an in-process link,
//! and inspects the coordinator's database.
//!
//! # Usage
//!
//! ```bash
//! # Run with defaults (SQLite at ./database/openleadr.db)
//! adr-node run
//!
//! # Everything in memory, constant reading below the threshold
//! adr-node --memory run --fixed 150
//!
//! # Create the schema and reserve a name
//! adr-node init-db --ven ven123
//!
//! # Inspect registrations and stored telemetry
//! adr-node vens
//! adr-node samples --resource <resource-id> --json
//! ```
//!
//! `SERVER_NAME`, `VEN_NAME`, `VTN_URL` and `DB_NAME` may be set in the
//! environment or in a `.env` file.

mod link;
mod monitor;

use adr_core::{
    ChannelSink, Coordinator, FixedMeasurement, MeasurementProvider, MemoryStore, NodeConfig,
    RandomMeasurement, SqliteStore, Store, StoreConfig, StoreError, VenAgent,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use crate::link::LoopbackLink;
use crate::monitor::Monitor;

/// Demand-response coordination node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// VTN identity
    #[arg(long, env = "SERVER_NAME", default_value = "openleadr-server", global = true)]
    server_name: String,

    /// Name the VEN registers under
    #[arg(long, env = "VEN_NAME", default_value = "ven123", global = true)]
    ven_name: String,

    /// Coordinator endpoint announced by the VEN
    #[arg(
        long,
        env = "VTN_URL",
        default_value = "http://localhost:8080/OpenADR2/Simple/2.0b",
        global = true
    )]
    vtn_url: String,

    /// SQLite database path
    #[arg(long, env = "DB_NAME", default_value = "./database/openleadr.db", global = true)]
    db: PathBuf,

    /// Keep all state in memory (run only)
    #[arg(long, global = true)]
    memory: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run coordinator and VEN agent (default)
    Run {
        /// VEN sampling rate in seconds
        #[arg(long, default_value = "10")]
        sampling_rate: u64,

        /// Measurement collection timeout in seconds
        #[arg(long, default_value = "5")]
        collect_timeout: u64,

        /// Report this constant instead of random readings
        #[arg(long)]
        fixed: Option<f64>,

        /// Trigger threshold
        #[arg(long, default_value = "200")]
        threshold: f64,

        /// Display poll interval in milliseconds
        #[arg(long, default_value = "1000", value_parser = clap::value_parser!(u64).range(1..))]
        poll_ms: u64,

        /// Disable the display poller
        #[arg(long)]
        no_monitor: bool,
    },

    /// Create the database schema
    InitDb {
        /// Names to reserve (can be repeated)
        #[arg(long)]
        ven: Vec<String>,
    },

    /// List registered VENs
    Vens,

    /// Print the stored samples of a resource
    Samples {
        /// Resource id issued at registration
        #[arg(short, long)]
        resource: String,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt().with_env_filter(filter).with_target(false).init();

    let mut config = NodeConfig::new(&cli.server_name, &cli.ven_name, &cli.vtn_url, &cli.db);
    if cli.memory {
        config = config.in_memory();
    }

    match cli.command {
        None => run(config, RunOptions::default()).await,
        Some(Commands::Run {
            sampling_rate,
            collect_timeout,
            fixed,
            threshold,
            poll_ms,
            no_monitor,
        }) => {
            let options = RunOptions {
                sampling_rate: Duration::from_secs(sampling_rate),
                collect_timeout: Duration::from_secs(collect_timeout),
                fixed,
                threshold,
                poll_interval: Duration::from_millis(poll_ms),
                monitor: !no_monitor,
            };
            run(config, options).await
        }
        Some(Commands::InitDb { ven }) => init_db(&cli.db, &ven).await,
        Some(Commands::Vens) => list_vens(&cli.db).await,
        Some(Commands::Samples { resource, json }) => print_samples(&cli.db, &resource, json).await,
    }
}

struct RunOptions {
    sampling_rate: Duration,
    collect_timeout: Duration,
    fixed: Option<f64>,
    threshold: f64,
    poll_interval: Duration,
    monitor: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        let config = NodeConfig::default();
        Self {
            sampling_rate: config.ven.sampling_rate,
            collect_timeout: config.ven.collect_timeout,
            fixed: None,
            threshold: config.vtn.trigger_threshold,
            poll_interval: config.monitor.poll_interval,
            monitor: config.monitor.enabled,
        }
    }
}

fn open_store(config: &StoreConfig) -> Result<Arc<dyn Store>, StoreError> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreConfig::Sqlite { path } => Ok(Arc::new(SqliteStore::open(path)?)),
    }
}

async fn run(config: NodeConfig, options: RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = config
        .with_sampling_rate(options.sampling_rate)
        .with_poll_interval(options.poll_interval);
    config.ven.collect_timeout = options.collect_timeout;
    config.vtn.trigger_threshold = options.threshold;
    if !options.monitor {
        config = config.without_monitor();
    }

    let store_label = match &config.store {
        StoreConfig::Memory => "memory".to_string(),
        StoreConfig::Sqlite { path } => path.display().to_string(),
    };

    // Print banner
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║            ADR Node - Demand-Response Coordination           ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  VTN:       {:<49} ║", config.vtn.server_name);
    println!("║  VEN:       {:<49} ║", config.ven.ven_name);
    println!("║  VTN URL:   {:<49} ║", truncate(&config.ven.vtn_url, 49));
    println!("║  Store:     {:<49} ║", truncate(&store_label, 49));
    println!("║  Sampling:  {:<49} ║", format!("{:?}", config.ven.sampling_rate));
    println!("║  Threshold: {:<49} ║", config.vtn.trigger_threshold);
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let store = open_store(&config.store)?;
    let (sink, notices) = ChannelSink::new(64);
    let coordinator = Arc::new(Coordinator::new(config.vtn.clone(), store.clone(), Arc::new(sink)));

    let provider: Arc<dyn MeasurementProvider> = match options.fixed {
        Some(value) => Arc::new(FixedMeasurement(value)),
        None => Arc::new(RandomMeasurement::default()),
    };
    let agent = Arc::new(VenAgent::new(config.ven.clone(), provider));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if config.monitor.enabled {
        let monitor = Monitor::new(
            store.clone(),
            coordinator.current_resource(),
            config.monitor.poll_interval,
        );
        tokio::spawn(monitor.run(shutdown_rx.clone()));
    }

    let link = LoopbackLink::new(coordinator.clone(), agent, notices);
    let mut link_task = tokio::spawn(link.run(shutdown_rx));

    info!("Node running, press Ctrl+C to stop");

    tokio::select! {
        result = &mut link_task => {
            let _ = shutdown_tx.send(true);
            if let Err(e) = result? {
                error!("Link stopped: {}", e);
                return Err(e.into());
            }
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutting down...");
            let _ = shutdown_tx.send(true);
            link_task.await??;
        }
    }

    let events = coordinator.events();
    let pending = events.iter().filter(|e| !e.decision.is_terminal()).count();
    info!(
        "Raised {} event(s), {} still pending, {} subscription(s)",
        events.len(),
        pending,
        coordinator.subscriptions().len()
    );

    Ok(())
}

async fn init_db(path: &Path, names: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteStore::open(path)?;
    println!("Initialized {}", store.path().display());

    for name in names {
        if store.provision(name).await? {
            println!("Reserved {}", name);
        } else {
            println!("{} already present", name);
        }
    }
    Ok(())
}

async fn list_vens(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteStore::open(path)?;
    let identities = store.list_identities().await?;

    if identities.is_empty() {
        println!("No VENs registered");
        return Ok(());
    }

    println!("{:<20} {:<38} {:<38}", "NAME", "RESOURCE ID", "REGISTRATION ID");
    for identity in identities {
        println!(
            "{:<20} {:<38} {:<38}",
            identity.name, identity.resource_id, identity.registration_id
        );
    }
    Ok(())
}

async fn print_samples(
    path: &Path,
    resource_id: &str,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteStore::open(path)?;
    let samples = store.query_by_resource(resource_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&samples)?);
        return Ok(());
    }

    if samples.is_empty() {
        println!("No samples for {}", resource_id);
        return Ok(());
    }

    println!("{:<32} {:<12} {}", "TIME", "DEVICE", "VALUE");
    for sample in samples {
        println!(
            "{:<32} {:<12} {}",
            sample.timestamp.to_rfc3339(),
            sample.report_resource_id,
            sample.value
        );
    }
    Ok(())
}

/// Truncate string with ellipsis
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
