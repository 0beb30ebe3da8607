//! kvsession CLI - operator tool for stored sessions
//!
//! Creates, inspects and edits sessions held in the backing key-value store.

use anyhow::Context;
use clap::{Parser, Subcommand};
use kvsession_core::{
    config_error, init_logging, log_operation_error, log_operation_start,
    log_operation_success, performance::measure_async, persistence_error, BackendKind,
    ErrorContext, KvSessionConfig, Session, SessionError, SessionManager, SessionResult, Value,
};
use kvsession_store::{
    create_manager_from_config, CachedSession, CachedSessionManager, Command, ConnectionPool,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "kvsession")]
#[command(about = "Inspect and edit sessions in a key-value backing store")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backing store address (host:port), overrides the configuration
    #[arg(short, long)]
    address: Option<String>,

    /// Backing store password, overrides the configuration
    #[arg(short, long)]
    password: Option<String>,

    /// Session backend (local or cached), overrides the configuration
    #[arg(short, long)]
    backend: Option<BackendKind>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a session, optionally seed it, and save it
    Create {
        /// Attribute to set (key=value, repeatable)
        #[arg(long = "set")]
        assignments: Vec<String>,
    },

    /// Print the stored attributes of a session (cached backend only)
    Show {
        /// Session ID
        id: String,
    },

    /// Set attributes on a stored session (cached backend only)
    Set {
        /// Session ID
        id: String,

        /// Attributes as key=value; values are parsed as JSON when possible
        #[arg(required = true)]
        assignments: Vec<String>,
    },

    /// Delete attributes from a stored session (cached backend only)
    Del {
        /// Session ID
        id: String,

        /// Keys to delete
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Check that the backing store is reachable
    Ping,

    /// Manage configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Initialize default configuration
        #[arg(long)]
        init: bool,

        /// Validate current configuration
        #[arg(long)]
        validate: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_ref())?;
    if let Some(address) = cli.address {
        config.store.address = address;
    }
    if let Some(password) = cli.password {
        config.store.password = Some(password);
    }
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }

    let mut logging_config = config.logging.clone();
    if cli.verbose {
        logging_config.level = "debug".to_string();
    }
    init_logging(&logging_config).map_err(|e| SessionError::Config {
        message: format!("Failed to initialize logging: {}", e),
        source: Some(e),
        context: ErrorContext::new("cli")
            .with_operation("init_logging")
            .with_suggestion("Check the [logging] section of the configuration"),
    })?;

    info!("Starting kvsession CLI v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Create { assignments } => handle_create(&assignments, &config).await?,
        Commands::Show { id } => handle_show(&id, &config).await?,
        Commands::Set { id, assignments } => handle_set(&id, &assignments, &config).await?,
        Commands::Del { id, keys } => handle_del(&id, &keys, &config).await?,
        Commands::Ping => handle_ping(&config).await?,
        Commands::Config {
            show,
            init,
            validate,
        } => handle_config(show, init, validate, &config)
            .await
            .context("config command failed")?,
    }

    Ok(())
}

fn load_config(config_path: Option<&PathBuf>) -> SessionResult<KvSessionConfig> {
    if let Some(path) = config_path {
        return KvSessionConfig::from_file(path);
    }

    let default_paths = [
        dirs::config_dir().map(|d| d.join("kvsession").join("config.toml")),
        dirs::home_dir().map(|d| d.join(".kvsession").join("config.toml")),
        Some(PathBuf::from("kvsession.toml")),
    ];

    for path in default_paths.iter().flatten() {
        if path.exists() {
            return KvSessionConfig::from_file(path);
        }
    }

    Ok(KvSessionConfig::default())
}

fn get_config_path() -> SessionResult<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|d| d.join(".config")))
        .map(|d| d.join("kvsession").join("config.toml"))
        .ok_or_else(|| config_error!("Could not determine a configuration directory", "cli"))
}

/// Parse `key=value`; the value is JSON when it parses, otherwise a string
fn parse_assignment(assignment: &str) -> SessionResult<(String, Value)> {
    let Some((key, raw)) = assignment.split_once('=') else {
        return Err(SessionError::Config {
            message: format!("Invalid assignment '{}'. Use key=value format", assignment),
            source: None,
            context: ErrorContext::new("cli")
                .with_operation("parse_assignment")
                .with_suggestion("Example: --set user=alice or visits=3"),
        });
    };
    if key.is_empty() {
        return Err(config_error!(
            format!("Missing key in assignment '{}'", assignment),
            "cli"
        ));
    }
    Ok((key.to_string(), parse_value(raw)))
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn store_pool(config: &KvSessionConfig) -> ConnectionPool {
    ConnectionPool::tcp(
        &config.store.address,
        config.store.password.clone().filter(|p| !p.is_empty()),
        config.pool.clone(),
    )
}

/// Load a stored session through a cached manager. Sessions of the local
/// backend die with the process that created them, so only the cached
/// backend can be reopened.
async fn open_stored_session(
    id: &str,
    config: &KvSessionConfig,
) -> SessionResult<Arc<CachedSession>> {
    if config.backend != BackendKind::Cached {
        return Err(config_error!(
            format!(
                "Reopening a stored session requires the cached backend, not '{}'",
                config.backend.as_str()
            ),
            "cli"
        ));
    }
    config.validate()?;

    let mut manager = CachedSessionManager::with_pool_config(config.pool.clone());
    manager
        .init(&config.store.address, &config.init_options())
        .await?;
    manager.load_session(id).await.map_err(|e| {
        log_operation_error!("load_session", e, session_id = %id);
        e
    })
}

async fn handle_create(assignments: &[String], config: &KvSessionConfig) -> SessionResult<()> {
    log_operation_start!("create_session", backend = config.backend.as_str());

    let attributes = assignments
        .iter()
        .map(|a| parse_assignment(a))
        .collect::<SessionResult<Vec<_>>>()?;

    let manager = create_manager_from_config(config).await?;
    let session = manager.create_session().await?;
    for (key, value) in attributes {
        session.set(&key, value).await?;
    }
    measure_async("save_session", session.save())
        .await
        .map_err(|e| {
            log_operation_error!("save_session", e, session_id = %session.id());
            e
        })?;

    println!("{}", session.id());
    log_operation_success!("create_session", session_id = %session.id());
    Ok(())
}

async fn handle_show(id: &str, config: &KvSessionConfig) -> SessionResult<()> {
    let session = open_stored_session(id, config).await?;
    let attributes = session.snapshot().await;
    let rendered = serde_json::to_string_pretty(&attributes)
        .map_err(|e| persistence_error!("Failed to render session", "cli", e))?;
    println!("{}", rendered);
    Ok(())
}

async fn handle_set(
    id: &str,
    assignments: &[String],
    config: &KvSessionConfig,
) -> SessionResult<()> {
    log_operation_start!("set_attributes", session_id = %id);

    let attributes = assignments
        .iter()
        .map(|a| parse_assignment(a))
        .collect::<SessionResult<Vec<_>>>()?;

    let session = open_stored_session(id, config).await?;
    for (key, value) in attributes {
        println!("{} = {}", key, value);
        session.set(&key, value).await?;
    }
    measure_async("save_session", session.save()).await?;

    log_operation_success!("set_attributes", session_id = %id, count = assignments.len());
    Ok(())
}

async fn handle_del(id: &str, keys: &[String], config: &KvSessionConfig) -> SessionResult<()> {
    log_operation_start!("delete_attributes", session_id = %id);

    let session = open_stored_session(id, config).await?;
    for key in keys {
        session.del(key).await?;
    }
    measure_async("save_session", session.save()).await?;

    println!("Deleted {} key(s) from {}", keys.len(), id);
    log_operation_success!("delete_attributes", session_id = %id, count = keys.len());
    Ok(())
}

async fn handle_ping(config: &KvSessionConfig) -> SessionResult<()> {
    let pool = store_pool(config);
    let mut connection = pool.get().await.map_err(|e| {
        e.log();
        e
    })?;
    let reply = measure_async("ping", connection.execute(&Command::ping())).await?;
    drop(connection);

    println!("{} -> {:?}", pool.address(), reply);
    let stats = serde_json::to_string(&pool.stats())
        .map_err(|e| persistence_error!("Failed to render pool stats", "cli", e))?;
    println!("{}", stats);
    Ok(())
}

async fn handle_config(
    show: bool,
    init: bool,
    validate: bool,
    config: &KvSessionConfig,
) -> SessionResult<()> {
    if init {
        let config_path = get_config_path()?;
        if let Some(config_dir) = config_path.parent() {
            tokio::fs::create_dir_all(config_dir).await?;
        }

        KvSessionConfig::default().save_to_file(&config_path)?;
        println!("Configuration initialized at: {:?}", config_path);
        println!("Edit store.address and store.password to point at your backing store.");
    }

    if show {
        let rendered = toml::to_string_pretty(config).map_err(|e| SessionError::Config {
            message: format!("Failed to render configuration: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("cli").with_operation("config_show"),
        })?;
        println!("{}", rendered);
    }

    if validate {
        match config.validate() {
            Ok(()) => println!("Configuration is valid"),
            Err(e) => {
                println!("Configuration validation failed: {}", e);
                return Err(e);
            }
        }
    }

    Ok(())
}
