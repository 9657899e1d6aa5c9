//! MergeWarn agent entry point.
//!
//! Loads configuration, connects to the shared store, runs the publish and
//! listen loops, and handles graceful shutdown. Conflict records go to
//! stdout; logs go to stderr.

mod signals;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mergewarn_core::agent::{resolve_participant, Agent};
use mergewarn_core::config::{AppConfig, TransportKind, TriggerMode};
use mergewarn_core::{shutdown, store};

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// MergeWarn agent.
#[derive(Parser, Debug)]
#[command(
    name = "mergewarn",
    version,
    about = "Publish your uncommitted line edits and get warned when a teammate touches the same lines"
)]
struct Args {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<String>,

    /// Shared store address (host:port or redis:// URL).
    #[arg(long)]
    uri: Option<String>,

    /// Repository directory to track.
    #[arg(short, long)]
    dir: Option<String>,

    /// Participant identity (defaults to git user.email, then user.name).
    #[arg(short, long)]
    user: Option<String>,

    /// Base branch every participant diffs against.
    #[arg(short, long)]
    base: Option<String>,

    /// Rebuild on filesystem events instead of polling.
    #[arg(long)]
    watch: bool,

    /// Also compare against our own published edits (single-user testing).
    #[arg(long)]
    self_compare: bool,

    /// Use an in-process store instead of Redis.
    #[arg(long)]
    memory: bool,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// Command-line flags win over file values.
    fn apply(&self, config: &mut AppConfig) {
        if let Some(ref uri) = self.uri {
            config.transport.url = uri.clone();
        }
        if let Some(ref dir) = self.dir {
            config.repo.path = PathBuf::from(expand_tilde(dir));
        }
        if let Some(ref user) = self.user {
            config.agent.participant = Some(user.clone());
        }
        if let Some(ref base) = self.base {
            config.repo.base_branch = base.clone();
        }
        if self.watch {
            config.agent.trigger = TriggerMode::Watch;
        }
        if self.self_compare {
            config.agent.self_compare = true;
        }
        if self.memory {
            config.transport.kind = TransportKind::Memory;
        }
        if let Some(ref level) = self.log_level {
            config.agent.log_level = level.clone();
        }
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}/{}", home.display(), rest);
        }
    }
    path.to_string()
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match args.config {
        Some(ref path) => AppConfig::load_from_file(expand_tilde(path))
            .context("failed to load configuration file")?,
        None => AppConfig::default(),
    };
    args.apply(&mut config);

    // Logs go to stderr; stdout carries conflict records only.
    let filter = EnvFilter::try_new(&config.agent.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .init();

    config
        .resolve_env_vars()
        .context("failed to resolve environment variables in config")?;
    let participant =
        resolve_participant(&config).context("failed to determine participant identity")?;
    config.agent.participant = Some(participant.clone());
    config
        .validate()
        .context("configuration validation failed")?;

    // Startup banner
    info!("========================================");
    info!("  MergeWarn v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    if let Some(ref path) = args.config {
        info!("Config file   : {}", path);
    }
    info!("Participant   : {}", participant);
    info!("Repository    : {}", config.repo.path.display());
    info!("Base branch   : {}", config.repo.base_branch);
    info!("Branch mode   : {:?}", config.repo.branch_mode);
    match config.agent.trigger {
        TriggerMode::Poll => info!("Trigger       : poll every {}s", config.agent.poll_interval_secs),
        TriggerMode::Watch => info!("Trigger       : filesystem events"),
    }
    match config.transport.kind {
        TransportKind::Redis => info!("Store         : redis {}", config.transport.url),
        TransportKind::Memory => info!("Store         : in-process"),
    }
    info!("Hash / channel: {} / {}", config.transport.hash_key, config.transport.channel);
    info!("Self compare  : {}", config.agent.self_compare);
    info!("Log level     : {}", config.agent.log_level);
    info!("========================================");

    let store = store::connect(&config.transport)
        .await
        .context("failed to connect to shared store")?;
    let agent = Agent::from_config(config, Arc::clone(&store)).context("failed to build agent")?;

    let (trigger, shutdown) = shutdown::channel();
    let mut agent_handle = tokio::spawn(agent.run(shutdown));

    tokio::select! {
        _ = signals::wait_for_shutdown() => {
            info!("Shutdown signal received, stopping...");
            trigger.trigger();

            // Let the current cycle and evaluation finish (up to 10s)
            match tokio::time::timeout(Duration::from_secs(10), &mut agent_handle).await {
                Ok(Ok(Ok(stats))) => info!(
                    cycles = stats.publish.total_cycles,
                    published = stats.publish.published,
                    reports = stats.listen.reports,
                    "agent stopped gracefully"
                ),
                Ok(Ok(Err(e))) => return Err(e).context("agent failed during shutdown"),
                Ok(Err(e)) => warn!("agent task error: {}", e),
                Err(_) => {
                    warn!("agent did not stop within 10s, forcing shutdown");
                    agent_handle.abort();
                }
            }
        }
        joined = &mut agent_handle => {
            // The agent only returns on its own after a fatal error.
            let result = joined.context("agent task panicked")?;
            result.context("agent stopped with a fatal error")?;
        }
    }

    info!("MergeWarn stopped.");
    Ok(())
}
