//! callbridged: entry point.
//!
//! Accepts one authenticated TLS connection at a time from an IRC gateway and
//! relays its lines to a call/chat service's text API.
//!
//! # Usage
//!
//! ```text
//! callbridged [OPTIONS]
//!
//! Options:
//!   -c, --config <PATH>  Configuration file [default: see below]
//!   -H, --host <HOST>    Address to bind to (overrides [relay] host)
//!   -p, --port <PORT>    Port to bind to (overrides [relay] port)
//!   -l, --log <PATH>     Append log output to this file
//!   -n, --nofork         Run in the foreground
//!   -d, --debug          Enable debug logging
//!   -m, --mock <PATH>    Replay a transcript instead of the real service
//!   -V, --version        Print version
//! ```
//!
//! Without `--config` the file is looked up in
//! `$XDG_CONFIG_HOME/callbridged/`, `~/.config/callbridged/` and
//! `/usr/local/etc/callbridged/`, in that order.
//!
//! # Environment variable overrides
//!
//! | Variable             | Flag       |
//! |----------------------|------------|
//! | `CALLBRIDGE_CONFIG`  | `--config` |
//! | `CALLBRIDGE_HOST`    | `--host`   |
//! | `CALLBRIDGE_PORT`    | `--port`   |
//! | `CALLBRIDGE_LOG`     | `--log`    |
//! | `CALLBRIDGE_MOCK`    | `--mock`   |
//!
//! `RUST_LOG` overrides the level chosen by `--debug`.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use callbridged::infrastructure::external;
use callbridged::infrastructure::tls::load_acceptor;
use callbridged::infrastructure::{load_relay_config, Listener, Overrides, ShutdownSignal, Transport};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Authenticated line relay between an IRC gateway and a call/chat service.
#[derive(Debug, Parser)]
#[command(
    name = "callbridged",
    about = "TLS line relay between an IRC gateway and a call/chat service API",
    version
)]
struct Cli {
    /// Configuration file.
    #[arg(short = 'c', long, env = "CALLBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Host name or IP literal to bind to.
    #[arg(short = 'H', long, env = "CALLBRIDGE_HOST")]
    host: Option<String>,

    /// TCP port to bind to.
    #[arg(short = 'p', long, env = "CALLBRIDGE_PORT")]
    port: Option<u16>,

    /// Append log output to this file instead of stderr.
    #[arg(short = 'l', long, env = "CALLBRIDGE_LOG")]
    log: Option<PathBuf>,

    /// Stay in the foreground.
    ///
    /// The daemon never forks; the flag is accepted for compatibility with
    /// service scripts.
    #[arg(short = 'n', long)]
    nofork: bool,

    /// Log at debug level, including every relayed line.
    #[arg(short = 'd', long)]
    debug: bool,

    /// Replay this `>>` / `<<` transcript instead of talking to the service.
    #[arg(short = 'm', long, env = "CALLBRIDGE_MOCK")]
    mock: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            host: self.host.clone(),
            port: self.port,
            mock: self.mock.clone(),
        }
    }
}

// ── Logging ───────────────────────────────────────────────────────────────────

fn init_logging(debug: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

// ── Signals ───────────────────────────────────────────────────────────────────

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
                return;
            }
            Err(e) => warn!("cannot listen for SIGTERM: {e}"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for Ctrl+C signal: {e}");
        // Without a signal source, never resolve rather than shut down at once.
        std::future::pending::<()>().await;
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug, cli.log.as_deref())?;

    if let Err(e) = run(cli).await {
        error!("{e:#}");
        return Err(e);
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if !cli.nofork {
        debug!("background mode requested; running in the foreground without forking");
    }

    // ── Configuration (all fatal errors happen before binding) ────────────────
    let config = load_relay_config(cli.config.as_deref(), &cli.overrides())
        .context("configuration error")?;
    let acceptor = load_acceptor(&config.cert_path, &config.key_path)?;
    let (api, events) = external::start(&config.backend, config.event_queue_capacity)?;

    info!(
        "callbridged {} starting on {} for user {}",
        env!("CARGO_PKG_VERSION"),
        config.bind_target(),
        config.credentials.username()
    );

    // ── Graceful shutdown ─────────────────────────────────────────────────────
    let shutdown = Arc::new(ShutdownSignal::new());
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            info!("shutdown signal received");
            shutdown.trigger();
        });
    }

    // ── Accept loop ───────────────────────────────────────────────────────────
    let listener = Listener::bind(&config, Transport::Tls(acceptor), api, events, shutdown).await?;
    let summary = listener.run().await?;

    info!(
        "callbridged stopped after {} connection(s), {} authenticated",
        summary.accepted, summary.authenticated
    );
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
