//! app-guard - single-instance launcher and message sender
//!
//! # Usage
//!
//! ```bash
//! # First copy becomes primary and logs what it receives
//! app-guard run --handle org.example.editor --focus Editor
//!
//! # A second copy forwards its arguments to the primary and exits
//! app-guard run --handle org.example.editor notes.txt
//!
//! # Send one message
//! app-guard send --handle org.example.editor --message open --payload notes.txt
//!
//! # Who holds the claim?
//! app-guard status --handle org.example.editor
//! ```

use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use app_guard::claim::read_holder_pid;
use app_guard::transport::ClientChannel;
use app_guard::{is_process_alive, AppGuard, ApplicationHandle, GuardConfig, InstanceRole};

/// Message handle carrying a secondary's command-line arguments.
const ARGS_MESSAGE: &str = "args";

/// Log filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "app_guard=info,guard_protocol=info";

/// app-guard - single-instance arbitration for desktop applications
#[derive(Parser, Debug)]
#[command(name = "app-guard", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Claim the handle; run as primary or hand off to the running one
    Run {
        /// Application handle
        #[arg(long)]
        handle: String,

        /// Window title to focus when another copy starts
        #[arg(long)]
        focus: Option<String>,

        /// Keep running as a secondary instead of exiting after hand-off
        #[arg(long)]
        keep_secondary: bool,

        /// Arguments forwarded to the primary when running as secondary
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
    /// Send one message to the primary
    Send {
        /// Application handle
        #[arg(long)]
        handle: String,

        /// Message handle
        #[arg(long)]
        message: String,

        /// Optional payload
        #[arg(long)]
        payload: Option<String>,
    },
    /// Report whether a primary holds the handle
    Status {
        /// Application handle
        #[arg(long)]
        handle: String,
    },
}

/// `RUST_LOG` replaces the defaults entirely when set.
fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    match rust_log.filter(|spec| !spec.trim().is_empty()) {
        Some(spec) => EnvFilter::try_new(spec).unwrap_or_else(|e| {
            eprintln!("Ignoring invalid {}: {e}", EnvFilter::DEFAULT_ENV);
            EnvFilter::new(DEFAULT_LOG_FILTER)
        }),
        None => EnvFilter::new(DEFAULT_LOG_FILTER),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<GuardConfig> {
    match path {
        Some(path) => GuardConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(GuardConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(rust_log.as_deref()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    match args.command {
        Command::Run {
            handle,
            focus,
            keep_secondary,
            args,
        } => run(config, &handle, focus, keep_secondary, args).await,
        Command::Send {
            handle,
            message,
            payload,
        } => send(config, &handle, &message, payload.as_deref()).await,
        Command::Status { handle } => status(&config, &handle).await,
    }
}

async fn run(
    config: GuardConfig,
    handle: &str,
    focus: Option<String>,
    keep_secondary: bool,
    forwarded: Vec<String>,
) -> Result<()> {
    let guard = AppGuard::new(config);
    let quit_requested = Arc::new(AtomicBool::new(false));
    let quit_flag = Arc::clone(&quit_requested);

    let role = guard
        .init(
            handle,
            move || quit_flag.store(true, Ordering::SeqCst),
            !keep_secondary,
        )
        .await
        .context("Failed to initialize app-guard")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        role = %role,
        "app-guard started"
    );

    match role {
        InstanceRole::Primary => serve(&guard, focus).await?,
        _ => {
            let payload = forwarded.join("\0");
            if let Err(e) = guard.send_msg_request(ARGS_MESSAGE, Some(&payload)).await {
                warn!(error = %e, "Failed to forward arguments to primary");
            }
            if !quit_requested.load(Ordering::SeqCst) {
                info!("Staying alive as secondary; press Ctrl+C to exit");
                wait_for_shutdown_signal().await?;
            }
        }
    }

    guard.release().await;
    Ok(())
}

async fn serve(guard: &AppGuard, focus: Option<String>) -> Result<()> {
    let focuser = guard.clone();
    guard
        .on_secondary_started(move |pid| {
            info!(pid, "Secondary instance started");
            if let Some(name) = focus.clone() {
                let focuser = focuser.clone();
                tokio::spawn(async move {
                    if let Err(e) = focuser.focus_window(&name).await {
                        warn!(window = %name, error = %e, "Failed to focus window");
                    }
                });
            }
        })
        .await?;

    guard
        .register_msg(ARGS_MESSAGE, |frame| {
            let args: Vec<&str> = frame
                .payload_str()
                .filter(|p| !p.is_empty())
                .map(|p| p.split('\0').collect())
                .unwrap_or_default();
            info!(?args, "Arguments received from secondary");
        })
        .await?;

    let mut frames = guard.subscribe().await?;
    let logger = tokio::spawn(async move {
        while let Ok(frame) = frames.recv().await {
            info!(handle = %frame.handle, payload = ?frame.payload, "Frame received");
        }
    });

    wait_for_shutdown_signal().await?;
    info!("Shutdown signal received");
    logger.abort();
    Ok(())
}

async fn send(
    config: GuardConfig,
    handle: &str,
    message: &str,
    payload: Option<&str>,
) -> Result<()> {
    let guard = AppGuard::new(config);
    let role = guard.init(handle, || {}, false).await?;
    if role.is_primary() {
        warn!("No other instance is running; the message is delivered to this process");
    }

    let result = guard.send_msg_request(message, payload).await;
    guard.release().await;
    result.context("Failed to send message")?;

    println!("Sent {message:?} to {handle}");
    Ok(())
}

/// What `status` found for one handle.
#[derive(Debug, PartialEq, Eq)]
enum Status {
    Running { pid: Option<u32> },
    NotListening { pid: u32 },
    Absent,
}

/// Read-only: never touches the lock, so it cannot sway an election.
async fn query_status(config: &GuardConfig, handle: &ApplicationHandle) -> Status {
    let holder = read_holder_pid(&config.runtime_dir, handle);

    match ClientChannel::connect(&config.socket_path(handle)).await {
        Ok(channel) => {
            debug!(socket = %channel.endpoint().display(), "Primary accepted a connection");
            Status::Running { pid: holder }
        }
        Err(_) => match holder {
            Some(pid) if is_process_alive(pid) => Status::NotListening { pid },
            _ => Status::Absent,
        },
    }
}

async fn status(config: &GuardConfig, handle: &str) -> Result<()> {
    let handle = ApplicationHandle::new(handle)?;

    match query_status(config, &handle).await {
        Status::Running { pid: Some(pid) } => {
            println!("Primary instance of {handle} is running (PID {pid})");
        }
        Status::Running { pid: None } => println!("Primary instance of {handle} is running"),
        Status::NotListening { pid } => {
            println!("{handle} is claimed by PID {pid}, which is not accepting messages");
        }
        Status::Absent => {
            println!("No primary instance holds {handle}");
            process::exit(1);
        }
    }
    println!("Lock: {}", config.lock_path(&handle).display());
    println!("Socket: {}", config.socket_path(&handle).display());
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    Ok(())
}
