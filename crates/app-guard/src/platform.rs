//! Platform collaborators consumed by the engine.
//!
//! Window activation and process identity are OS services the engine
//! calls but does not implement. They sit behind traits so embedders can
//! plug in toolkit-specific versions (or no-ops in tests).
//!
//! The default focuser shells out to the usual desktop tools: `swaymsg`
//! and `hyprctl` under Wayland, then `wmctrl`/`xdotool` on Linux, and
//! `osascript` on macOS.

use std::process::{Command, Stdio};
use std::sync::Arc;

use sysinfo::{Pid, System};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while activating a window.
#[derive(Debug, Error)]
pub enum FocusError {
    /// No focusing tool is available on this platform
    #[error("window focusing is not supported on this platform")]
    Unsupported,

    /// Every available tool failed or found no matching window
    #[error("no window matching {name:?} could be activated: {reason}")]
    NotActivated { name: String, reason: String },
}

/// Activates a top-level window by its title.
pub trait WindowFocuser: Send + Sync {
    /// Brings the window titled `name` to the foreground.
    fn focus(&self, name: &str) -> Result<(), FocusError>;
}

/// Reports the identity of the current process.
pub trait ProcessIdentity: Send + Sync {
    fn process_id(&self) -> u32;
}

/// Focuser that drives external desktop tools.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandFocuser;

impl WindowFocuser for CommandFocuser {
    fn focus(&self, name: &str) -> Result<(), FocusError> {
        if name.is_empty() {
            return Ok(());
        }

        let attempts = focus_commands(name);
        if attempts.is_empty() {
            return Err(FocusError::Unsupported);
        }

        let mut failures = Vec::new();
        for (program, args) in attempts {
            match run_quiet(program, &args) {
                Ok(()) => {
                    debug!(tool = program, window = name, "Window focused");
                    return Ok(());
                }
                Err(reason) => failures.push(format!("{program}: {reason}")),
            }
        }

        Err(FocusError::NotActivated {
            name: name.to_string(),
            reason: failures.join("; "),
        })
    }
}

#[cfg(target_os = "macos")]
fn focus_commands(name: &str) -> Vec<(&'static str, Vec<String>)> {
    let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
    let script = format!(
        "tell application \"System Events\" to tell (first process whose name contains \"{escaped}\") to set frontmost to true"
    );
    vec![("osascript", vec!["-e".to_string(), script])]
}

#[cfg(all(unix, not(target_os = "macos")))]
fn focus_commands(name: &str) -> Vec<(&'static str, Vec<String>)> {
    let wayland = std::env::var_os("WAYLAND_DISPLAY").is_some();
    let x11 = std::env::var_os("DISPLAY").is_some();
    linux_focus_commands(name, wayland, x11)
}

/// Compositor tools come first under Wayland; `xdotool` needs an X display.
#[cfg(all(unix, not(target_os = "macos")))]
fn linux_focus_commands(name: &str, wayland: bool, x11: bool) -> Vec<(&'static str, Vec<String>)> {
    let pattern = escape_title_pattern(name);
    let mut commands = Vec::new();

    if wayland {
        let criteria = format!("[title=\"^{}$\"] focus", pattern.replace('"', "\\\""));
        commands.push(("swaymsg", vec![criteria]));
        commands.push((
            "hyprctl",
            vec![
                "dispatch".to_string(),
                "focuswindow".to_string(),
                format!("title:^{pattern}$"),
            ],
        ));
    }

    commands.push(("wmctrl", vec!["-a".to_string(), name.to_string()]));

    if x11 {
        commands.push((
            "xdotool",
            vec![
                "search".to_string(),
                "--onlyvisible".to_string(),
                "--name".to_string(),
                pattern,
                "windowactivate".to_string(),
                "--sync".to_string(),
            ],
        ));
    }

    commands
}

/// Title matchers of sway, Hyprland and xdotool take regular expressions.
#[cfg(all(unix, not(target_os = "macos")))]
fn escape_title_pattern(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if "^$.[]{}*+?()|\\".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(not(unix))]
fn focus_commands(_name: &str) -> Vec<(&'static str, Vec<String>)> {
    Vec::new()
}

fn run_quiet(program: &str, args: &[String]) -> Result<(), String> {
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|e| e.to_string())?;

    if status.success() {
        Ok(())
    } else {
        Err(format!("exited with {status}"))
    }
}

/// Focuser that does nothing, for headless embedders.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFocuser;

impl WindowFocuser for NoopFocuser {
    fn focus(&self, _name: &str) -> Result<(), FocusError> {
        Ok(())
    }
}

/// Process identity backed by the OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessIdentity;

impl ProcessIdentity for SystemProcessIdentity {
    fn process_id(&self) -> u32 {
        sysinfo::get_current_pid()
            .map(|pid| pid.as_u32())
            .unwrap_or_else(|_| std::process::id())
    }
}

/// Returns true if a process with `pid` currently exists.
pub fn is_process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_all();
    system.process(Pid::from_u32(pid)).is_some()
}

/// Bundle of collaborators handed to the engine.
#[derive(Clone)]
pub struct Platform {
    pub focuser: Arc<dyn WindowFocuser>,
    pub identity: Arc<dyn ProcessIdentity>,
}

impl Platform {
    pub fn new(focuser: Arc<dyn WindowFocuser>, identity: Arc<dyn ProcessIdentity>) -> Self {
        Self { focuser, identity }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::new(Arc::new(CommandFocuser), Arc::new(SystemProcessIdentity))
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}
