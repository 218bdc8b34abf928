//! Engine configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! runtime_dir = "/run/user/1000/my-app"
//! connect_timeout_ms = 2000
//! notify_primary = false
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use guard_core::ApplicationHandle;
use guard_protocol::DEFAULT_MAX_FRAME_BYTES;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable overriding the default runtime directory.
pub const RUNTIME_DIR_ENV: &str = "APP_GUARD_RUNTIME_DIR";

/// Settings for one engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Directory holding lock files and sockets.
    pub runtime_dir: PathBuf,

    /// Upper bound for connecting to the primary and handing off one frame.
    pub connect_timeout_ms: u64,

    /// Upper bound for reading one inbound frame.
    pub read_timeout_ms: u64,

    /// Upper bound for the listener to drain on release.
    pub drain_timeout_ms: u64,

    /// Largest accepted envelope body.
    pub max_frame_bytes: usize,

    /// Queue depth of the frame subscription channel.
    pub frame_buffer: usize,

    /// Whether a secondary announces itself to the primary during init.
    pub notify_primary: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            runtime_dir: default_runtime_dir(),
            connect_timeout_ms: 2_000,
            read_timeout_ms: 2_000,
            drain_timeout_ms: 1_000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            frame_buffer: 64,
            notify_primary: true,
        }
    }
}

impl GuardConfig {
    /// Default configuration rooted at `runtime_dir`.
    pub fn with_runtime_dir(runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime_dir: runtime_dir.into(),
            ..Self::default()
        }
    }

    /// Parses a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Loads a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Lock file backing the exclusive claim for `handle`.
    pub fn lock_path(&self, handle: &ApplicationHandle) -> PathBuf {
        self.runtime_dir.join(handle.lock_file_name())
    }

    /// Socket the primary for `handle` listens on.
    pub fn socket_path(&self, handle: &ApplicationHandle) -> PathBuf {
        self.runtime_dir.join(handle.socket_file_name())
    }
}

/// Resolves the runtime directory: `$APP_GUARD_RUNTIME_DIR`, then the
/// platform runtime dir (`$XDG_RUNTIME_DIR`), then `app-guard-<uid>` in the
/// temp dir.
///
/// Every default is per-user, so instances of different users never
/// compete. Point several users at one shared directory explicitly if they
/// must share a single primary.
pub fn default_runtime_dir() -> PathBuf {
    if let Ok(dir) = env::var(RUNTIME_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::runtime_dir()
        .map(|d| d.join("app-guard"))
        .unwrap_or_else(|| env::temp_dir().join(format!("app-guard-{}", current_uid())))
}

fn current_uid() -> u32 {
    // SAFETY: getuid has no preconditions and cannot fail.
    unsafe { libc::getuid() }
}

/// Errors loading a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = GuardConfig::from_toml_str("").unwrap();
        let defaults = GuardConfig::default();
        assert_eq!(config.connect_timeout_ms, defaults.connect_timeout_ms);
        assert_eq!(config.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
        assert!(config.notify_primary);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config = GuardConfig::from_toml_str(
            r#"
            runtime_dir = "/tmp/guard-test"
            read_timeout_ms = 250
            notify_primary = false
            "#,
        )
        .unwrap();
        assert_eq!(config.runtime_dir, PathBuf::from("/tmp/guard-test"));
        assert_eq!(config.read_timeout(), Duration::from_millis(250));
        assert!(!config.notify_primary);
        assert_eq!(config.drain_timeout_ms, 1_000);
    }

    #[test]
    fn test_invalid_toml() {
        let err = GuardConfig::from_toml_str("read_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = GuardConfig::load(Path::new("/nonexistent/app-guard.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/app-guard.toml"));
    }

    #[test]
    fn test_resource_paths() {
        let config = GuardConfig::with_runtime_dir("/run/guard");
        let handle = ApplicationHandle::new("editor").unwrap();
        assert_eq!(config.lock_path(&handle), PathBuf::from("/run/guard/editor.lock"));
        assert_eq!(config.socket_path(&handle), PathBuf::from("/run/guard/editor.sock"));
    }

    #[test]
    fn test_current_uid_owns_new_files() {
        use std::os::unix::fs::MetadataExt;

        let file = tempfile::NamedTempFile::new().unwrap();
        let owner = file.as_file().metadata().unwrap().uid();
        assert_eq!(current_uid(), owner);
    }
}
