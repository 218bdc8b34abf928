//! Instance controller: the engine's public face.
//!
//! [`AppGuard`] is an explicit context object. It owns the lifecycle
//!
//! ```text
//! Uninitialized ──init──▶ Initialized ──release──▶ Released
//!                              ▲                       │
//!                              └─────────init──────────┘
//! ```
//!
//! and checks it at the top of every guarded operation, returning
//! [`GuardError::NotLoaded`] before `init`. Clones share one engine.

use std::sync::Arc;

use guard_core::{
    is_reserved_message_handle, ApplicationHandle, Frame, InstanceRole, MessageId,
    SECONDARY_STARTED,
};
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{debug, info, warn};

use crate::claim::{read_holder_pid, ClaimError, ExclusiveClaim};
use crate::config::GuardConfig;
use crate::error::{GuardError, Result};
use crate::listener::{DispatchListener, ListenerHandle, ListenerState};
use crate::platform::{FocusError, Platform};
use crate::registry::{spawn_registry, RegistryHandle};
use crate::transport::{send_frame, ServerChannel};

/// Single-instance arbitration and message bus for one application.
///
/// # Example
///
/// ```no_run
/// use app_guard::{AppGuard, GuardConfig};
///
/// #[tokio::main]
/// async fn main() -> app_guard::Result<()> {
///     let guard = AppGuard::new(GuardConfig::default());
///     let role = guard.init("org.example.editor", || std::process::exit(0), true).await?;
///
///     if role.is_primary() {
///         guard
///             .register_msg("open", |frame| println!("open {:?}", frame.payload))
///             .await?;
///     }
///
///     guard.release().await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct AppGuard {
    inner: Arc<Inner>,
}

struct Inner {
    config: GuardConfig,
    platform: Platform,
    state: RwLock<EngineState>,
}

enum EngineState {
    Uninitialized,
    Initialized(Box<LoadedEngine>),
    Released,
}

/// Resources held between `init` and `release`.
struct LoadedEngine {
    handle: ApplicationHandle,
    role: InstanceRole,
    claim: ExclusiveClaim,
    registry: RegistryHandle,
    frames: broadcast::Sender<Frame>,
    listener: Option<ListenerHandle>,
}

impl AppGuard {
    /// Creates an unloaded engine with the OS platform collaborators.
    pub fn new(config: GuardConfig) -> Self {
        Self::with_platform(config, Platform::default())
    }

    /// Creates an unloaded engine with injected platform collaborators.
    pub fn with_platform(config: GuardConfig, platform: Platform) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                platform,
                state: RwLock::new(EngineState::Uninitialized),
            }),
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.inner.config
    }

    /// Claims `handle` and starts the engine for the resulting role.
    ///
    /// A primary binds the transport channel and starts the dispatch
    /// listener. A secondary announces itself to the primary (when
    /// `notify_primary` is set) and, if `quit_immediate` is true, has
    /// `on_quit` invoked before this returns. The engine stays loaded in
    /// both cases; the embedder decides when to release or exit.
    ///
    /// # Errors
    ///
    /// - `GuardError::AlreadyInitialized` if already loaded
    /// - `GuardError::Claim` if the handle is invalid or the claim fails
    /// - `GuardError::Transport` if a primary cannot bind its channel
    ///
    /// No resource survives a failed `init`.
    pub async fn init<F>(&self, handle: &str, on_quit: F, quit_immediate: bool) -> Result<InstanceRole>
    where
        F: FnOnce() + Send,
    {
        let role = {
            let mut state = self.inner.state.write().await;
            if matches!(*state, EngineState::Initialized(_)) {
                return Err(GuardError::AlreadyInitialized);
            }

            let engine = self.start(handle).await?;
            let role = engine.role;
            *state = EngineState::Initialized(Box::new(engine));
            role
        };

        if role.is_secondary() && quit_immediate {
            info!(handle, "Another instance is running, invoking quit callback");
            on_quit();
        }

        Ok(role)
    }

    async fn start(&self, raw_handle: &str) -> Result<LoadedEngine> {
        let config = &self.inner.config;
        let handle = ApplicationHandle::new(raw_handle).map_err(ClaimError::from)?;
        let claim = ExclusiveClaim::acquire(&config.runtime_dir, &handle)?;
        let role = claim.role();

        let registry = spawn_registry();
        let (frames, _) = broadcast::channel(config.frame_buffer.max(1));

        let listener = if role.is_primary() {
            let channel = match ServerChannel::bind(&config.socket_path(&handle)) {
                Ok(channel) => channel,
                Err(e) => {
                    if let Err(release_err) = claim.release() {
                        warn!(error = %release_err, "Failed to release claim after bind failure");
                    }
                    return Err(e.into());
                }
            };
            let listener = DispatchListener::new(
                channel,
                registry.clone(),
                frames.clone(),
                config.max_frame_bytes,
                config.read_timeout(),
            );
            Some(listener.spawn())
        } else {
            if config.notify_primary {
                self.announce_secondary(&handle).await;
            }
            None
        };

        info!(handle = %handle, role = %role, "app-guard initialized");
        Ok(LoadedEngine {
            handle,
            role,
            claim,
            registry,
            frames,
            listener,
        })
    }

    /// Best-effort notification to the primary; the role is already decided.
    async fn announce_secondary(&self, handle: &ApplicationHandle) {
        let config = &self.inner.config;
        let pid = self.inner.platform.identity.process_id();
        let frame = Frame {
            handle: SECONDARY_STARTED.to_string(),
            payload: Some(pid.to_string()),
        };

        match send_frame(
            &config.socket_path(handle),
            frame,
            pid,
            config.max_frame_bytes,
            config.connect_timeout(),
        )
        .await
        {
            Ok(()) => debug!(handle = %handle, pid, "Announced secondary to primary"),
            Err(e) => warn!(handle = %handle, error = %e, "Failed to notify primary"),
        }
    }

    /// Tears the engine down: stops the listener, closes the channel,
    /// clears the registry and releases the claim.
    ///
    /// Always completes. Failures are logged. Calling it when not loaded
    /// does nothing.
    pub async fn release(&self) {
        let mut state = self.inner.state.write().await;
        let engine = match std::mem::replace(&mut *state, EngineState::Released) {
            EngineState::Initialized(engine) => engine,
            other => {
                *state = other;
                return;
            }
        };

        let LoadedEngine {
            handle,
            claim,
            registry,
            listener,
            ..
        } = *engine;

        if let Some(listener) = listener {
            listener.shutdown(self.inner.config.drain_timeout()).await;
        }

        match registry.clear().await {
            Ok(removed) => debug!(removed, "Registry cleared"),
            Err(e) => warn!(error = %e, "Failed to clear registry"),
        }

        if let Err(e) = claim.release() {
            warn!(handle = %handle, error = %e, "Failed to release claim");
        }

        info!(handle = %handle, "app-guard released");
    }

    /// True iff the engine is initialized.
    pub async fn is_loaded(&self) -> bool {
        matches!(*self.inner.state.read().await, EngineState::Initialized(_))
    }

    async fn with_engine<T>(&self, f: impl FnOnce(&LoadedEngine) -> T) -> Result<T> {
        match &*self.inner.state.read().await {
            EngineState::Initialized(engine) => Ok(f(engine)),
            _ => Err(GuardError::NotLoaded),
        }
    }

    pub async fn is_primary_instance(&self) -> Result<bool> {
        self.with_engine(|e| e.role.is_primary()).await
    }

    /// Role decided at `init`, or `Unclaimed` when not loaded.
    pub async fn role(&self) -> InstanceRole {
        self.with_engine(|e| e.role).await.unwrap_or_default()
    }

    pub async fn handle(&self) -> Option<ApplicationHandle> {
        self.with_engine(|e| e.handle.clone()).await.ok()
    }

    /// Registers `callback` for frames sent under `handle`.
    ///
    /// Callbacks run on the listener task, one at a time and in
    /// registration order. They must not block.
    ///
    /// # Errors
    ///
    /// - `GuardError::NotLoaded` before `init`
    /// - `GuardError::InvalidMessageHandle` for an empty handle
    /// - `GuardError::ReservedHandle` for handles under `app-guard.`
    pub async fn register_msg<F>(&self, handle: &str, callback: F) -> Result<MessageId>
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        let registry = self.with_engine(|e| e.registry.clone()).await?;
        check_message_handle(handle)?;
        Ok(registry.register(handle.to_string(), Arc::new(callback)).await?)
    }

    /// Removes one registration. Returns `false` if `id` was unknown.
    pub async fn unregister_msg(&self, id: MessageId) -> Result<bool> {
        let registry = self.with_engine(|e| e.registry.clone()).await?;
        Ok(registry.unregister(id).await?)
    }

    /// Sends one frame to the primary over a fresh connection.
    ///
    /// Returns once the frame is handed to the OS; delivery is not
    /// acknowledged. A primary may address itself.
    ///
    /// # Errors
    ///
    /// - `GuardError::NotLoaded` before `init`
    /// - `GuardError::ChannelUnavailable` if no primary is listening
    /// - `GuardError::Transport` on timeout or write failure
    pub async fn send_msg_request(&self, handle: &str, payload: Option<&str>) -> Result<()> {
        let endpoint = self
            .with_engine(|e| self.inner.config.socket_path(&e.handle))
            .await?;
        check_message_handle(handle)?;

        let config = &self.inner.config;
        let frame = Frame {
            handle: handle.to_string(),
            payload: payload.map(str::to_string),
        };
        send_frame(
            &endpoint,
            frame,
            self.inner.platform.identity.process_id(),
            config.max_frame_bytes,
            config.connect_timeout(),
        )
        .await?;
        Ok(())
    }

    /// Receiver for every frame the listener accepts.
    ///
    /// Only a primary ever receives anything.
    pub async fn subscribe(&self) -> Result<broadcast::Receiver<Frame>> {
        self.with_engine(|e| e.frames.subscribe()).await
    }

    /// Calls `callback` with the pid of each secondary that starts while
    /// this instance is primary.
    pub async fn on_secondary_started<F>(&self, callback: F) -> Result<MessageId>
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        let registry = self.with_engine(|e| e.registry.clone()).await?;
        let id = registry
            .register(
                SECONDARY_STARTED.to_string(),
                Arc::new(move |frame: &Frame| {
                    match frame.payload_str().map(str::parse::<u32>) {
                        Some(Ok(pid)) => callback(pid),
                        _ => warn!(payload = ?frame.payload, "Ignoring malformed secondary notification"),
                    }
                }),
            )
            .await?;
        Ok(id)
    }

    /// Pid recorded in the lock file by the current primary.
    pub async fn primary_pid(&self) -> Result<Option<u32>> {
        let handle = self.with_engine(|e| e.handle.clone()).await?;
        Ok(read_holder_pid(&self.inner.config.runtime_dir, &handle))
    }

    /// Listener state; `None` on a secondary.
    pub async fn listener_state(&self) -> Result<Option<ListenerState>> {
        self.with_engine(|e| e.listener.as_ref().map(ListenerHandle::state))
            .await
    }

    /// Receiver following the listener through `Stopped`; `None` on a
    /// secondary. Stays usable after `release`.
    pub async fn watch_listener_state(&self) -> Result<Option<watch::Receiver<ListenerState>>> {
        self.with_engine(|e| e.listener.as_ref().map(ListenerHandle::watch_state))
            .await
    }

    /// Brings the window titled `name` to the foreground. An empty name
    /// does nothing.
    pub async fn focus_window(&self, name: &str) -> Result<()> {
        self.with_engine(|_| ()).await?;
        let focuser = Arc::clone(&self.inner.platform.focuser);
        let owned = name.to_string();

        tokio::task::spawn_blocking(move || focuser.focus(&owned))
            .await
            .map_err(|e| FocusError::NotActivated {
                name: name.to_string(),
                reason: e.to_string(),
            })??;
        Ok(())
    }

    pub async fn get_process_id(&self) -> Result<u32> {
        self.with_engine(|_| ()).await?;
        Ok(self.inner.platform.identity.process_id())
    }
}

impl std::fmt::Debug for AppGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppGuard")
            .field("config", &self.inner.config)
            .field("platform", &self.inner.platform)
            .finish_non_exhaustive()
    }
}

fn check_message_handle(handle: &str) -> Result<()> {
    if handle.is_empty() {
        return Err(GuardError::InvalidMessageHandle);
    }
    if is_reserved_message_handle(handle) {
        return Err(GuardError::ReservedHandle(handle.to_string()));
    }
    Ok(())
}
