//! Dispatch listener run by the primary instance.
//!
//! The listener owns the server channel. For each accepted connection it
//! reads one envelope, hands the frame to the registry and publishes it
//! to subscribers, then moves on to the next connection.
//!
//! # State machine
//!
//! ```text
//! Idle ──spawn──▶ Listening ──cancel──▶ Draining ──▶ Stopped
//! ```
//!
//! Connections are handled one at a time. Cancellation interrupts a
//! connection that is still being read, so a stalled client cannot hold up
//! `release`. A frame that was fully read is dispatched before the loop
//! stops. If a callback overruns the drain timeout the task is aborted and
//! dropping the channel still removes the socket file.
//!
//! # Panic-Free Guarantees
//!
//! - Malformed frames are logged and dropped; the loop keeps accepting
//! - Accept errors are logged; the loop keeps accepting

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use guard_core::Frame;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::registry::RegistryHandle;
use crate::transport::{InboundConnection, ServerChannel, TransportError};

/// Pause after a failed accept so a persistent error cannot spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Lifecycle of the dispatch listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Listening,
    Draining,
    Stopped,
}

/// Accept loop turning inbound envelopes into registry dispatches.
pub struct DispatchListener {
    channel: ServerChannel,
    registry: RegistryHandle,
    frames: broadcast::Sender<Frame>,
    cancel_token: CancellationToken,
    state: watch::Sender<ListenerState>,
    max_frame_bytes: usize,
    read_timeout: Duration,
    connection_counter: AtomicU64,
}

impl DispatchListener {
    /// Creates an idle listener over a bound channel.
    ///
    /// # Arguments
    ///
    /// * `channel` - Bound server channel (primary only)
    /// * `registry` - Registry receiving every decoded frame
    /// * `frames` - Broadcast sender for frame subscribers
    /// * `max_frame_bytes` - Largest accepted envelope body
    /// * `read_timeout` - Bound for reading one connection
    pub fn new(
        channel: ServerChannel,
        registry: RegistryHandle,
        frames: broadcast::Sender<Frame>,
        max_frame_bytes: usize,
        read_timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ListenerState::Idle);
        Self {
            channel,
            registry,
            frames,
            cancel_token: CancellationToken::new(),
            state,
            max_frame_bytes,
            read_timeout,
            connection_counter: AtomicU64::new(0),
        }
    }

    /// Spawns the accept loop on the current runtime.
    ///
    /// The channel is already bound, so the listener is `Listening` as soon
    /// as this returns.
    pub fn spawn(self) -> ListenerHandle {
        self.state.send_replace(ListenerState::Listening);
        let cancel_token = self.cancel_token.clone();
        let state = self.state.subscribe();
        let task = tokio::spawn(self.run());
        ListenerHandle {
            cancel_token,
            state,
            task,
        }
    }

    /// Runs until the cancellation token fires.
    async fn run(self) {
        info!(socket = %self.channel.path().display(), "Dispatch listener started");

        loop {
            tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => {
                    debug!("Dispatch listener shutdown requested");
                    break;
                }

                result = self.channel.accept() => {
                    match result {
                        Ok(conn) => {
                            let n = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(conn, n).await;
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            sleep(ACCEPT_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
        }

        self.state.send_replace(ListenerState::Draining);
        let handled = self.connection_counter.load(Ordering::Relaxed);
        if let Err(e) = self.channel.close() {
            warn!(error = %e, "Failed to close transport channel");
        }
        self.state.send_replace(ListenerState::Stopped);
        info!(connections = handled, "Dispatch listener stopped");
    }

    async fn handle_connection(&self, conn: InboundConnection, connection: u64) {
        let read = tokio::select! {
            biased;

            _ = self.cancel_token.cancelled() => {
                debug!(connection, "Shutdown requested, dropping unread connection");
                return;
            }

            result = conn.read_envelope(self.max_frame_bytes, self.read_timeout) => result,
        };

        let envelope = match read {
            Ok(envelope) => envelope,
            Err(TransportError::Protocol(e)) if e.is_malformed() => {
                warn!(connection, error = %e, "Dropping malformed frame");
                return;
            }
            Err(TransportError::EmptyConnection) => {
                debug!(connection, "Connection closed without a frame");
                return;
            }
            Err(e) => {
                warn!(connection, error = %e, "Failed to read frame");
                return;
            }
        };

        let sender_pid = envelope.sender_pid;
        let frame = envelope.into_frame();
        debug!(
            connection,
            sender_pid,
            handle = %frame.handle,
            "Frame received"
        );

        match self.registry.dispatch(frame.clone()).await {
            Ok(report) if report.failed > 0 => {
                warn!(
                    handle = %frame.handle,
                    invoked = report.invoked,
                    failed = report.failed,
                    "Some callbacks failed"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(handle = %frame.handle, error = %e, "Registry unavailable"),
        }

        // No subscribers is the common case
        let _ = self.frames.send(frame);
    }
}

/// Control handle for a spawned listener.
pub struct ListenerHandle {
    cancel_token: CancellationToken,
    state: watch::Receiver<ListenerState>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Current lifecycle state.
    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Receiver observing every state change, including the final `Stopped`.
    pub fn watch_state(&self) -> watch::Receiver<ListenerState> {
        self.state.clone()
    }

    /// Stops accepting and waits up to `drain_timeout` for the in-flight
    /// frame to finish. The task is aborted if it overruns.
    pub async fn shutdown(mut self, drain_timeout: Duration) {
        self.cancel_token.cancel();

        match tokio::time::timeout(drain_timeout, &mut self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Dispatch listener task failed"),
            Err(_) => {
                warn!(
                    timeout_ms = u64::try_from(drain_timeout.as_millis()).unwrap_or(u64::MAX),
                    "Dispatch listener did not drain in time, aborting"
                );
                self.task.abort();
            }
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
