//! Background line ingestion
//!
//! One reader thread per session pulls lines off the transport and pushes them,
//! unclassified and in arrival order, into a bounded inbox. The thread stops
//! when its [`CancelToken`] fires, when the inbox is dropped, or after too many
//! consecutive read failures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use super::stream::{LineReader, ReadOutcome};
use super::{ProtocolError, MAX_CONSECUTIVE_READ_FAILURES};

/// Cooperative stop signal shared between threads
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that has not fired
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the token. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the token has fired
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for up to `duration`, waking early if the token fires.
    /// Returns `true` if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(10)));
        }
    }
}

/// What the reader thread hands to the supervisor
#[derive(Debug)]
pub enum Inbound {
    /// A raw line, terminators included
    Line(String),
    /// The reader gave up; no further lines will arrive
    Fatal(ProtocolError),
}

/// Reader thread tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionConfig {
    /// Consecutive read failures tolerated before giving up
    pub max_consecutive_failures: u32,
    /// Pause after a tolerated failure
    pub failure_backoff: Duration,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: MAX_CONSECUTIVE_READ_FAILURES,
            failure_backoff: Duration::from_millis(500),
        }
    }
}

/// Handle to a running reader thread
#[derive(Debug)]
pub struct IngestionHandle {
    cancel: CancelToken,
    done: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl IngestionHandle {
    /// Start the reader thread
    pub fn spawn(
        reader: Box<dyn LineReader>,
        inbox: SyncSender<Inbound>,
        cancel: CancelToken,
        config: IngestionConfig,
    ) -> Result<Self, ProtocolError> {
        let (done_tx, done_rx) = mpsc::channel();
        let token = cancel.clone();
        let thread = thread::Builder::new()
            .name("echem-ingest".to_string())
            .spawn(move || {
                read_loop(reader, &inbox, &token, config);
                let _ = done_tx.send(());
            })?;

        Ok(Self {
            cancel,
            done: done_rx,
            thread: Some(thread),
        })
    }

    /// Whether the reader thread has exited
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal the thread and wait up to `grace` for it to exit.
    ///
    /// Returns `false` if the thread was still blocked in a read when the
    /// grace period ran out; it is then detached and exits on its own once
    /// the read returns. Calling this again is a no-op.
    pub fn stop_and_join(&mut self, grace: Duration) -> bool {
        self.cancel.cancel();
        let Some(thread) = self.thread.take() else {
            return true;
        };

        match self.done.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if thread.join().is_err() {
                    error!("Ingestion thread panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("Ingestion thread did not stop within {:?}, detaching", grace);
                false
            }
        }
    }
}

impl Drop for IngestionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn read_loop(
    mut reader: Box<dyn LineReader>,
    inbox: &SyncSender<Inbound>,
    cancel: &CancelToken,
    config: IngestionConfig,
) {
    let mut failures = 0u32;

    while !cancel.is_cancelled() {
        match reader.read_line() {
            Ok(ReadOutcome::Line(line)) => {
                failures = 0;
                if !deliver(inbox, Inbound::Line(line), cancel) {
                    break;
                }
            }
            Ok(ReadOutcome::Idle) => {}
            Ok(ReadOutcome::Undecodable(bytes)) => {
                warn!("Skipping undecodable line ({} bytes)", bytes.len());
            }
            Err(e) => {
                failures += 1;
                warn!(
                    "Read failure ({}/{}): {}",
                    failures, config.max_consecutive_failures, e
                );
                if failures >= config.max_consecutive_failures {
                    error!("Too many consecutive read failures, abandoning session");
                    let fatal = ProtocolError::TransportFailed {
                        failures,
                        reason: e.to_string(),
                    };
                    deliver(inbox, Inbound::Fatal(fatal), cancel);
                    break;
                }
                if cancel.sleep(config.failure_backoff) {
                    break;
                }
            }
        }
    }

    debug!("Ingestion loop exiting");
}

/// Push into the bounded inbox without blocking past cancellation.
/// Returns `false` if the consumer is gone or the token fired.
fn deliver(inbox: &SyncSender<Inbound>, message: Inbound, cancel: &CancelToken) -> bool {
    let mut message = message;
    loop {
        match inbox.try_send(message) {
            Ok(()) => return true,
            Err(TrySendError::Full(back)) => {
                if cancel.is_cancelled() {
                    return false;
                }
                message = back;
                thread::sleep(Duration::from_millis(2));
            }
            Err(TrySendError::Disconnected(_)) => return false,
        }
    }
}
