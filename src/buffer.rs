//! # Buffer Actor
//!
//! The buffer actor owns the list of pending session events and decides when
//! to hand them to the [`BulkWriter`].
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐ ┌────────────┐ ┌────────────┐
//! │ producer 1 │ │ producer 2 │ │  flush()   │
//! └─────┬──────┘ └─────┬──────┘ └─────┬──────┘
//!       │ submit       │ submit       │
//!       ▼              ▼              ▼
//! ┌──────────────────────────────────────────────┐
//! │        Request Channel (bounded mpsc)         │
//! └──────────────────────┬───────────────────────┘
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │  Buffer Actor (dedicated thread)              │
//! │                                               │
//! │  pending: Vec<PendingEvent>   ◄── interval    │
//! │     │                             ticker      │
//! │     │ threshold / tick / flush / shutdown     │
//! │     ▼                                         │
//! │  BulkWriter ──► EventStore                    │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Why a Single Task?
//!
//! Submits, flushes, timer ticks and count queries are all handled by one
//! task, one at a time, in arrival order. The pending list therefore needs no
//! lock, and a flush never races with a submit: requests that arrive while a
//! flush runs wait in the channel and land in the fresh, empty buffer.
//!
//! ## Flush Triggers
//!
//! | Trigger | Caller sees the outcome? | Fatal error |
//! |---------|--------------------------|-------------|
//! | `flush()` | Yes | Returned to the caller |
//! | Threshold reached | No | Logged at `error` |
//! | Timer tick | No | Logged at `error` |
//! | `shutdown()` / all handles dropped | `shutdown()` only | Returned / logged |
//!
//! Whatever the trigger, the pending list is replaced by an empty one before
//! the writer runs. Events pending at a fatal failure are lost.

use std::fmt;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::subscriber::NoSubscriber;
use tracing::{debug, error, info, warn};

use crate::config::BufferConfig;
use crate::error::{Error, Result};
use crate::store::EventStore;
use crate::types::{FlushOutcome, PendingEvent};
use crate::writer::BulkWriter;

// =============================================================================
// Request Types
// =============================================================================

/// Requests processed by the buffer actor.
pub(crate) enum BufferRequest {
    Submit(PendingEvent),
    Flush {
        response: oneshot::Sender<Result<FlushOutcome>>,
    },
    Pending {
        response: oneshot::Sender<usize>,
    },
    Shutdown {
        response: oneshot::Sender<Result<FlushOutcome>>,
    },
}

/// What caused a flush. Recorded on every flush log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Manual,
    Threshold,
    Timer,
    Shutdown,
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlushTrigger::Manual => "manual",
            FlushTrigger::Threshold => "threshold",
            FlushTrigger::Timer => "timer",
            FlushTrigger::Shutdown => "shutdown",
        })
    }
}

// =============================================================================
// Accumulator
// =============================================================================

/// The buffer state and the writer it drains into.
///
/// This is the synchronous core of the actor. It is public so that a caller
/// who already serializes access (a single-threaded ingest loop, a test) can
/// use the buffering and recovery logic without the actor thread.
#[derive(Debug)]
pub struct Accumulator<S> {
    pending: Vec<PendingEvent>,
    writer: BulkWriter<S>,
    flush_threshold: usize,
}

impl<S: EventStore> Accumulator<S> {
    pub fn new(store: S, flush_threshold: usize) -> Self {
        Self {
            pending: Vec::new(),
            writer: BulkWriter::new(store),
            flush_threshold,
        }
    }

    /// Appends an event. Returns true when the threshold has been reached
    /// and the caller should flush before accepting anything else.
    pub fn push(&mut self, event: PendingEvent) -> bool {
        self.pending.push(event);
        self.pending.len() >= self.flush_threshold
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Hands every pending event to the writer.
    ///
    /// An empty buffer is a no-op: no store call and no log output. The
    /// pending list is empty afterwards whether or not the write succeeded.
    ///
    /// # Errors
    ///
    /// The writer's fatal store error, unchanged.
    pub fn flush(&mut self, trigger: FlushTrigger) -> Result<FlushOutcome> {
        if self.pending.is_empty() {
            return Ok(FlushOutcome::default());
        }

        let batch = std::mem::take(&mut self.pending);
        let outcome = self.writer.write(batch)?;

        info!(
            trigger = %trigger,
            inserted = outcome.inserted,
            "persisted session events"
        );
        if outcome.skipped > 0 {
            warn!(
                trigger = %trigger,
                skipped = outcome.skipped,
                "skipped session events referencing deleted entities"
            );
        }

        Ok(outcome)
    }

    /// Flushes on behalf of nobody: a fatal error is logged, not returned.
    fn flush_unattended(&mut self, trigger: FlushTrigger) {
        let count = self.pending.len();
        if let Err(err) = self.flush(trigger) {
            error!(
                trigger = %trigger,
                dropped = count,
                error = %err,
                "flush failed; buffered session events dropped"
            );
        }
    }
}

// =============================================================================
// Actor Loop
// =============================================================================

/// Runs the buffer actor until shutdown or until every handle is dropped.
///
/// The ticker is polled first so that a steady stream of submits cannot
/// starve the timer. The first tick fires one full period after start.
pub(crate) async fn run_buffer<S: EventStore>(
    mut acc: Accumulator<S>,
    mut rx: mpsc::Receiver<BufferRequest>,
    flush_interval: Duration,
) {
    let mut ticker = interval_at(Instant::now() + flush_interval, flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = ticker.tick() => acc.flush_unattended(FlushTrigger::Timer),

            request = rx.recv() => match request {
                Some(BufferRequest::Submit(event)) => {
                    if acc.push(event) {
                        acc.flush_unattended(FlushTrigger::Threshold);
                    }
                }
                Some(BufferRequest::Flush { response }) => {
                    let _ = response.send(acc.flush(FlushTrigger::Manual));
                }
                Some(BufferRequest::Pending { response }) => {
                    let _ = response.send(acc.len());
                }
                Some(BufferRequest::Shutdown { response }) => {
                    let _ = response.send(acc.flush(FlushTrigger::Shutdown));
                    break;
                }
                None => {
                    acc.flush_unattended(FlushTrigger::Shutdown);
                    break;
                }
            },
        }
    }

    debug!("buffer actor stopped");
}

/// Spawns a buffer actor over `store` on a dedicated thread.
///
/// The thread runs a current-thread tokio runtime and inherits the calling
/// thread's `tracing` dispatcher, so flush log lines reach whatever
/// subscriber is active where the buffer was created. If none is active the
/// thread falls back to the global subscriber, including one set later.
///
/// # Errors
///
/// [`Error::Config`] if `config` does not validate; [`Error::Io`] if the
/// runtime or thread cannot be created.
pub fn spawn_buffer<S: EventStore>(store: S, config: BufferConfig) -> Result<BufferHandle> {
    config.validate()?;

    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let accumulator = Accumulator::new(store, config.flush_threshold);
    let flush_interval = config.flush_interval;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());

    std::thread::Builder::new()
        .name("sessionbuf-buffer".to_string())
        .spawn(move || {
            // With no subscriber yet, leave the thread on the global default
            // so one installed later still receives the flush lines.
            let _guard = (!dispatch.is::<NoSubscriber>())
                .then(|| tracing::dispatcher::set_default(&dispatch));
            runtime.block_on(run_buffer(accumulator, rx, flush_interval));
        })?;

    debug!(
        flush_threshold = config.flush_threshold,
        flush_interval_ms = flush_interval.as_millis() as u64,
        "buffer actor started"
    );

    Ok(BufferHandle { tx })
}

// =============================================================================
// Buffer Handle (Async Interface)
// =============================================================================

/// Async handle to a buffer actor.
///
/// Cheap to clone; every clone talks to the same actor. When the last clone
/// is dropped the actor flushes what it holds and exits.
#[derive(Debug, Clone)]
pub struct BufferHandle {
    tx: mpsc::Sender<BufferRequest>,
}

impl BufferHandle {
    /// Queues an event for the next flush.
    ///
    /// Never waits on the store. It waits only when the request channel is
    /// full, i.e. behind a flush that is still running.
    pub async fn submit(&self, event: PendingEvent) -> Result<()> {
        self.tx
            .send(BufferRequest::Submit(event))
            .await
            .map_err(|_| Error::Shutdown("buffer has shut down"))
    }

    /// Flushes everything submitted before this call.
    ///
    /// # Errors
    ///
    /// A fatal store error. The events that were pending are dropped and the
    /// buffer continues empty.
    pub async fn flush(&self) -> Result<FlushOutcome> {
        let (response_tx, response_rx) = oneshot::channel();

        self.tx
            .send(BufferRequest::Flush {
                response: response_tx,
            })
            .await
            .map_err(|_| Error::Shutdown("buffer has shut down"))?;

        response_rx
            .await
            .map_err(|_| Error::Shutdown("buffer dropped response"))?
    }

    /// Number of events currently waiting for a flush.
    pub async fn pending(&self) -> Result<usize> {
        let (response_tx, response_rx) = oneshot::channel();

        self.tx
            .send(BufferRequest::Pending {
                response: response_tx,
            })
            .await
            .map_err(|_| Error::Shutdown("buffer has shut down"))?;

        response_rx
            .await
            .map_err(|_| Error::Shutdown("buffer dropped response"))
    }

    /// Flushes what is pending and stops the actor.
    ///
    /// Other clones of this handle fail with [`Error::Shutdown`] afterwards.
    pub async fn shutdown(self) -> Result<FlushOutcome> {
        let (response_tx, response_rx) = oneshot::channel();

        self.tx
            .send(BufferRequest::Shutdown {
                response: response_tx,
            })
            .await
            .map_err(|_| Error::Shutdown("buffer has shut down"))?;

        response_rx
            .await
            .map_err(|_| Error::Shutdown("buffer dropped response"))?
    }
}

// =============================================================================
// Tests
// =============================================================================
