//! Status polling for one active scan.
//!
//! The engine asks the scan service for the status immediately, then again
//! after every interval, until the service reports a terminal status, the
//! optional poll ceiling is reached, or [`PollingEngine::stop`] is called.
//!
//! Each loop is tagged with a generation number. `stop` bumps the generation,
//! so a status request that is still in flight when the engine is stopped
//! completes normally but its answer is dropped instead of delivered.

use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use authscan_platform::ApiError;

use crate::aggregator::{StatusSnapshot, Terminal};
use crate::backend::ScanBackend;
use crate::error::{ErrorInfo, ErrorKind};

/// Default delay between two status requests.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Polling configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingConfig {
    pub interval: Duration,
    /// Give up after this many status requests without a terminal status.
    /// `None` polls until the service reports one.
    pub max_polls: Option<u32>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_polls: None,
        }
    }
}

impl PollingConfig {
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = Some(max_polls);
        self
    }
}

/// Something the engine delivers to its subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    /// A status answer, already converted into a snapshot
    Snapshot {
        scan_id: String,
        snapshot: StatusSnapshot,
    },
    /// A status request failed; polling continues
    Transient {
        scan_id: String,
        attempt: u32,
        error: ErrorInfo,
    },
    /// The poll ceiling was reached without a terminal status
    Exhausted { scan_id: String, attempts: u32 },
}

impl PollEvent {
    #[must_use]
    pub fn scan_id(&self) -> &str {
        match self {
            PollEvent::Snapshot { scan_id, .. }
            | PollEvent::Transient { scan_id, .. }
            | PollEvent::Exhausted { scan_id, .. } => scan_id,
        }
    }
}

/// Engine state. Transitions only happen inside the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling { scan_id: String },
    Stopped,
}

/// Result of [`PollingEngine::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A loop is already running; nothing was scheduled
    AlreadyPolling,
}

struct Inner {
    state: PollState,
    generation: u64,
    token: Option<CancellationToken>,
}

type EventSink = Arc<dyn Fn(PollEvent) + Send + Sync>;

/// Polls the scan service for one scan at a time.
pub struct PollingEngine<B: ScanBackend> {
    backend: Arc<B>,
    config: PollingConfig,
    inner: Arc<Mutex<Inner>>,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<B: ScanBackend> PollingEngine<B> {
    pub fn new(backend: Arc<B>, config: PollingConfig) -> Self {
        Self {
            backend,
            config,
            inner: Arc::new(Mutex::new(Inner {
                state: PollState::Idle,
                generation: 0,
                token: None,
            })),
        }
    }

    #[must_use]
    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> PollState {
        lock(&self.inner).state.clone()
    }

    #[must_use]
    pub fn is_polling(&self) -> bool {
        matches!(lock(&self.inner).state, PollState::Polling { .. })
    }

    /// Start polling `scan_id`, delivering every event to `on_event`.
    ///
    /// The first status request is issued right away. Calling `start` while a
    /// loop is running is a no-op. `on_event` runs with the engine's internal
    /// lock held and must not call back into the engine; sending into a
    /// channel is the intended use.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F>(&self, scan_id: impl Into<String>, on_event: F) -> StartOutcome
    where
        F: Fn(PollEvent) + Send + Sync + 'static,
    {
        let scan_id = scan_id.into();
        let (generation, token) = {
            let mut inner = lock(&self.inner);
            if let PollState::Polling { scan_id: active } = &inner.state {
                debug!("Polling already active for scan {active}, ignoring start for {scan_id}");
                return StartOutcome::AlreadyPolling;
            }
            inner.generation += 1;
            let token = CancellationToken::new();
            inner.token = Some(token.clone());
            inner.state = PollState::Polling {
                scan_id: scan_id.clone(),
            };
            (inner.generation, token)
        };

        info!(
            "🔄 Polling scan {scan_id} every {}s",
            self.config.interval.as_secs_f64()
        );

        let poll_loop = PollLoop {
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
            scan_id,
            generation,
            token,
            on_event: Arc::new(on_event),
        };
        tokio::spawn(poll_loop.run());
        StartOutcome::Started
    }

    /// Stop polling. The pending timer is cancelled and the answer of a
    /// request already in flight will be discarded.
    ///
    /// Returns whether a loop was running.
    pub fn stop(&self) -> bool {
        let mut inner = lock(&self.inner);
        let was_polling = matches!(inner.state, PollState::Polling { .. });
        inner.generation += 1;
        if let Some(token) = inner.token.take() {
            token.cancel();
        }
        inner.state = PollState::Stopped;

        if was_polling {
            debug!("⏹️  Polling stopped");
        }
        was_polling
    }
}

impl<B: ScanBackend> Drop for PollingEngine<B> {
    fn drop(&mut self) {
        let mut inner = lock(&self.inner);
        inner.generation += 1;
        if let Some(token) = inner.token.take() {
            token.cancel();
        }
    }
}

struct PollLoop<B> {
    backend: Arc<B>,
    config: PollingConfig,
    inner: Arc<Mutex<Inner>>,
    scan_id: String,
    generation: u64,
    token: CancellationToken,
    on_event: EventSink,
}

/// What to do after a delivery attempt.
enum Flow {
    Continue,
    Finish,
}

impl<B: ScanBackend> PollLoop<B> {
    async fn run(self) {
        let mut attempts: u32 = 0;

        loop {
            let result = self.backend.scan_status(&self.scan_id).await;
            attempts = attempts.saturating_add(1);

            let flow = match result {
                Ok(response) => self.deliver(StatusSnapshot::from(response)),
                Err(e) => self.report_failure(attempts, &e),
            };
            if matches!(flow, Flow::Finish) {
                return;
            }

            if let Some(max_polls) = self.config.max_polls
                && attempts >= max_polls
            {
                self.exhaust(attempts);
                return;
            }

            tokio::select! {
                _ = self.token.cancelled() => {
                    debug!("Poll timer for scan {} cancelled", self.scan_id);
                    return;
                }
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }

    fn report_failure(&self, attempt: u32, error: &ApiError) -> Flow {
        let inner = lock(&self.inner);
        if inner.generation != self.generation {
            return Flow::Finish;
        }

        let cause = if error.is_transport() {
            "network error"
        } else {
            "unexpected answer"
        };
        warn!(
            "⚠️  Status request {attempt} for scan {} failed with {cause}, will retry: {error}",
            self.scan_id
        );
        (self.on_event)(PollEvent::Transient {
            scan_id: self.scan_id.clone(),
            attempt,
            error: ErrorInfo::new(
                ErrorKind::PollingTransient,
                format!("status request {attempt} failed: {error}"),
            ),
        });
        Flow::Continue
    }

    fn deliver(&self, snapshot: StatusSnapshot) -> Flow {
        let mut inner = lock(&self.inner);
        if inner.generation != self.generation {
            debug!(
                "Discarding status for scan {} received after polling stopped",
                self.scan_id
            );
            return Flow::Finish;
        }

        let terminal = snapshot.terminal != Terminal::None;
        if terminal {
            inner.state = PollState::Idle;
            inner.token = None;
            match snapshot.terminal {
                Terminal::Completed => info!("✅ Scan {} completed", self.scan_id),
                _ => warn!("❌ Scan {} reported failure", self.scan_id),
            }
        }

        (self.on_event)(PollEvent::Snapshot {
            scan_id: self.scan_id.clone(),
            snapshot,
        });

        if terminal { Flow::Finish } else { Flow::Continue }
    }

    fn exhaust(&self, attempts: u32) {
        let mut inner = lock(&self.inner);
        if inner.generation != self.generation {
            return;
        }
        inner.state = PollState::Idle;
        inner.token = None;
        warn!(
            "⏱️  Giving up on scan {} after {attempts} status requests",
            self.scan_id
        );
        (self.on_event)(PollEvent::Exhausted {
            scan_id: self.scan_id.clone(),
            attempts,
        });
    }
}
