//! # Sync Agent
//!
//! Background scheduler for the engine. Runs the push flow and the pull
//! flow as two independent tasks.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncAgent Architecture                           │
//! │                                                                         │
//! │  SyncAgentHandle (cloneable)                                            │
//! │    sync_now ─────────────┐        pull_now ────────────┐                │
//! │    connectivity_restored ┼────────────────────────────┤                │
//! │    shutdown ─── watch ───┼──────────────┐              │                │
//! │                          ▼              ▼              ▼                │
//! │  ┌──────────────────────────────┐  ┌──────────────────────────────┐     │
//! │  │ push loop                    │  │ pull loop                    │     │
//! │  │  tick every push_interval    │  │  tick every pull_interval    │     │
//! │  │  or trigger                  │  │  or trigger                  │     │
//! │  │  SyncProcessor::retry_failed │  │  Downloader::pull            │     │
//! │  │  SyncProcessor::cleanup      │  │                              │     │
//! │  └──────────────┬───────────────┘  └──────────────┬───────────────┘     │
//! │                 │  failure: exponential backoff   │                     │
//! │                 │  (explicit trigger skips it)    │                     │
//! │                 └──────────────┬──────────────────┘                     │
//! │                                ▼                                        │
//! │               StatusReporter ──► SyncEventEmitter                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Overlapping cycles are harmless: the queue claim is atomic, so a second
//! push never picks up items the first one holds.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use tally_core::SyncStatusReport;
use tally_db::Database;

use crate::config::{SyncConfig, SyncMode};
use crate::downloader::{Downloader, PullReport};
use crate::error::{SyncError, SyncResult};
use crate::processor::{ProcessorSettings, SyncProcessor, SyncReport};
use crate::status::StatusReporter;
use crate::transport::SyncTransport;

// =============================================================================
// Sync Status
// =============================================================================

/// Current agent state for external queries.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub mode: SyncMode,

    /// Whether the loops are running.
    pub running: bool,

    /// End of the last push cycle that reached the server.
    pub last_push_at: Option<DateTime<Utc>>,

    /// End of the last successful pull.
    pub last_pull_at: Option<DateTime<Utc>>,

    /// Last error message (if any).
    pub last_error: Option<String>,

    /// Failed push cycles since the last successful one.
    pub push_failures: u32,

    /// Failed pulls since the last successful one.
    pub pull_failures: u32,

    /// Latest queue snapshot.
    pub report: Option<SyncStatusReport>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus {
            mode: SyncMode::Auto,
            running: false,
            last_push_at: None,
            last_pull_at: None,
            last_error: None,
            push_failures: 0,
            pull_failures: 0,
            report: None,
        }
    }
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Receives agent events (implemented by the UI integration).
pub trait SyncEventEmitter: Send + Sync {
    /// Queue snapshot after every cycle.
    fn emit_status(&self, report: &SyncStatusReport);

    fn emit_push(&self, report: &SyncReport);

    fn emit_pull(&self, report: &PullReport);

    fn emit_error(&self, message: &str, retryable: bool);
}

/// No-op event emitter.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _report: &SyncStatusReport) {}
    fn emit_push(&self, _report: &SyncReport) {}
    fn emit_pull(&self, _report: &PullReport) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}

// =============================================================================
// Sync Agent
// =============================================================================

pub struct SyncAgent {
    config: Arc<SyncConfig>,
    db: Database,
    transport: Arc<dyn SyncTransport>,
    emitter: Arc<dyn SyncEventEmitter>,
}

impl SyncAgent {
    pub fn new(config: SyncConfig, db: Database, transport: Arc<dyn SyncTransport>) -> Self {
        Self::with_emitter(config, db, transport, Arc::new(NoOpEmitter))
    }

    pub fn with_emitter(
        config: SyncConfig,
        db: Database,
        transport: Arc<dyn SyncTransport>,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> Self {
        SyncAgent {
            config: Arc::new(config),
            db,
            transport,
            emitter,
        }
    }

    /// Spawns the push and pull loops.
    ///
    /// In offline mode nothing is spawned and the handle's triggers do
    /// nothing; the builder keeps queuing locally.
    pub async fn start(self) -> SyncResult<SyncAgentHandle> {
        let (push_tx, push_rx) = mpsc::channel(1);
        let (pull_tx, pull_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let status = Arc::new(RwLock::new(SyncStatus {
            mode: self.config.sync.mode,
            ..Default::default()
        }));

        if !self.config.is_sync_enabled() {
            info!("Sync is disabled (mode: offline)");
            return Ok(SyncAgentHandle {
                push_tx,
                pull_tx,
                shutdown_tx: Arc::new(shutdown_tx),
                status,
                tasks: Arc::new(Mutex::new(Vec::new())),
                enabled: false,
            });
        }

        self.config.validate()?;

        let processor = SyncProcessor::new(
            self.db.clone(),
            self.transport.clone(),
            ProcessorSettings::from_config(&self.config),
        );
        let downloader =
            Downloader::from_config(self.db.clone(), self.transport.clone(), &self.config);
        let reporter = StatusReporter::new(self.db.clone(), self.config.sync.max_retries);

        let released = processor.release_stale().await?;
        if released > 0 {
            info!(count = released, "Recovered items from an interrupted push");
        }

        info!(
            branch_id = %self.config.branch_id(),
            register_id = %self.config.register_id(),
            server = %self.config.server.base_url,
            "Starting sync agent"
        );

        let pacing = Pacing {
            initial_backoff: Duration::from_millis(self.config.sync.initial_backoff_ms),
            max_backoff: Duration::from_secs(self.config.sync.max_backoff_secs),
        };

        let push = tokio::spawn(push_loop(
            processor,
            reporter.clone(),
            status.clone(),
            self.emitter.clone(),
            self.config.push_interval(),
            pacing.clone(),
            push_rx,
            shutdown_rx.clone(),
        ));
        let pull = tokio::spawn(pull_loop(
            downloader,
            reporter,
            status.clone(),
            self.emitter.clone(),
            self.config.pull_interval(),
            pacing,
            pull_rx,
            shutdown_rx,
        ));

        status.write().await.running = true;
        info!("Sync agent started");

        Ok(SyncAgentHandle {
            push_tx,
            pull_tx,
            shutdown_tx: Arc::new(shutdown_tx),
            status,
            tasks: Arc::new(Mutex::new(vec![push, pull])),
            enabled: true,
        })
    }
}

// =============================================================================
// Loops
// =============================================================================

#[derive(Debug, Clone)]
struct Pacing {
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Pacing {
    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Tracks when a failing flow may run again.
struct RetryGate {
    backoff: ExponentialBackoff,
    max_backoff: Duration,
    not_before: Option<Instant>,
}

impl RetryGate {
    fn new(pacing: &Pacing) -> Self {
        RetryGate {
            backoff: pacing.create_backoff(),
            max_backoff: pacing.max_backoff,
            not_before: None,
        }
    }

    fn is_open(&self) -> bool {
        self.not_before.map_or(true, |at| Instant::now() >= at)
    }

    fn succeeded(&mut self) {
        self.backoff.reset();
        self.not_before = None;
    }

    fn failed(&mut self) -> Duration {
        let delay = self.backoff.next_backoff().unwrap_or(self.max_backoff);
        self.not_before = Some(Instant::now() + delay);
        delay
    }
}

enum Wake {
    Tick,
    Trigger,
    Stop,
}

#[allow(clippy::too_many_arguments)]
async fn push_loop(
    processor: SyncProcessor,
    reporter: StatusReporter,
    status: Arc<RwLock<SyncStatus>>,
    emitter: Arc<dyn SyncEventEmitter>,
    every: Duration,
    pacing: Pacing,
    mut trigger_rx: mpsc::Receiver<()>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("Push loop starting");

    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut gate = RetryGate::new(&pacing);

    loop {
        let wake = tokio::select! {
            _ = interval.tick() => Wake::Tick,
            Some(()) = trigger_rx.recv() => Wake::Trigger,
            _ = shutdown_rx.changed() => Wake::Stop,
        };

        match wake {
            Wake::Stop => break,
            Wake::Trigger => gate.succeeded(),
            Wake::Tick if !gate.is_open() => {
                debug!("Push backing off");
                continue;
            }
            Wake::Tick => {}
        }

        match processor.retry_failed().await {
            Ok(report) => {
                emitter.emit_push(&report);
                let mut s = status.write().await;
                match &report.error {
                    None => {
                        gate.succeeded();
                        if !report.is_noop() {
                            s.last_push_at = Some(Utc::now());
                        }
                        s.push_failures = 0;
                        if s.pull_failures == 0 {
                            s.last_error = None;
                        }
                    }
                    Some(message) => {
                        let delay = gate.failed();
                        warn!(error = %message, retry_in = ?delay, "Push cycle failed");
                        s.push_failures += 1;
                        s.last_error = Some(message.clone());
                        emitter.emit_error(message, true);
                    }
                }
                drop(s);

                if report.synced > 0 {
                    if let Err(e) = processor.cleanup_synced().await {
                        warn!(?e, "Failed to remove synced queue rows");
                    }
                }
            }
            Err(e) => {
                error!(?e, "Push cycle aborted");
                gate.failed();
                let mut s = status.write().await;
                s.push_failures += 1;
                s.last_error = Some(e.to_string());
                emitter.emit_error(&e.to_string(), e.is_retryable());
            }
        }

        publish(&reporter, &status, emitter.as_ref()).await;
    }

    info!("Push loop stopped");
}

#[allow(clippy::too_many_arguments)]
async fn pull_loop(
    downloader: Downloader,
    reporter: StatusReporter,
    status: Arc<RwLock<SyncStatus>>,
    emitter: Arc<dyn SyncEventEmitter>,
    every: Duration,
    pacing: Pacing,
    mut trigger_rx: mpsc::Receiver<()>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("Pull loop starting");

    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut gate = RetryGate::new(&pacing);

    loop {
        let wake = tokio::select! {
            _ = interval.tick() => Wake::Tick,
            Some(()) = trigger_rx.recv() => Wake::Trigger,
            _ = shutdown_rx.changed() => Wake::Stop,
        };

        match wake {
            Wake::Stop => break,
            Wake::Trigger => gate.succeeded(),
            Wake::Tick if !gate.is_open() => {
                debug!("Pull backing off");
                continue;
            }
            Wake::Tick => {}
        }

        match downloader.pull().await {
            Ok(report) => {
                gate.succeeded();
                emitter.emit_pull(&report);
                let mut s = status.write().await;
                s.last_pull_at = Some(Utc::now());
                s.pull_failures = 0;
                if s.push_failures == 0 {
                    s.last_error = None;
                }
            }
            Err(e) => {
                let delay = gate.failed();
                warn!(error = %e, retry_in = ?delay, "Pull failed");
                let mut s = status.write().await;
                s.pull_failures += 1;
                s.last_error = Some(e.to_string());
                emitter.emit_error(&e.to_string(), e.is_retryable());
            }
        }

        publish(&reporter, &status, emitter.as_ref()).await;
    }

    info!("Pull loop stopped");
}

async fn publish(
    reporter: &StatusReporter,
    status: &RwLock<SyncStatus>,
    emitter: &dyn SyncEventEmitter,
) {
    match reporter.report().await {
        Ok(report) => {
            emitter.emit_status(&report);
            status.write().await.report = Some(report);
        }
        Err(e) => error!(?e, "Failed to compute sync status"),
    }
}

// =============================================================================
// Agent Handle (for external control)
// =============================================================================

/// Handle for controlling a running agent from outside.
#[derive(Clone)]
pub struct SyncAgentHandle {
    push_tx: mpsc::Sender<()>,
    pull_tx: mpsc::Sender<()>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    status: Arc<RwLock<SyncStatus>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    enabled: bool,
}

impl SyncAgentHandle {
    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Runs a push cycle now, skipping any backoff.
    pub fn sync_now(&self) -> SyncResult<()> {
        self.trigger(&self.push_tx)
    }

    /// Runs a pull now, skipping any backoff.
    pub fn pull_now(&self) -> SyncResult<()> {
        self.trigger(&self.pull_tx)
    }

    /// The network is back: push and pull right away.
    pub fn connectivity_restored(&self) -> SyncResult<()> {
        info!("Connectivity restored, syncing");
        self.sync_now()?;
        self.pull_now()
    }

    /// Stops both loops and waits for the running cycles to finish.
    pub async fn shutdown(&self) {
        info!("Shutting down sync agent");
        let _ = self.shutdown_tx.send(true);

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!(?e, "Sync task ended abnormally");
            }
        }

        self.status.write().await.running = false;
        info!("Sync agent stopped");
    }

    fn trigger(&self, tx: &mpsc::Sender<()>) -> SyncResult<()> {
        if !self.enabled {
            debug!("Sync disabled, trigger ignored");
            return Ok(());
        }
        match tx.try_send(()) {
            // A trigger is already waiting; one cycle covers both.
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(())) => Err(SyncError::ShuttingDown),
        }
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

pub struct SyncAgentBuilder {
    config: SyncConfig,
    db: Option<Database>,
    transport: Option<Arc<dyn SyncTransport>>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
}

impl SyncAgentBuilder {
    pub fn new(config: SyncConfig) -> Self {
        SyncAgentBuilder {
            config,
            db: None,
            transport: None,
            emitter: None,
        }
    }

    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn SyncTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn build(self) -> SyncResult<SyncAgent> {
        let db = self
            .db
            .ok_or_else(|| SyncError::InvalidConfig("Database required".into()))?;
        let transport = self
            .transport
            .ok_or_else(|| SyncError::InvalidConfig("Transport required".into()))?;
        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));

        Ok(SyncAgent::with_emitter(self.config, db, transport, emitter))
    }
}
