//! Background Sync Coordinator.
//!
//! The worker runs in its own tokio task and shares nothing with the pages:
//! commands go in over an mpsc channel, wake-up signals come out over one
//! port per attached page. Platform triggers (sync tags, the periodic timer,
//! connectivity changes) fan out a `SYNC_LOCATION` message to every page;
//! with no page attached the request is recorded and handed to the next page
//! that attaches. Delivery is at-least-once and unordered, so handlers must
//! be idempotent.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use geoguard_shared::protocol::{PageMessage, SyncReason, WorkerMessage};
use geoguard_shared::PositionSample;

use crate::error::TrackingError;

const COMMAND_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Periodic sync interval; `None` disables the timer.
    pub periodic_interval: Option<Duration>,
    /// Buffered signals per page. A full port already has a wake-up pending.
    pub port_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            periodic_interval: None,
            port_capacity: 4,
        }
    }
}

/// Snapshot of the worker's bookkeeping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerStatus {
    pub attached_pages: usize,
    /// A request recorded while no page was attached.
    pub deferred: Option<SyncReason>,
    pub last_location: Option<PositionSample>,
    pub signals_sent: u64,
}

enum WorkerCommand {
    Attach(mpsc::Sender<WorkerMessage>),
    Post(PageMessage),
    Sync(String),
    Connectivity(bool),
    Status(oneshot::Sender<WorkerStatus>),
    Shutdown,
}

/// Page-side end of the worker's message channel.
pub struct SyncPort {
    rx: mpsc::Receiver<WorkerMessage>,
}

impl SyncPort {
    /// Next wake-up signal; `None` once the worker is gone.
    pub async fn recv(&mut self) -> Option<WorkerMessage> {
        self.rx.recv().await
    }
}

/// Cloneable handle on the background worker.
#[derive(Clone)]
pub struct SyncCoordinator {
    cmd_tx: mpsc::Sender<WorkerCommand>,
    port_capacity: usize,
}

impl SyncCoordinator {
    /// Spawn the worker. Must be called from within a tokio runtime.
    pub fn register(config: SyncConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let port_capacity = config.port_capacity.max(1);
        tokio::spawn(worker_loop(cmd_rx, config.periodic_interval));
        info!("background sync worker registered");
        Self {
            cmd_tx,
            port_capacity,
        }
    }

    /// Attach a page; the returned port yields every sync request.
    pub async fn on_sync_requested(&self) -> Result<SyncPort, TrackingError> {
        let (tx, rx) = mpsc::channel(self.port_capacity);
        self.command(WorkerCommand::Attach(tx)).await?;
        Ok(SyncPort { rx })
    }

    /// Relay the latest fix to the worker. Never waits on a busy worker.
    pub fn post_location(&self, location: PositionSample) {
        let msg = WorkerCommand::Post(PageMessage::LocationUpdate { location });
        if let Err(e) = self.cmd_tx.try_send(msg) {
            debug!(error = %e, "location update not relayed to worker");
        }
    }

    /// Platform background-sync event carrying `tag`.
    pub async fn trigger_sync(&self, tag: &str) -> Result<(), TrackingError> {
        self.command(WorkerCommand::Sync(tag.to_string())).await
    }

    pub async fn connectivity_changed(&self, online: bool) -> Result<(), TrackingError> {
        self.command(WorkerCommand::Connectivity(online)).await
    }

    pub async fn status(&self) -> Result<WorkerStatus, TrackingError> {
        let (reply, rx) = oneshot::channel();
        self.command(WorkerCommand::Status(reply)).await?;
        rx.await.map_err(|_| TrackingError::WorkerGone)
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(WorkerCommand::Shutdown).await;
    }

    async fn command(&self, cmd: WorkerCommand) -> Result<(), TrackingError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| TrackingError::WorkerGone)
    }
}

#[derive(Default)]
struct Worker {
    pages: Vec<mpsc::Sender<WorkerMessage>>,
    deferred: Option<SyncReason>,
    last_location: Option<PositionSample>,
    signals_sent: u64,
}

impl Worker {
    fn attach(&mut self, port: mpsc::Sender<WorkerMessage>) {
        if let Some(reason) = self.deferred.take() {
            debug!(?reason, "delivering deferred sync request to new page");
            if port.try_send(WorkerMessage::SyncLocation { reason: SyncReason::Deferred }).is_ok() {
                self.signals_sent += 1;
            }
        }
        self.pages.retain(|port| !port.is_closed());
        self.pages.push(port);
        debug!(pages = self.pages.len(), "page attached to sync worker");
    }

    fn dispatch(&mut self, reason: SyncReason) {
        self.pages.retain(|port| !port.is_closed());

        if self.pages.is_empty() {
            debug!(?reason, "no page attached, recording sync request");
            self.deferred = Some(reason);
            return;
        }

        let msg = WorkerMessage::SyncLocation { reason };
        let mut delivered = 0;
        self.pages.retain(|port| match port.try_send(msg) {
            Ok(()) => {
                delivered += 1;
                true
            }
            // A wake-up is already waiting on this page.
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        self.signals_sent += delivered;
        debug!(?reason, delivered, "sync request dispatched");
    }

    fn status(&self) -> WorkerStatus {
        WorkerStatus {
            attached_pages: self.pages.iter().filter(|p| !p.is_closed()).count(),
            deferred: self.deferred,
            last_location: self.last_location,
            signals_sent: self.signals_sent,
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn worker_loop(mut cmd_rx: mpsc::Receiver<WorkerCommand>, periodic: Option<Duration>) {
    let mut worker = Worker::default();
    let mut ticker = periodic.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(WorkerCommand::Attach(port)) => worker.attach(port),
                    Some(WorkerCommand::Post(PageMessage::LocationUpdate { location })) => {
                        worker.last_location = Some(location);
                    }
                    Some(WorkerCommand::Sync(tag)) => match SyncReason::from_tag(&tag) {
                        Some(reason) => worker.dispatch(reason),
                        None => debug!(tag = %tag, "ignoring unknown sync tag"),
                    },
                    Some(WorkerCommand::Connectivity(true)) => {
                        worker.dispatch(SyncReason::ConnectivityRestored);
                    }
                    Some(WorkerCommand::Connectivity(false)) => {
                        debug!("connectivity lost");
                    }
                    Some(WorkerCommand::Status(reply)) => {
                        let _ = reply.send(worker.status());
                    }
                    Some(WorkerCommand::Shutdown) => {
                        info!("sync worker shutdown requested");
                        break;
                    }
                    None => {
                        warn!("all coordinator handles dropped, stopping sync worker");
                        break;
                    }
                }
            }

            _ = next_tick(&mut ticker) => worker.dispatch(SyncReason::Periodic),
        }
    }
}
