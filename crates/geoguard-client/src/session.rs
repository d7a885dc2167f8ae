//! Tracking Session: the orchestrator state machine.
//!
//! One session per signed-in user. `start()` opens the sampler watch and
//! spawns a driver task that owns every suspension point: writes, queue
//! flushes and one-shot resamples all run on that task, one at a time, so a
//! write always settles before the next fix is looked at. The session handle
//! itself only touches the watch and the status channel.
//!
//! Each start bumps a generation counter; `stop()` bumps it again, so a
//! driver that is still awaiting a write when the session stops sees a stale
//! generation and discards the result.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use geoguard_shared::protocol::{SyncReason, WorkerMessage};
use geoguard_shared::{DegradedReason, PositionSample, SamplerError, TrackingStatus, UserMeta};
use geoguard_store::PendingQueue;

use crate::auth::{AuthProvider, AuthUser};
use crate::error::TrackingError;
use crate::sampler::{PositionSampler, PositionSource, SamplerEvent, WatchOptions};
use crate::sync::{SyncCoordinator, SyncPort};
use crate::writer::RemoteLocationWriter;

/// Collaborators a session is built from.
pub struct SessionParts {
    pub auth: Arc<dyn AuthProvider>,
    pub source: Arc<dyn PositionSource>,
    pub writer: RemoteLocationWriter,
    /// Queue template; the session rebinds it to the signed-in account.
    pub queue: PendingQueue,
    pub sync: Option<SyncCoordinator>,
    pub watch: WatchOptions,
    pub resample: WatchOptions,
}

enum DriverCommand {
    Connectivity(bool),
    Sync(SyncReason),
}

struct DriverHandle {
    generation: u64,
    session_id: Uuid,
    commands: mpsc::UnboundedSender<DriverCommand>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct Shared {
    auth: Arc<dyn AuthProvider>,
    source: Arc<dyn PositionSource>,
    writer: RemoteLocationWriter,
    queue: PendingQueue,
    sync: Option<SyncCoordinator>,
    resample: WatchOptions,
    sampler: Mutex<PositionSampler>,
    driver: Mutex<Option<DriverHandle>>,
    /// Stopped drivers that may still be finishing a write or the offline marker.
    retiring: Mutex<Vec<JoinHandle<()>>>,
    generation: AtomicU64,
    status: watch::Sender<TrackingStatus>,
    last_known: watch::Sender<Option<PositionSample>>,
}

impl Shared {
    fn sampler(&self) -> MutexGuard<'_, PositionSampler> {
        self.sampler.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn driver(&self) -> MutexGuard<'_, Option<DriverHandle>> {
        self.driver.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn retiring(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.retiring.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait for every stopped driver to exit.
    async fn join_retired(&self) {
        let tasks: Vec<_> = self.retiring().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "tracking driver ended abnormally");
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Apply a transition if the state machine allows it.
    fn transition(&self, next: TrackingStatus) {
        self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if !current.can_transition_to(&next) {
                debug!(from = %current, to = %next, "ignoring invalid status transition");
                return false;
            }
            info!(from = %current, to = %next, "tracking status changed");
            *current = next;
            true
        });
    }

    /// Stop the running session. With `only`, a session from another
    /// generation is left alone.
    fn stop(&self, only: Option<u64>) {
        let handle = {
            let mut slot = self.driver();
            if let (Some(handle), Some(generation)) = (slot.as_ref(), only) {
                if handle.generation != generation {
                    return;
                }
            }
            slot.take()
        };

        if handle.is_none() && !self.status.borrow().is_active() {
            return;
        }

        self.generation.fetch_add(1, Ordering::SeqCst);
        self.sampler().stop_watching();
        self.transition(TrackingStatus::Stopped);

        if let Some(handle) = handle {
            info!(session = %handle.session_id, "tracking session stopped");
            // The driver sends the offline marker once its current write settles.
            let _ = handle.stop.send(());
            self.retiring().push(handle.task);
        }
    }
}

/// Handle exposed to the UI layer.
pub struct TrackingSession {
    shared: Arc<Shared>,
}

impl TrackingSession {
    pub fn new(parts: SessionParts) -> Self {
        let (status, _) = watch::channel(TrackingStatus::Idle);
        let (last_known, _) = watch::channel(None);
        let sampler = PositionSampler::new(parts.source.clone(), parts.watch);
        Self {
            shared: Arc::new(Shared {
                auth: parts.auth,
                source: parts.source,
                writer: parts.writer,
                queue: parts.queue,
                sync: parts.sync,
                resample: parts.resample,
                sampler: Mutex::new(sampler),
                driver: Mutex::new(None),
                retiring: Mutex::new(Vec::new()),
                generation: AtomicU64::new(0),
                status,
                last_known,
            }),
        }
    }

    pub fn status(&self) -> TrackingStatus {
        *self.shared.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<TrackingStatus> {
        self.shared.status.subscribe()
    }

    pub fn last_known_position(&self) -> Option<PositionSample> {
        *self.shared.last_known.borrow()
    }

    pub fn subscribe_last_known(&self) -> watch::Receiver<Option<PositionSample>> {
        self.shared.last_known.subscribe()
    }

    /// Id of the running session, if any.
    pub fn session_id(&self) -> Option<Uuid> {
        self.shared.driver().as_ref().map(|h| h.session_id)
    }

    /// Start tracking for the signed-in user.
    ///
    /// A no-op while a session is already running. Fails with
    /// [`TrackingError::AuthRequired`] when nobody is signed in, and with the
    /// sampler error when the device has no location capability.
    pub async fn start(&self) -> Result<(), TrackingError> {
        let shared = &self.shared;
        let user = shared.auth.current_user().ok_or(TrackingError::AuthRequired)?;
        if shared.driver().is_some() {
            debug!(user = %user.id, "tracking already running");
            return Ok(());
        }

        // The previous driver's last write and offline marker must land
        // before this session writes anything.
        shared.join_retired().await;

        let meta = UserMeta {
            user_id: user.id.clone(),
            display_name: shared.writer.resolve_display_name(&user).await,
            email: user.email.clone(),
        };
        let queue = shared.queue.for_account(user.id.clone());
        let restored = queue.last_known().unwrap_or_else(|e| {
            warn!(error = %e, "could not read last known location");
            None
        });
        let port = match &shared.sync {
            Some(sync) => match sync.on_sync_requested().await {
                Ok(port) => Some(port),
                Err(e) => {
                    warn!(error = %e, "background sync unavailable");
                    None
                }
            },
            None => None,
        };

        let mut slot = shared.driver();
        if slot.is_some() {
            return Ok(());
        }

        let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        shared.status.send_replace(TrackingStatus::Starting);
        if restored.is_some() {
            shared.last_known.send_replace(restored);
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        if let Err(e) = shared.sampler().start_watching(event_tx) {
            warn!(user = %user.id, error = %e, "could not start position watch");
            shared.status.send_replace(TrackingStatus::Degraded(e.into()));
            return Err(e.into());
        }

        let session_id = Uuid::new_v4();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (stop, stop_rx) = oneshot::channel();
        let driver = Driver {
            shared: shared.clone(),
            generation,
            session_id,
            user: user.clone(),
            meta,
            queue,
            permission_denied: false,
        };
        let task = tokio::spawn(driver.run(
            event_rx,
            command_rx,
            stop_rx,
            port,
            shared.auth.subscribe(),
        ));

        *slot = Some(DriverHandle {
            generation,
            session_id,
            commands,
            stop,
            task,
        });
        info!(session = %session_id, user = %user.id, "tracking session started");
        Ok(())
    }

    /// Stop tracking. The watch is cleared before this returns; a write in
    /// flight may still land but no longer changes the status.
    pub fn stop(&self) {
        self.shared.stop(None);
    }

    /// Stop, then wait up to `grace` for the offline marker to go out.
    pub async fn shutdown(&self, grace: Duration) {
        self.stop();
        if tokio::time::timeout(grace, self.shared.join_retired())
            .await
            .is_err()
        {
            warn!("tracking driver still busy at shutdown");
        }
    }

    /// Platform connectivity change.
    pub fn connectivity_changed(&self, online: bool) {
        self.send(DriverCommand::Connectivity(online));
    }

    /// Flush and resample now, as a sync trigger would.
    pub fn sync_now(&self) {
        self.send(DriverCommand::Sync(SyncReason::OneOff));
    }

    fn send(&self, cmd: DriverCommand) {
        if let Some(handle) = self.shared.driver().as_ref() {
            let _ = handle.commands.send(cmd);
        }
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.shared.stop(None);
    }
}

// ---------------------------------------------------------------------------
// Driver task
// ---------------------------------------------------------------------------

struct Driver {
    shared: Arc<Shared>,
    generation: u64,
    session_id: Uuid,
    user: AuthUser,
    meta: UserMeta,
    queue: PendingQueue,
    permission_denied: bool,
}

async fn next_sync(port: &mut Option<SyncPort>) -> Option<WorkerMessage> {
    match port {
        Some(port) => port.recv().await,
        None => std::future::pending().await,
    }
}

/// Take everything already buffered behind `first`, keeping every error
/// but only the newest fix.
fn coalesce(
    first: SamplerEvent,
    events: &mut mpsc::UnboundedReceiver<SamplerEvent>,
) -> Vec<SamplerEvent> {
    let mut batch = vec![first];
    while let Ok(event) = events.try_recv() {
        batch.push(event);
    }
    if let Some(last_fix) = batch.iter().rposition(SamplerEvent::is_fix) {
        let mut index = 0;
        batch.retain(|event| {
            let keep = !event.is_fix() || index == last_fix;
            index += 1;
            keep
        });
    }
    batch
}

impl Driver {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<SamplerEvent>,
        mut commands: mpsc::UnboundedReceiver<DriverCommand>,
        mut stop: oneshot::Receiver<()>,
        mut port: Option<SyncPort>,
        mut auth: watch::Receiver<Option<AuthUser>>,
    ) {
        // Replay anything left over from a previous run.
        self.flush().await;

        let mut auth_open = true;
        loop {
            tokio::select! {
                biased;

                _ = &mut stop => break,

                changed = auth.changed(), if auth_open => {
                    if changed.is_err() {
                        auth_open = false;
                        continue;
                    }
                    let same_user = auth
                        .borrow_and_update()
                        .as_ref()
                        .is_some_and(|u| u.id == self.user.id);
                    if !same_user {
                        info!(session = %self.session_id, "signed out, stopping tracking");
                        self.shared.stop(Some(self.generation));
                    }
                }

                Some(event) = events.recv() => {
                    for event in coalesce(event, &mut events) {
                        match event {
                            SamplerEvent::Fix(sample) => self.handle_fix(sample).await,
                            SamplerEvent::Error(err) => self.handle_error(err),
                        }
                    }
                }

                Some(cmd) = commands.recv() => match cmd {
                    DriverCommand::Connectivity(online) => self.handle_connectivity(online).await,
                    DriverCommand::Sync(reason) => self.handle_sync(reason).await,
                },

                Some(msg) = next_sync(&mut port) => {
                    let WorkerMessage::SyncLocation { reason } = msg;
                    self.handle_sync(reason).await;
                }
            }
        }

        if let Err(e) = self.shared.writer.mark_offline(&self.user.id).await {
            debug!(user = %self.user.id, error = %e, "offline marker not delivered");
        }
        debug!(session = %self.session_id, "tracking driver exited");
    }

    fn is_current(&self) -> bool {
        self.shared.is_current(self.generation)
    }

    fn transition(&self, next: TrackingStatus) {
        if self.is_current() {
            self.shared.transition(next);
        }
    }

    async fn handle_fix(&mut self, sample: PositionSample) {
        if !self.is_current() || self.permission_denied {
            return;
        }
        if !sample.is_valid() {
            warn!(lat = sample.latitude, lon = sample.longitude, "discarding invalid fix");
            return;
        }

        if let Err(e) = self.queue.save_last_known(&sample) {
            warn!(error = %e, "could not persist last known location");
        }
        self.shared.last_known.send_replace(Some(sample));
        if let Some(sync) = &self.shared.sync {
            sync.post_location(sample);
        }

        let result = self.shared.writer.write(&sample, &self.meta).await;
        if !self.is_current() {
            debug!(session = %self.session_id, "discarding write result of stopped session");
            return;
        }

        match result {
            Ok(()) => {
                // Everything queued is older than what was just delivered.
                if let Err(e) = self.queue.drain() {
                    warn!(error = %e, "could not clear pending queue");
                }
                self.transition(TrackingStatus::Live);
            }
            Err(e) => {
                warn!(user = %self.user.id, error = %e, "location write failed, queueing");
                if let Err(e) = self.queue.enqueue(&sample) {
                    warn!(error = %e, "could not queue location");
                }
                self.transition(TrackingStatus::Degraded(DegradedReason::RemoteWriteFailed));
            }
        }
    }

    fn handle_error(&mut self, err: SamplerError) {
        if !self.is_current() || self.permission_denied {
            return;
        }
        if err.is_terminal() {
            warn!(session = %self.session_id, "location permission denied, watch closed");
            self.permission_denied = true;
            self.shared.sampler().stop_watching();
        } else {
            debug!(error = %err, "sampler error");
        }
        self.transition(TrackingStatus::Degraded(err.into()));
    }

    async fn handle_connectivity(&mut self, online: bool) {
        if online {
            debug!("connectivity restored, flushing");
            self.flush().await;
            // Nothing was waiting to be sent: the outage alone degraded us.
            let offline = *self.shared.status.borrow()
                == TrackingStatus::Degraded(DegradedReason::Offline);
            if offline && matches!(self.queue.is_empty(), Ok(true)) {
                self.transition(TrackingStatus::Live);
            }
        } else if !self.permission_denied {
            self.transition(TrackingStatus::Degraded(DegradedReason::Offline));
        }
    }

    async fn handle_sync(&mut self, reason: SyncReason) {
        debug!(?reason, "sync requested");
        self.flush().await;
        if !self.is_current() || self.permission_denied {
            return;
        }
        let source = self.shared.source.clone();
        match source.current_position(self.shared.resample).await {
            Ok(sample) => self.handle_fix(sample).await,
            Err(err) => self.handle_error(err),
        }
    }

    /// Re-send the newest queued sample; clear the queue once it lands.
    async fn flush(&mut self) {
        if !self.is_current() {
            return;
        }
        let latest = match self.queue.peek_latest() {
            Ok(Some(sample)) => sample,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "could not read pending queue");
                return;
            }
        };

        let result = self.shared.writer.write(&latest, &self.meta).await;
        if !self.is_current() {
            return;
        }
        match result {
            Ok(()) => {
                match self.queue.drain() {
                    Ok(n) => info!(flushed = n, "pending locations flushed"),
                    Err(e) => warn!(error = %e, "could not clear pending queue"),
                }
                if !self.permission_denied {
                    self.transition(TrackingStatus::Live);
                }
            }
            Err(e) => {
                debug!(error = %e, "flush failed, will retry on next trigger");
                let current = *self.shared.status.borrow();
                if matches!(current, TrackingStatus::Starting | TrackingStatus::Live) {
                    self.transition(TrackingStatus::Degraded(DegradedReason::RemoteWriteFailed));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Value};

    use geoguard_shared::constants::{LOCATIONS_COLLECTION, SYNC_TAG, USERS_COLLECTION};
    use geoguard_shared::{AdminPolicy, Document};
    use geoguard_store::Database;

    use super::*;
    use crate::auth::SharedAuth;
    use crate::sampler::FakePositionSource;
    use crate::sync::SyncConfig;
    use crate::writer::MemoryDocumentStore;

    const USER: &str = "u-1";

    struct Fixture {
        _dir: tempfile::TempDir,
        auth: Arc<SharedAuth>,
        source: Arc<FakePositionSource>,
        store: Arc<MemoryDocumentStore>,
        queue: PendingQueue,
        session: TrackingSession,
    }

    fn fixture_with(sync: Option<SyncCoordinator>, source: FakePositionSource) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("geoguard.db")).unwrap();
        let queue = PendingQueue::new(Arc::new(Mutex::new(db)), USER, 10).unwrap();
        let auth = Arc::new(SharedAuth::signed_in(
            AuthUser::new(USER, "asha@example.com"),
            AdminPolicy::default(),
        ));
        let source = Arc::new(source);
        let store = Arc::new(MemoryDocumentStore::new());
        let session = TrackingSession::new(SessionParts {
            auth: auth.clone(),
            source: source.clone(),
            writer: RemoteLocationWriter::new(store.clone()),
            queue: queue.clone(),
            sync,
            watch: WatchOptions::default(),
            resample: WatchOptions::resample(),
        });
        Fixture {
            _dir: dir,
            auth,
            source,
            store,
            queue,
            session,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(None, FakePositionSource::new())
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        while !check() {
            assert!(tokio::time::Instant::now() < deadline, "condition not reached");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn wait_status(session: &TrackingSession, expected: TrackingStatus) {
        let mut rx = session.subscribe_status();
        tokio::time::timeout(Duration::from_secs(3), rx.wait_for(|s| *s == expected))
            .await
            .unwrap_or_else(|_| panic!("status never became {expected}, is {}", session.status()))
            .unwrap();
    }

    impl Fixture {
        fn record(&self) -> Option<Document> {
            self.store.document(LOCATIONS_COLLECTION, USER)
        }

        fn position_writes(&self) -> Vec<f64> {
            self.store
                .upserts()
                .into_iter()
                .filter_map(|(_, _, doc)| doc.get("latitude").and_then(Value::as_f64))
                .collect()
        }
    }

    #[tokio::test]
    async fn test_fix_goes_live() {
        let f = fixture();
        f.session.start().await.unwrap();
        assert_eq!(f.session.status(), TrackingStatus::Starting);

        f.source.push_fix(PositionSample::new(12.9, 77.6, Some(15.0)));
        wait_status(&f.session, TrackingStatus::Live).await;

        let record = f.record().unwrap();
        assert_eq!(record["latitude"], json!(12.9));
        assert_eq!(record["longitude"], json!(77.6));
        assert_eq!(record["accuracyMeters"], json!(15.0));
        assert_eq!(record["isOnline"], json!(true));
        assert_eq!(record["displayName"], json!("asha"));
        assert_eq!(f.session.last_known_position().unwrap().latitude, 12.9);
    }

    #[tokio::test]
    async fn test_write_failure_queues_then_connectivity_flushes() {
        let f = fixture();
        f.session.start().await.unwrap();
        f.store.set_online(false);

        let fix = PositionSample::new(12.9, 77.6, Some(15.0));
        f.source.push_fix(fix);
        wait_status(
            &f.session,
            TrackingStatus::Degraded(DegradedReason::RemoteWriteFailed),
        )
        .await;

        let entries = f.queue.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sample, fix);
        assert!(f.record().is_none());

        f.store.set_online(true);
        f.session.connectivity_changed(true);
        wait_status(&f.session, TrackingStatus::Live).await;

        assert_eq!(f.record().unwrap()["latitude"], json!(12.9));
        assert!(f.queue.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_permission_denied_until_restart() {
        let f = fixture();
        f.session.start().await.unwrap();

        f.source.push_error(SamplerError::PermissionDenied);
        let denied = TrackingStatus::Degraded(DegradedReason::PermissionDenied);
        wait_status(&f.session, denied).await;
        assert_eq!(
            f.session.status().message(),
            SamplerError::PermissionDenied.user_message()
        );
        assert_eq!(f.source.active_watches(), 0);

        // Nothing reaches the session and recovery triggers do not lift it.
        assert_eq!(f.source.push_fix(PositionSample::new(1.0, 2.0, None)), 0);
        f.session.connectivity_changed(true);
        f.session.connectivity_changed(false);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.session.status(), denied);

        f.session.stop();
        f.session.start().await.unwrap();
        assert_eq!(f.source.active_watches(), 1);
        f.source.push_fix(PositionSample::new(1.0, 2.0, None));
        wait_status(&f.session, TrackingStatus::Live).await;
    }

    #[tokio::test]
    async fn test_transient_errors_self_heal() {
        let f = fixture();
        f.session.start().await.unwrap();

        f.source.push_error(SamplerError::Timeout);
        wait_status(&f.session, TrackingStatus::Degraded(DegradedReason::Timeout)).await;
        assert_eq!(f.source.active_watches(), 1);

        f.source.push_fix(PositionSample::new(12.9, 77.6, None));
        wait_status(&f.session, TrackingStatus::Live).await;
    }

    #[tokio::test]
    async fn test_double_start_single_watch() {
        let f = fixture();
        f.session.start().await.unwrap();
        let id = f.session.session_id();
        f.session.start().await.unwrap();

        assert_eq!(f.source.active_watches(), 1);
        assert_eq!(f.source.watches_opened(), 1);
        assert_eq!(f.session.session_id(), id);
    }

    #[tokio::test]
    async fn test_fix_after_stop_is_noop() {
        let f = fixture();
        f.session.start().await.unwrap();
        f.source.push_fix(PositionSample::new(12.9, 77.6, None));
        wait_status(&f.session, TrackingStatus::Live).await;

        f.session.stop();
        assert_eq!(f.session.status(), TrackingStatus::Stopped);
        assert_eq!(f.source.active_watches(), 0);
        assert_eq!(f.source.push_fix(PositionSample::new(40.0, 8.0, None)), 0);

        eventually(|| f.record().unwrap()["isOnline"] == json!(false)).await;
        assert_eq!(f.position_writes(), vec![12.9]);
        assert_eq!(f.session.status(), TrackingStatus::Stopped);
    }

    #[tokio::test]
    async fn test_in_flight_write_discarded_after_stop() {
        let f = fixture();
        f.session.start().await.unwrap();
        f.store.set_latency(Some(Duration::from_millis(100)));

        f.source.push_fix(PositionSample::new(12.9, 77.6, None));
        tokio::time::sleep(Duration::from_millis(20)).await;
        f.session.stop();

        eventually(|| {
            f.record()
                .is_some_and(|r| r.get("isOnline") == Some(&json!(false)))
        })
        .await;
        assert_eq!(f.session.status(), TrackingStatus::Stopped);
        // The write landed before the offline marker.
        assert_eq!(f.position_writes(), vec![12.9]);
    }

    #[tokio::test]
    async fn test_last_fix_wins() {
        let f = fixture();
        f.session.start().await.unwrap();
        f.store.set_latency(Some(Duration::from_millis(5)));

        for i in 1..=8 {
            f.source.push_fix(PositionSample::new(i as f64, 77.6, None));
        }

        eventually(|| {
            f.record().is_some_and(|r| r["latitude"] == json!(8.0))
        })
        .await;

        let writes = f.position_writes();
        assert!(writes.windows(2).all(|w| w[0] < w[1]), "out of order: {writes:?}");
        assert_eq!(writes.last(), Some(&8.0));
    }

    #[tokio::test]
    async fn test_queue_stays_bounded() {
        let f = fixture();
        f.session.start().await.unwrap();
        f.store.set_online(false);

        for i in 1..=12 {
            f.source.push_fix(PositionSample::new(i as f64, 0.0, None));
            let expected = i.min(10);
            eventually(|| f.queue.len().unwrap() == expected).await;
            eventually(|| {
                f.queue
                    .peek_latest()
                    .unwrap()
                    .is_some_and(|s| s.latitude == i as f64)
            })
            .await;
        }

        let entries = f.queue.entries().unwrap();
        assert_eq!(entries.len(), 10);
        assert_eq!(entries[0].sample.latitude, 3.0);
    }

    #[tokio::test]
    async fn test_start_requires_auth() {
        let f = fixture();
        f.auth.sign_out();
        assert!(matches!(
            f.session.start().await,
            Err(TrackingError::AuthRequired)
        ));
        assert_eq!(f.session.status(), TrackingStatus::Idle);
        assert_eq!(f.source.watches_opened(), 0);
    }

    #[tokio::test]
    async fn test_not_supported_surfaces_on_start() {
        let f = fixture_with(None, FakePositionSource::unsupported());
        let err = f.session.start().await.unwrap_err();
        assert!(matches!(
            err,
            TrackingError::Sampler(SamplerError::NotSupported)
        ));
        assert_eq!(
            f.session.status(),
            TrackingStatus::Degraded(DegradedReason::NotSupported)
        );
        assert!(f.session.session_id().is_none());

        f.session.stop();
        assert_eq!(f.session.status(), TrackingStatus::Stopped);
    }

    #[tokio::test]
    async fn test_sign_out_stops_session() {
        let f = fixture();
        f.session.start().await.unwrap();
        f.auth.sign_out();

        wait_status(&f.session, TrackingStatus::Stopped).await;
        assert_eq!(f.source.active_watches(), 0);
        assert!(f.session.session_id().is_none());
    }

    #[tokio::test]
    async fn test_offline_event_degrades() {
        let f = fixture();
        f.session.start().await.unwrap();
        f.source.push_fix(PositionSample::new(12.9, 77.6, None));
        wait_status(&f.session, TrackingStatus::Live).await;

        f.session.connectivity_changed(false);
        wait_status(&f.session, TrackingStatus::Degraded(DegradedReason::Offline)).await;
        assert_eq!(f.session.status().indicator().label(), "Offline");

        f.session.connectivity_changed(true);
        wait_status(&f.session, TrackingStatus::Live).await;
        assert_eq!(f.position_writes(), vec![12.9]);
    }

    #[tokio::test]
    async fn test_restart_waits_for_previous_driver() {
        let f = fixture();
        f.session.start().await.unwrap();
        f.store.set_latency(Some(Duration::from_millis(150)));

        f.source.push_fix(PositionSample::new(1.0, 1.0, None));
        tokio::time::sleep(Duration::from_millis(20)).await;
        f.session.stop();
        f.store.set_latency(None);

        f.session.start().await.unwrap();
        // The old write and its offline marker are already in.
        assert_eq!(f.position_writes(), vec![1.0]);
        assert_eq!(f.record().unwrap()["isOnline"], json!(false));

        f.source.push_fix(PositionSample::new(2.0, 2.0, None));
        wait_status(&f.session, TrackingStatus::Live).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        let record = f.record().unwrap();
        assert_eq!(record["latitude"], json!(2.0));
        assert_eq!(record["isOnline"], json!(true));
        assert_eq!(f.position_writes(), vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_offline_marker() {
        let f = fixture();
        f.session.start().await.unwrap();
        f.source.push_fix(PositionSample::new(12.9, 77.6, None));
        wait_status(&f.session, TrackingStatus::Live).await;

        f.store.set_latency(Some(Duration::from_millis(50)));
        f.session.shutdown(Duration::from_secs(2)).await;
        assert_eq!(f.record().unwrap()["isOnline"], json!(false));
    }

    #[tokio::test]
    async fn test_startup_replays_queue() {
        let f = fixture();
        f.queue.enqueue(&PositionSample::new(1.0, 1.0, None)).unwrap();
        f.queue.enqueue(&PositionSample::new(2.0, 2.0, None)).unwrap();

        f.session.start().await.unwrap();
        wait_status(&f.session, TrackingStatus::Live).await;

        assert_eq!(f.position_writes(), vec![2.0]);
        assert!(f.queue.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_restores_last_known_location() {
        let f = fixture();
        let saved = PositionSample::new(48.85, 2.35, Some(20.0));
        f.queue.save_last_known(&saved).unwrap();

        f.session.start().await.unwrap();
        assert_eq!(f.session.last_known_position(), Some(saved));
    }

    #[tokio::test]
    async fn test_profile_name_on_record() {
        let f = fixture();
        let profile = json!({"firstName": "Asha", "lastName": "Rao"});
        if let Value::Object(doc) = profile {
            f.store.insert(USERS_COLLECTION, USER, doc);
        }

        f.session.start().await.unwrap();
        f.source.push_fix(PositionSample::new(12.9, 77.6, None));
        wait_status(&f.session, TrackingStatus::Live).await;
        assert_eq!(f.record().unwrap()["displayName"], json!("Asha Rao"));
    }

    #[tokio::test]
    async fn test_sync_trigger_resamples() {
        let sync = SyncCoordinator::register(SyncConfig::default());
        let f = fixture_with(Some(sync.clone()), FakePositionSource::new());
        f.session.start().await.unwrap();

        f.source
            .queue_current(Ok(PositionSample::new(51.5, -0.12, Some(8.0))));
        sync.trigger_sync(SYNC_TAG).await.unwrap();

        wait_status(&f.session, TrackingStatus::Live).await;
        assert_eq!(f.record().unwrap()["latitude"], json!(51.5));

        // The accepted fix was relayed to the worker.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            let status = sync.status().await.unwrap();
            if status.last_location.is_some_and(|s| s.latitude == 51.5) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "location never relayed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn test_coalesce_keeps_errors_and_newest_fix() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let a = PositionSample::new(1.0, 1.0, None);
        let b = PositionSample::new(2.0, 2.0, None);
        tx.send(SamplerEvent::Error(SamplerError::Timeout)).unwrap();
        tx.send(SamplerEvent::Fix(b)).unwrap();

        let batch = coalesce(SamplerEvent::Fix(a), &mut rx);
        assert_eq!(
            batch,
            vec![
                SamplerEvent::Error(SamplerError::Timeout),
                SamplerEvent::Fix(b)
            ]
        );
    }
}
