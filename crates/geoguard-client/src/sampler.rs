//! Position Sampler.
//!
//! [`PositionSource`] is the platform capability (a continuous watch plus a
//! one-shot read). [`PositionSampler`] sits on top of it and guarantees at
//! most one live subscription: starting a new watch clears the previous one.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use geoguard_shared::constants::{FIX_TIMEOUT_SECS, RESAMPLE_TIMEOUT_SECS};
use geoguard_shared::{PositionSample, SamplerError};

/// Options passed to the platform for every subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub high_accuracy: bool,
    /// Per-fix timeout; when it expires the source reports
    /// [`SamplerError::Timeout`] and keeps watching.
    pub timeout: Duration,
    /// Oldest cached fix the source may hand out. Zero disables caching.
    pub maximum_age: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: Duration::from_secs(FIX_TIMEOUT_SECS),
            maximum_age: Duration::ZERO,
        }
    }
}

impl WatchOptions {
    /// Options for the one-shot resample requested by the sync worker.
    pub fn resample() -> Self {
        Self {
            timeout: Duration::from_secs(RESAMPLE_TIMEOUT_SECS),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

/// One callback of a continuous watch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplerEvent {
    Fix(PositionSample),
    Error(SamplerError),
}

impl SamplerEvent {
    pub fn is_fix(&self) -> bool {
        matches!(self, SamplerEvent::Fix(_))
    }
}

#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Start delivering events into `sink` until [`PositionSource::clear_watch`].
    ///
    /// Fails right away only when the capability is absent.
    fn watch_position(
        &self,
        options: WatchOptions,
        sink: mpsc::UnboundedSender<SamplerEvent>,
    ) -> Result<WatchId, SamplerError>;

    /// Stop a watch. No event is delivered for it once this returns.
    fn clear_watch(&self, id: WatchId);

    async fn current_position(&self, options: WatchOptions)
        -> Result<PositionSample, SamplerError>;
}

pub struct PositionSampler {
    source: Arc<dyn PositionSource>,
    options: WatchOptions,
    active: Option<WatchId>,
}

impl PositionSampler {
    pub fn new(source: Arc<dyn PositionSource>, options: WatchOptions) -> Self {
        Self {
            source,
            options,
            active: None,
        }
    }

    /// Start watching; any previous subscription is cleared first.
    pub fn start_watching(
        &mut self,
        sink: mpsc::UnboundedSender<SamplerEvent>,
    ) -> Result<WatchId, SamplerError> {
        self.stop_watching();
        let id = self.source.watch_position(self.options, sink)?;
        debug!(watch = id.0, "position watch started");
        self.active = Some(id);
        Ok(id)
    }

    pub fn stop_watching(&mut self) {
        if let Some(id) = self.active.take() {
            self.source.clear_watch(id);
            debug!(watch = id.0, "position watch cleared");
        }
    }

    pub fn is_watching(&self) -> bool {
        self.active.is_some()
    }

    /// Handle on the source for one-shot reads outside the sampler lock.
    pub fn source(&self) -> Arc<dyn PositionSource> {
        self.source.clone()
    }
}

impl Drop for PositionSampler {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

// ---------------------------------------------------------------------------
// Fake source
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeState {
    next_id: u64,
    watches: HashMap<WatchId, mpsc::UnboundedSender<SamplerEvent>>,
    one_shots: VecDeque<Result<PositionSample, SamplerError>>,
    last_fix: Option<PositionSample>,
    unsupported: bool,
    watches_opened: usize,
}

/// Scriptable source: fixes and errors are pushed by hand.
#[derive(Default)]
pub struct FakePositionSource {
    state: Mutex<FakeState>,
}

impl FakePositionSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source on a device without location capability.
    pub fn unsupported() -> Self {
        let source = Self::default();
        source.lock().unsupported = true;
        source
    }

    /// Deliver a fix to every active watch. Returns how many received it.
    pub fn push_fix(&self, sample: PositionSample) -> usize {
        let mut state = self.lock();
        state.last_fix = Some(sample);
        deliver(&mut state, SamplerEvent::Fix(sample))
    }

    pub fn push_error(&self, err: SamplerError) -> usize {
        let mut state = self.lock();
        deliver(&mut state, SamplerEvent::Error(err))
    }

    /// Script the result of the next one-shot read.
    pub fn queue_current(&self, result: Result<PositionSample, SamplerError>) {
        self.lock().one_shots.push_back(result);
    }

    pub fn active_watches(&self) -> usize {
        self.lock().watches.len()
    }

    /// Total number of watches ever opened.
    pub fn watches_opened(&self) -> usize {
        self.lock().watches_opened
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn deliver(state: &mut FakeState, event: SamplerEvent) -> usize {
    state.watches.retain(|_, sink| !sink.is_closed());
    state
        .watches
        .values()
        .filter(|sink| sink.send(event).is_ok())
        .count()
}

#[async_trait]
impl PositionSource for FakePositionSource {
    fn watch_position(
        &self,
        _options: WatchOptions,
        sink: mpsc::UnboundedSender<SamplerEvent>,
    ) -> Result<WatchId, SamplerError> {
        let mut state = self.lock();
        if state.unsupported {
            return Err(SamplerError::NotSupported);
        }
        state.next_id += 1;
        state.watches_opened += 1;
        let id = WatchId(state.next_id);
        state.watches.insert(id, sink);
        Ok(id)
    }

    fn clear_watch(&self, id: WatchId) {
        self.lock().watches.remove(&id);
    }

    async fn current_position(
        &self,
        _options: WatchOptions,
    ) -> Result<PositionSample, SamplerError> {
        let mut state = self.lock();
        if state.unsupported {
            return Err(SamplerError::NotSupported);
        }
        match state.one_shots.pop_front() {
            Some(result) => result,
            None => state.last_fix.ok_or(SamplerError::PositionUnavailable),
        }
    }
}
