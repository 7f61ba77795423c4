//! Continuous frame scheduler
//!
//! Pumps frames from a live [`FrameSource`] through a [`FramePipeline`] once
//! per display tick and hands results to a [`DisplayAdapter`].
//!
//! At most one inference is in flight. A tick that arrives while one is
//! pending drops the new camera frame instead of queueing it. Stopping bumps
//! an epoch; any result that completes under an older epoch is discarded,
//! so a stale frame never reaches the display after `stop()`.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::codec::StyleStrength;
use crate::controller::{InferenceController, InferenceError, InferenceRequest, OutputSize};
use crate::frame::RawFrame;
use crate::status::StatusReporter;
use crate::telemetry::{LatencyProfiler, SchedulerStats};

/// Live frame producer (camera, video decoder, test pattern).
///
/// Called with the scheduler's state lock held.
pub trait FrameSource: Send + Sync {
    /// Latest frame, or `None` when nothing new is available
    fn capture(&self) -> Option<RawFrame>;
}

/// Receives finished frames for display.
///
/// Called with the scheduler's state lock held; implementations must not
/// call back into the scheduler.
pub trait DisplayAdapter: Send + Sync {
    fn present(&self, frame: RawFrame);
}

/// Anything that turns an [`InferenceRequest`] into a displayable frame.
///
/// `submit` runs under the scheduler's state lock and must return without
/// waiting; the work belongs in the returned future.
pub trait FramePipeline: Send + Sync {
    fn submit(&self, request: InferenceRequest) -> BoxFuture<'static, Result<RawFrame, InferenceError>>;
}

impl FramePipeline for InferenceController {
    fn submit(&self, request: InferenceRequest) -> BoxFuture<'static, Result<RawFrame, InferenceError>> {
        let controller = self.clone();
        async move { controller.run(request).await }.boxed()
    }
}

/// Style and strength shared between the host UI and the scheduler.
///
/// Read once per submission.
#[derive(Debug)]
pub struct StreamControls {
    model_id: RwLock<String>,
    strength: RwLock<StyleStrength>,
    output_size: RwLock<OutputSize>,
}

impl StreamControls {
    pub fn new(model_id: impl Into<String>, strength: StyleStrength) -> Self {
        Self {
            model_id: RwLock::new(model_id.into()),
            strength: RwLock::new(strength),
            output_size: RwLock::new(OutputSize::default()),
        }
    }

    pub fn model_id(&self) -> String {
        self.model_id.read().clone()
    }

    pub fn set_model(&self, model_id: impl Into<String>) {
        *self.model_id.write() = model_id.into();
    }

    pub fn strength(&self) -> StyleStrength {
        *self.strength.read()
    }

    pub fn set_strength(&self, strength: StyleStrength) {
        *self.strength.write() = strength;
    }

    pub fn output_size(&self) -> OutputSize {
        *self.output_size.read()
    }

    pub fn set_output_size(&self, output_size: OutputSize) {
        *self.output_size.write() = output_size;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Scheduler is not running; tick ignored
    Idle,
    /// An inference is still pending; frame dropped
    Busy,
    /// Source had nothing to capture
    NoFrame,
    /// A frame was submitted
    Submitted,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Consecutive failed frames before the stream stops itself
    pub max_consecutive_failures: u32,
    /// Downscale captured frames to this size before submission
    pub capture_size: Option<(u32, u32)>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            capture_size: None,
        }
    }
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    submitted: AtomicU64,
    dropped: AtomicU64,
    no_frame: AtomicU64,
    displayed: AtomicU64,
    discarded: AtomicU64,
    failed: AtomicU64,
}

struct SchedulerInner {
    pipeline: Arc<dyn FramePipeline>,
    source: Arc<dyn FrameSource>,
    display: Arc<dyn DisplayAdapter>,
    controls: Arc<StreamControls>,
    status: StatusReporter,
    config: SchedulerConfig,

    state: Mutex<SchedulerState>,
    /// Bumped on every start/stop; results carry the epoch they were submitted in
    epoch: AtomicU64,
    in_flight: AtomicBool,
    consecutive_failures: AtomicU32,
    counters: Counters,
    latency: Mutex<LatencyProfiler>,
    last_error: Mutex<Option<InferenceError>>,
}

/// Drop-on-busy scheduler for continuous (camera) mode; cheap to clone
#[derive(Clone)]
pub struct FrameScheduler {
    inner: Arc<SchedulerInner>,
    runtime: Handle,
}

impl FrameScheduler {
    pub fn new(
        pipeline: Arc<dyn FramePipeline>,
        source: Arc<dyn FrameSource>,
        display: Arc<dyn DisplayAdapter>,
        controls: Arc<StreamControls>,
        status: StatusReporter,
        config: SchedulerConfig,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                pipeline,
                source,
                display,
                controls,
                status,
                config,
                state: Mutex::new(SchedulerState::Idle),
                epoch: AtomicU64::new(0),
                in_flight: AtomicBool::new(false),
                consecutive_failures: AtomicU32::new(0),
                counters: Counters::default(),
                latency: Mutex::new(LatencyProfiler::new()),
                last_error: Mutex::new(None),
            }),
            runtime,
        }
    }

    pub fn controls(&self) -> &Arc<StreamControls> {
        &self.inner.controls
    }

    pub fn status(&self) -> &StatusReporter {
        &self.inner.status
    }

    pub fn state(&self) -> SchedulerState {
        *self.inner.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    /// Whether an inference is pending
    pub fn in_flight(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Error that caused the last failed frame in the current run
    pub fn last_error(&self) -> Option<InferenceError> {
        self.inner.last_error.lock().clone()
    }

    pub fn stats(&self) -> SchedulerStats {
        let c = &self.inner.counters;
        SchedulerStats {
            ticks: c.ticks.load(Ordering::Relaxed),
            submitted: c.submitted.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            no_frame: c.no_frame.load(Ordering::Relaxed),
            displayed: c.displayed.load(Ordering::Relaxed),
            discarded: c.discarded.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            latency: self.inner.latency.lock().stats(),
        }
    }

    /// Idle -> Running. No-op when already running.
    pub fn start(&self) {
        let mut state = self.inner.state.lock();
        if *state == SchedulerState::Running {
            return;
        }
        *state = SchedulerState::Running;
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        self.inner.consecutive_failures.store(0, Ordering::Release);
        *self.inner.last_error.lock() = None;
        tracing::info!(model = %self.inner.controls.model_id(), "Frame scheduler started");
    }

    /// Running -> Idle. Takes effect immediately; an in-flight result is
    /// discarded when it arrives. No-op when already idle.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        if *state == SchedulerState::Idle {
            return;
        }
        *state = SchedulerState::Idle;
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        tracing::info!("Frame scheduler stopped");
    }

    /// Handle one display-refresh tick. Never blocks on inference.
    pub fn tick(&self) -> TickOutcome {
        let inner = &self.inner;
        // Held until the frame is submitted; stop() cannot interleave
        let state = inner.state.lock();
        if *state != SchedulerState::Running {
            return TickOutcome::Idle;
        }
        let epoch = inner.epoch.load(Ordering::Acquire);
        inner.counters.ticks.fetch_add(1, Ordering::Relaxed);

        if inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("Inference pending, dropping frame");
            return TickOutcome::Busy;
        }
        let slot = InFlightSlot(self.inner.clone());

        let Some(mut frame) = inner.source.capture() else {
            inner.counters.no_frame.fetch_add(1, Ordering::Relaxed);
            return TickOutcome::NoFrame;
        };
        if let Some((width, height)) = inner.config.capture_size {
            frame = frame.downscaled(width, height);
        }

        let controls = &inner.controls;
        let request = InferenceRequest::new(controls.model_id(), frame, controls.strength())
            .with_output_size(controls.output_size());
        let pending = inner.pipeline.submit(request);
        inner.counters.submitted.fetch_add(1, Ordering::Relaxed);

        self.runtime.spawn(async move {
            let started = Instant::now();
            let result = AssertUnwindSafe(pending).catch_unwind().await.unwrap_or_else(|_| {
                tracing::error!("Frame inference panicked");
                Err(InferenceError::ExecutionFailed("inference panicked".into()))
            });
            slot.0.complete(epoch, started.elapsed(), result);
        });
        drop(state);
        TickOutcome::Submitted
    }

    /// Drive ticks from a tokio interval until the scheduler goes idle.
    ///
    /// Starts the scheduler if needed. For hosts without a display clock of
    /// their own.
    pub fn spawn_ticker(&self, period: Duration) -> JoinHandle<()> {
        self.start();
        let scheduler = self.clone();
        self.runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if scheduler.tick() == TickOutcome::Idle {
                    break;
                }
            }
        })
    }
}

/// Claimed in-flight slot; released on drop, unwinding included
struct InFlightSlot(Arc<SchedulerInner>);

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::Release);
    }
}

impl SchedulerInner {
    fn complete(&self, epoch: u64, elapsed: Duration, result: Result<RawFrame, InferenceError>) {
        // Held across present() so stop() cannot slip in between check and display
        let mut state = self.state.lock();
        let current = *state == SchedulerState::Running && self.epoch.load(Ordering::Acquire) == epoch;

        match result {
            Ok(frame) => {
                self.latency.lock().record(elapsed);
                if current {
                    self.consecutive_failures.store(0, Ordering::Release);
                    self.counters.displayed.fetch_add(1, Ordering::Relaxed);
                    self.display.present(frame);
                } else {
                    self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Discarding frame finished after stop");
                }
            }
            Err(e) => {
                if current {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                    tracing::warn!(failures, "Frame inference failed: {}", e);
                    if failures >= self.config.max_consecutive_failures {
                        *state = SchedulerState::Idle;
                        self.epoch.fetch_add(1, Ordering::AcqRel);
                        tracing::error!(failures, "Stopping stream: {}", e);
                        self.status
                            .fail(format!("stream stopped after {} failed frames: {}", failures, e));
                    }
                    *self.last_error.lock() = Some(e);
                } else {
                    self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Discarding failure finished after stop: {}", e);
                }
            }
        }
    }
}
