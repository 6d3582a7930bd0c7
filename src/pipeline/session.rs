use super::frame_pipeline::{FramePipeline, PassOutcome};
use super::mode::ModeSlot;
use super::stats::{DropReason, Stage, StatsSnapshot};
use crate::background::BackgroundMode;
use crate::capture::{
    AlwaysAuthorized, AuthorizationStatus, CameraAccess, CameraPosition, CaptureFactory,
    SessionPreset,
};
use crate::error::{CaptureError, SessionError};
use crate::frame::{CapturedFrame, RgbaFrame};
use crate::observable::{Observable, Publisher};
use crate::orientation::{NoopOrientation, OrientationSource, OrientationState};
use crate::segmentation::{MaskProvider, SegmentationQuality};
use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Processed frames between two statistics log lines.
const STATS_INTERVAL: u64 = 30;

/// Pause after a failed capture before asking the source again.
const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(10);

/// One-time session setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionConfig {
    pub camera_position: CameraPosition,
    pub segmentation_quality: SegmentationQuality,
    pub preset: SessionPreset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
}

struct Worker {
    generation: u64,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct Control {
    config: SessionConfig,
    worker: Option<Worker>,
    /// Stopped workers that may still be finishing their last pass.
    retired: Vec<JoinHandle<()>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Live compositing session: owns the worker thread that pulls frames from
/// the capture source, runs them through the [`FramePipeline`] and publishes
/// results to `output_frame`.
///
/// Every start of the worker begins a new camera generation. Frames are
/// tagged with the generation they were captured under and discarded at
/// publish time if the session has moved on (stopped or switched camera).
/// That check and the publish happen under the generation lock, which
/// `stop()` also takes: once `stop()` returns, nothing from the stopped
/// worker reaches `output_frame`.
pub struct Session {
    pipeline: Arc<FramePipeline>,
    capture: Arc<dyn CaptureFactory>,
    access: Arc<dyn CameraAccess>,
    orientation_source: Mutex<Box<dyn OrientationSource>>,
    control: Mutex<Control>,
    generation: Arc<Mutex<u64>>,
    output: Observable<RgbaFrame>,
    authorization: Observable<AuthorizationStatus>,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        provider: impl MaskProvider + 'static,
        capture: Arc<dyn CaptureFactory>,
    ) -> Result<Self, SessionError> {
        let orientation = OrientationState::default();
        orientation.set_mirrored(config.camera_position.is_mirrored());

        let mut provider = provider;
        provider.set_quality(config.segmentation_quality);
        let pipeline = FramePipeline::new(provider, ModeSlot::default(), orientation);

        let access: Arc<dyn CameraAccess> = Arc::new(AlwaysAuthorized);
        let authorization =
            Observable::new("authorization").map_err(SessionError::WorkerSpawn)?;
        authorization.publish(access.status());

        Ok(Self {
            pipeline: Arc::new(pipeline),
            capture,
            access,
            orientation_source: Mutex::new(Box::new(NoopOrientation)),
            control: Mutex::new(Control {
                config,
                worker: None,
                retired: Vec::new(),
            }),
            generation: Arc::new(Mutex::new(0)),
            output: Observable::new("output-frame").map_err(SessionError::WorkerSpawn)?,
            authorization,
        })
    }

    pub fn with_camera_access(mut self, access: Arc<dyn CameraAccess>) -> Self {
        self.authorization.publish(access.status());
        self.access = access;
        self
    }

    pub fn with_orientation_source(mut self, source: Box<dyn OrientationSource>) -> Self {
        self.orientation_source = Mutex::new(source);
        self
    }

    /// Publish the segmentation mask instead of the composite (debugging aid).
    pub fn with_matte_preview(mut self, enabled: bool) -> Self {
        match Arc::get_mut(&mut self.pipeline) {
            Some(pipeline) => pipeline.set_matte_preview(enabled),
            None => tracing::warn!("Matte preview can only be set before the session starts"),
        }
        self
    }

    /// Replace the setup. Only allowed while the session is idle.
    pub fn configure(&self, config: SessionConfig) -> Result<(), SessionError> {
        let mut control = lock(&self.control);
        if Self::is_running(&control) {
            return Err(SessionError::AlreadyRunning);
        }
        if config.segmentation_quality != control.config.segmentation_quality {
            self.pipeline.set_quality(config.segmentation_quality);
        }
        self.pipeline
            .orientation()
            .set_mirrored(config.camera_position.is_mirrored());
        tracing::info!(
            "Session configured: {:?} camera, {:?} quality, {:?} preset",
            config.camera_position,
            config.segmentation_quality,
            config.preset
        );
        control.config = config;
        Ok(())
    }

    pub fn config(&self) -> SessionConfig {
        lock(&self.control).config
    }

    /// Ask for camera access on a background thread; starts the session
    /// once access is granted. The handle yields the resulting status.
    pub fn request_permission_and_prepare(
        self: &Arc<Self>,
    ) -> std::io::Result<JoinHandle<AuthorizationStatus>> {
        let session = Arc::clone(self);
        std::thread::Builder::new()
            .name("camera-permission".into())
            .spawn(move || {
                let status = session.access.request_access();
                tracing::info!("Camera authorization: {:?}", status);
                session.authorization.publish(status);
                if status == AuthorizationStatus::Authorized {
                    if let Err(e) = session.start() {
                        tracing::warn!("Session did not start after authorization: {}", e);
                    }
                }
                status
            })
    }

    /// Start capturing. No-op when already running.
    ///
    /// Blocks until the camera has opened, without holding the session's
    /// control lock while it waits.
    pub fn start(&self) -> Result<(), SessionError> {
        let (generation, config, ready) = {
            let mut control = lock(&self.control);
            if Self::is_running(&control) {
                return Ok(());
            }
            if let Some(finished) = control.worker.take() {
                control.retired.push(finished.handle);
            }

            let status = self.access.status();
            if status != AuthorizationStatus::Authorized {
                tracing::warn!("Cannot start session: camera access {:?}", status);
                self.authorization.publish(status);
                return Err(SessionError::PermissionDenied(status));
            }

            let config = control.config;
            let (worker, ready) = self.spawn_worker(config)?;
            let generation = worker.generation;
            control.worker = Some(worker);
            (generation, config, ready)
        };

        // The source is opened on the worker thread; wait for the verdict.
        let opened = ready
            .recv()
            .unwrap_or_else(|_| Err(CaptureError::Open("capture worker exited".into())));

        let mut control = lock(&self.control);
        let current = control
            .worker
            .as_ref()
            .is_some_and(|worker| worker.generation == generation);

        match opened {
            Ok(()) => {
                // A stop() while the camera was opening already retired this worker.
                if current {
                    lock(&self.orientation_source).attach(self.pipeline.orientation().clone());
                    tracing::info!("Session started ({:?} camera)", config.camera_position);
                }
                Ok(())
            }
            Err(e) => {
                let failed = if current { control.worker.take() } else { None };
                drop(control);
                if let Some(worker) = failed {
                    let _ = worker.handle.join();
                }
                tracing::warn!(
                    "Camera unavailable for {:?} position: {}",
                    config.camera_position,
                    e
                );
                Err(SessionError::DeviceUnavailable {
                    position: config.camera_position,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Stop capturing. No-op when already stopped.
    ///
    /// Does not wait for the worker: a pass already in flight runs to
    /// completion and its result is discarded.
    pub fn stop(&self) {
        let mut control = lock(&self.control);
        if let Some(worker) = control.worker.take() {
            worker.cancel.store(true, Ordering::Release);
            *lock(&self.generation) += 1;
            lock(&self.orientation_source).detach();
            control.retired.push(worker.handle);
            tracing::info!("Session stopped");
        }
        control.retired.retain(|handle| !handle.is_finished());
    }

    /// Switch between front and back camera, restarting capture if it was
    /// running. Returns the new position.
    pub fn toggle_camera(&self) -> Result<CameraPosition, SessionError> {
        let was_running = self.state() == SessionState::Running;
        self.stop();

        let position = {
            let mut control = lock(&self.control);
            control.config.camera_position = control.config.camera_position.flipped();
            control.config.camera_position
        };
        self.pipeline
            .orientation()
            .set_mirrored(position.is_mirrored());
        tracing::info!("Switched to {:?} camera", position);

        if was_running {
            self.start()?;
        }
        Ok(position)
    }

    /// Change the background; takes effect from the next frame.
    pub fn set_background(&self, mode: BackgroundMode) {
        let kind = mode.kind();
        if self.pipeline.mode().set(mode) {
            tracing::info!("Background set to {}", kind);
        }
    }

    pub fn background(&self) -> BackgroundMode {
        self.pipeline.mode().get()
    }

    pub fn state(&self) -> SessionState {
        if Self::is_running(&lock(&self.control)) {
            SessionState::Running
        } else {
            SessionState::Idle
        }
    }

    /// Latest output frame, updated asynchronously.
    pub fn output_frame(&self) -> &Observable<RgbaFrame> {
        &self.output
    }

    pub fn authorization_status(&self) -> &Observable<AuthorizationStatus> {
        &self.authorization
    }

    /// Shared orientation, for feeding device-rotation notifications.
    pub fn orientation(&self) -> &OrientationState {
        self.pipeline.orientation()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.pipeline.stats().snapshot()
    }

    fn is_running(control: &Control) -> bool {
        control
            .worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Spawn a worker for a new generation. The receiver yields whether
    /// its capture source opened.
    fn spawn_worker(
        &self,
        config: SessionConfig,
    ) -> Result<(Worker, Receiver<Result<(), CaptureError>>), SessionError> {
        let generation = {
            let mut current = lock(&self.generation);
            *current += 1;
            *current
        };
        let cancel = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), CaptureError>>(1);

        let context = WorkerContext {
            pipeline: self.pipeline.clone(),
            capture: self.capture.clone(),
            publisher: self.output.publisher(),
            generation,
            current_generation: self.generation.clone(),
            cancel: cancel.clone(),
        };

        let handle = std::thread::Builder::new()
            .name(format!("pipeline-{generation}"))
            .spawn(move || context.run(config, ready_tx))
            .map_err(SessionError::WorkerSpawn)?;

        let worker = Worker {
            generation,
            cancel,
            handle,
        };
        Ok((worker, ready_rx))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
        let mut control = lock(&self.control);
        for handle in control.retired.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Everything the worker thread needs, moved into it at spawn.
struct WorkerContext {
    pipeline: Arc<FramePipeline>,
    capture: Arc<dyn CaptureFactory>,
    publisher: Publisher<RgbaFrame>,
    generation: u64,
    current_generation: Arc<Mutex<u64>>,
    cancel: Arc<AtomicBool>,
}

impl WorkerContext {
    fn run(self, config: SessionConfig, ready: crossbeam_channel::Sender<Result<(), CaptureError>>) {
        let mut source = match self.capture.open(config.camera_position, config.preset) {
            Ok(source) => {
                let _ = ready.send(Ok(()));
                source
            }
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        drop(ready);

        let (width, height) = source.resolution();
        tracing::info!(
            "Pipeline worker running (generation {}, {}x{})",
            self.generation,
            width,
            height
        );

        let mut reporter = StatsReporter::new(&self.pipeline.stats().snapshot());
        let mut sequence = 0u64;

        while !self.cancel.load(Ordering::Acquire) {
            let image = match source.capture_frame() {
                Ok(image) => image,
                Err(CaptureError::Exhausted) => {
                    tracing::info!("Capture source ended");
                    break;
                }
                Err(e) => {
                    tracing::warn!("Capture failed: {}", e);
                    self.pipeline.stats().record_capture_error();
                    std::thread::sleep(CAPTURE_RETRY_DELAY);
                    continue;
                }
            };
            sequence += 1;
            self.run_pass(CapturedFrame::new(image, self.generation, sequence));
            reporter.maybe_log(&self.pipeline.stats().snapshot());
        }

        tracing::debug!("Pipeline worker for generation {} exiting", self.generation);
    }

    fn run_pass(&self, frame: CapturedFrame) {
        let generation = frame.generation;
        let sequence = frame.sequence;

        self.pipeline.process_then(frame.image, |outcome| {
            let PassOutcome::Output(output) = outcome else {
                return;
            };

            let current = lock(&self.current_generation);
            if generation != *current {
                tracing::debug!(
                    "Discarding frame {} from stale camera generation {}",
                    sequence,
                    generation
                );
                self.pipeline.stats().record_drop(DropReason::Stale);
                return;
            }

            self.publisher.publish(output);
            self.pipeline.stats().record_published();
        });
    }
}

/// Periodic pipeline timing log, every [`STATS_INTERVAL`] frames processed
/// by one worker. Rates are measured from the worker's own start.
struct StatsReporter {
    started: Instant,
    base_processed: u64,
    base_published: u64,
    last_logged: u64,
}

impl StatsReporter {
    /// `baseline` is the session's counters when the worker started.
    fn new(baseline: &StatsSnapshot) -> Self {
        Self {
            started: Instant::now(),
            base_processed: baseline.processed,
            base_published: baseline.published,
            last_logged: baseline.processed,
        }
    }

    fn due(&self, stats: &StatsSnapshot) -> bool {
        stats.processed >= self.last_logged + STATS_INTERVAL
    }

    /// Frames this worker published per second of `elapsed`.
    fn fps(&self, stats: &StatsSnapshot, elapsed: Duration) -> f64 {
        let elapsed = elapsed.as_secs_f64();
        if elapsed > 0.0 {
            stats.published.saturating_sub(self.base_published) as f64 / elapsed
        } else {
            0.0
        }
    }

    fn maybe_log(&mut self, stats: &StatsSnapshot) {
        if !self.due(stats) {
            return;
        }
        self.last_logged = stats.processed;
        let fps = self.fps(stats, self.started.elapsed());

        tracing::info!(
            "Frame {}: segment={:.1}ms, background={:.1}ms, composite={:.1}ms, fps={:.1}, dropped={} (segmentation={}, filter={}, stale={})",
            stats.processed - self.base_processed,
            stats.average_ms(Stage::Segment),
            stats.average_ms(Stage::Background),
            stats.average_ms(Stage::Composite),
            fps,
            stats.dropped(),
            stats.dropped_segmentation,
            stats.dropped_filter,
            stats.dropped_stale
        );
    }
}
