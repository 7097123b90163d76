use anyhow::{anyhow, Context, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{DetectionTracker, FpsMeter, InferenceScheduler, StabilityEstimator};
use crate::config::{PipelineSettings, SkydraConfig};
use crate::detect::{Detection, DetectorParams, SharedBackend};
use crate::frame::{encode_jpeg, Frame, FrameBuffer, Stats, StreamStatus};
use crate::ingest::{FrameSource, SlowReadGuard};
use crate::render::Renderer;

/// Longest single sleep before the shutdown flag is checked again.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Why a cycle published nothing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    ConnectFailed(String),
    ReadFailed(String),
    EndOfStream,
    SlowRead,
    CyclePanicked,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Published,
    Skipped(SkipReason),
}

/// Acquire, throttled-infer, track, render, publish.
///
/// All state here is private to the worker thread; the only thing shared
/// with readers is the `FrameBuffer`.
pub struct Pipeline {
    source: Box<dyn FrameSource>,
    backend: SharedBackend,
    params: DetectorParams,
    scheduler: InferenceScheduler,
    tracker: DetectionTracker,
    stability: StabilityEstimator,
    fps: FpsMeter,
    renderer: Renderer,
    slow_reads: SlowReadGuard,
    frame_buffer: Arc<FrameBuffer>,
    settings: PipelineSettings,
    frame_index: u64,
    last_inference_at: Option<Instant>,
    last_latency_ms: f32,
}

impl Pipeline {
    pub fn new(
        config: &SkydraConfig,
        source: Box<dyn FrameSource>,
        backend: SharedBackend,
        renderer: Renderer,
        frame_buffer: Arc<FrameBuffer>,
    ) -> Self {
        let params = DetectorParams {
            input_size: config.detector.input_size,
            confidence_floor: config.detector.confidence,
            class_filter: config.class_filter(),
        };
        let scheduler = InferenceScheduler::new(
            config.inference.every_nth_frame,
            config.inference.min_interval,
            config.inference.max_width,
        );
        Self {
            source,
            backend,
            params,
            scheduler,
            tracker: DetectionTracker::new(config.max_detection_age),
            stability: StabilityEstimator::new(),
            fps: FpsMeter::default(),
            renderer,
            slow_reads: SlowReadGuard::default(),
            frame_buffer,
            settings: config.pipeline.clone(),
            frame_index: 0,
            last_inference_at: None,
            last_latency_ms: 0.0,
        }
    }

    pub fn frame_buffer(&self) -> Arc<FrameBuffer> {
        self.frame_buffer.clone()
    }

    /// One iteration of the worker loop. Never fails; problems become `Skipped`.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        if !self.source.is_connected() {
            if let Err(err) = self.source.connect() {
                log::warn!("camera connect failed: {:#}", err);
                return CycleOutcome::Skipped(SkipReason::ConnectFailed(format!("{:#}", err)));
            }
        }

        let read_started = Instant::now();
        let frame = match self.source.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::warn!("camera stream ended; reconnecting");
                self.source.disconnect();
                return CycleOutcome::Skipped(SkipReason::EndOfStream);
            }
            Err(err) => {
                log::warn!("camera read failed: {:#}; reconnecting", err);
                self.source.disconnect();
                return CycleOutcome::Skipped(SkipReason::ReadFailed(format!("{:#}", err)));
            }
        };
        let read_time = read_started.elapsed();
        if !self.slow_reads.admit(read_time) {
            log::debug!("slow camera read ({:?}); frame dropped", read_time);
            return CycleOutcome::Skipped(SkipReason::SlowRead);
        }

        let now = Instant::now();
        let frame_index = self.frame_index;
        self.frame_index += 1;

        let batch = if self
            .scheduler
            .should_infer(frame_index, now, self.last_inference_at)
        {
            self.infer(&frame, now)
        } else {
            None
        };
        if let Some(batch) = &batch {
            self.stability.observe(batch.len(), now);
        }
        self.tracker.update(batch, now);

        let visible = self.tracker.visible(now);
        let stats = Stats {
            visible_detections: visible.len(),
            stable_detections: self.stability.stable(),
            fps: self.fps.record_frame(now),
            last_inference_latency_ms: self.last_latency_ms,
            status: StreamStatus::Active,
        };

        let annotated = self.renderer.render(&frame, &visible, &stats);
        match encode_jpeg(&annotated) {
            Ok(jpeg) => self.frame_buffer.publish(jpeg, stats),
            Err(err) => {
                log::warn!("frame encode failed: {:#}; publishing placeholder", err);
                self.frame_buffer.publish_placeholder(stats);
            }
        }
        CycleOutcome::Published
    }

    /// Run the detector on one frame. `None` when it failed or panicked; the
    /// tracker then only ages.
    fn infer(&mut self, frame: &Frame, now: Instant) -> Option<Vec<Detection>> {
        let (input, scale_back) = self.scheduler.prepare(frame);
        let started = Instant::now();
        let outcome = {
            let mut backend = self
                .backend
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let params = &self.params;
            panic::catch_unwind(AssertUnwindSafe(|| {
                backend.detect(input.as_raw(), input.width(), input.height(), params)
            }))
        };
        let result = outcome.unwrap_or_else(|_| Err(anyhow!("detector panicked")));
        match result {
            Ok(result) => {
                self.last_latency_ms = started.elapsed().as_secs_f32() * 1000.0;
                self.last_inference_at = Some(now);
                Some(self.scheduler.rescale(&result.detections, scale_back))
            }
            Err(err) => {
                log::warn!("detector failed: {:#}", err);
                None
            }
        }
    }

    /// Delay before the next cycle. Dropped slow frames are followed by an
    /// immediate read so the upstream backlog drains.
    fn pause_after(&self, outcome: &CycleOutcome) -> Duration {
        match outcome {
            CycleOutcome::Skipped(SkipReason::ConnectFailed(_)) => self.settings.reconnect_backoff,
            CycleOutcome::Skipped(SkipReason::SlowRead) => Duration::ZERO,
            _ => self.settings.loop_interval,
        }
    }

    /// Loop until `shutdown` is set, then release the camera.
    pub fn run(mut self, shutdown: Arc<AtomicBool>) {
        log::info!("pipeline worker started");
        while !shutdown.load(Ordering::SeqCst) {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| self.run_cycle())) {
                Ok(outcome) => outcome,
                Err(_) => {
                    log::error!("pipeline cycle panicked; continuing");
                    CycleOutcome::Skipped(SkipReason::CyclePanicked)
                }
            };
            sleep_unless_shutdown(self.pause_after(&outcome), &shutdown);
        }
        self.source.disconnect();
        let stats = self.source.stats();
        log::info!(
            "pipeline worker stopped: frames={} connects={} url={}",
            stats.frames_captured,
            stats.connects,
            stats.url
        );
    }

    pub fn spawn(self) -> Result<PipelineHandle> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let stop_timeout = self.settings.stop_timeout;
        let frame_buffer = self.frame_buffer.clone();
        let join = std::thread::Builder::new()
            .name("skydra-pipeline".to_string())
            .spawn(move || self.run(shutdown_thread))
            .context("spawn pipeline worker")?;
        Ok(PipelineHandle {
            frame_buffer,
            stop_timeout,
            shutdown,
            join: Some(join),
        })
    }
}

fn sleep_unless_shutdown(duration: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + duration;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return;
        }
        std::thread::sleep(remaining.min(SLEEP_SLICE));
    }
}

/// Owner of a running pipeline worker.
#[derive(Debug)]
pub struct PipelineHandle {
    pub frame_buffer: Arc<FrameBuffer>,
    stop_timeout: Duration,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl PipelineHandle {
    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    /// Signal the worker and wait up to the configured timeout for it to exit.
    ///
    /// A worker still busy after the timeout (e.g. blocked in a camera read)
    /// is detached; it releases the camera itself once the read returns.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        let deadline = Instant::now() + self.stop_timeout;
        while !join.is_finished() {
            if Instant::now() >= deadline {
                log::warn!(
                    "pipeline worker did not stop within {:?}; detaching",
                    self.stop_timeout
                );
                return Ok(());
            }
            std::thread::sleep(SLEEP_SLICE);
        }
        join.join()
            .map_err(|_| anyhow!("pipeline worker thread panicked"))
    }
}
