//! The acquisition → inference → tracking → render → publish loop.
//!
//! - `InferenceScheduler`: which frames reach the detector, and at what size
//! - `DetectionTracker`: batch-replaced detections that fade and expire
//! - `StabilityEstimator`: smoothed detection count reported alongside the visible one
//! - `FpsMeter`: processed frames per second
//! - `Pipeline` / `PipelineHandle`: the worker thread and its lifecycle

mod fps;
mod scheduler;
mod stability;
mod tracker;
mod worker;

pub use fps::{FpsMeter, FPS_WINDOW};
pub use scheduler::InferenceScheduler;
pub use stability::StabilityEstimator;
pub use tracker::{DetectionTracker, TrackedDetection, MIN_ALPHA};
pub use worker::{CycleOutcome, Pipeline, PipelineHandle, SkipReason};
