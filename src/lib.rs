//! Skydra camera relay
//!
//! Pulls an MJPEG stream from a network camera, runs a throttled object
//! detector over it, overlays faded bounding boxes and a metrics panel, and
//! re-serves the annotated stream plus JSON stats over HTTP.
//!
//! # Module Structure
//!
//! - `config`: layered daemon configuration (defaults, JSON file, env)
//! - `ingest`: frame sources (HTTP MJPEG / snapshot, synthetic)
//! - `detect`: detector backends and their registry
//! - `pipeline`: scheduling, tracking, smoothing, and the worker thread
//! - `render`: overlay drawing
//! - `frame`: frames, stats, and the shared `FrameBuffer`
//! - `api`: the HTTP surface

pub mod api;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod render;

pub use api::{ApiConfig, ApiHandle, ApiServer, Location, LocationStore};
pub use config::SkydraConfig;
pub use detect::{
    BackendRegistry, BoxDetection, Detection, DetectionResult, DetectorBackend, DetectorParams,
    SharedBackend, StubBackend,
};
#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
pub use frame::{Frame, FrameBuffer, PublishedFrame, Stats, StreamStatus};
pub use ingest::{open_source, FrameSource, MjpegSource, SourceStats, SyntheticSource};
pub use pipeline::{
    CycleOutcome, DetectionTracker, FpsMeter, InferenceScheduler, Pipeline, PipelineHandle,
    SkipReason, StabilityEstimator,
};
pub use render::{Renderer, RendererConfig};
