//! Detector collaborator boundary.
//!
//! The detection model itself is opaque to the pipeline: a backend receives an
//! RGB pixel buffer plus fixed invocation parameters and returns boxes in the
//! coordinate space of the buffer it was given.

mod backend;
mod backends;
mod labels;
mod registry;
mod result;

pub use backend::{DetectorBackend, DetectorParams};
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use labels::{class_id_for_name, class_label, COCO_CLASSES};
pub use registry::{BackendRegistry, SharedBackend};
pub use result::{BoxDetection, Detection, DetectionResult};
