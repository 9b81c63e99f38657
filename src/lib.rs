//! zkpa-capture
//!
//! Capture-Hash-Prove pipeline: acquire an image, fingerprint it with an
//! external hashing service, submit it as a witness to a proof service and
//! export the verified image locally.
//!
//! # Architecture
//!
//! The pipeline holds a few invariants by construction:
//!
//! 1. **One camera stream**: at most one live stream per device, always
//!    released on capture, reset, error and drop.
//! 2. **One live generation**: every acquisition or reset bumps a token;
//!    async results and timers from older generations are discarded.
//! 3. **Single export**: at most one export per Success transition.
//! 4. **Validated input**: size and MIME checks run before any network call.
//!
//! # Module Structure
//!
//! - `acquire`: upload, drop, URL import normalization
//! - `camera`: camera controller, synthetic and V4L2 backends, rasterizer
//! - `hashing`, `witness`, `proof`: external collaborators
//! - `session`, `pipeline`: state machine and event loop
//! - `export`: PNG export of the verified image
//! - `api`: local development service for the hashing and witness endpoints

pub mod acquire;
pub mod api;
pub mod artifact;
pub mod camera;
pub mod config;
pub mod error;
pub mod export;
pub mod hashing;
pub mod notify;
pub mod pipeline;
pub mod proof;
pub mod session;
pub mod transport;
pub mod ui;
pub mod witness;

pub use acquire::{AcquireInput, ImageFetcher};
pub use artifact::{ImageArtifact, ImageBlob, PreviewHandle, PreviewStore, SourceKind, MAX_IMAGE_BYTES};
pub use camera::{CameraBackend, CameraController, CameraState, SyntheticCamera, VideoStream};
pub use config::CaptureConfig;
pub use error::{CaptureError, Result};
pub use export::{Exporter, PngFileExporter};
pub use hashing::{ContentHash, HashService, HttpHashService};
pub use notify::{LogNotifier, Notification, Notifier, Severity};
pub use pipeline::{Pipeline, PipelineConfig, Services};
pub use proof::{NargoBackend, ProofBackend, ProofHandle, WitnessOnlyBackend};
pub use session::{CaptureSession, Generation, PipelineState};
pub use transport::HttpClient;
pub use witness::{HttpWitnessService, WitnessPayload, WitnessService};
