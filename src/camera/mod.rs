//! Camera control.
//!
//! `CameraController` is the single owner of a hardware media stream:
//! - `start()` opens a stream only when no other stream is live in the
//!   process, on any device
//! - `stop()` releases every track and is idempotent
//! - `capture()` snapshots the current frame and always stops the stream
//! - dropping the controller stops the stream
//!
//! Backends:
//! - Synthetic `stub://` cameras (testing, demos)
//! - V4L2 devices (feature: camera-v4l2)

mod normalize;
pub mod raster;
pub mod synthetic;
#[cfg(feature = "camera-v4l2")]
pub mod v4l2;

use std::sync::{Mutex, OnceLock};

use zeroize::Zeroize;

use crate::artifact::{ImageBlob, SourceKind};
use crate::config::CameraSettings;
use crate::error::{CaptureError, Result};

pub use normalize::PixelFormat;
pub use synthetic::SyntheticCamera;
#[cfg(feature = "camera-v4l2")]
pub use v4l2::V4l2Camera;

/// File name given to camera snapshots.
pub const SNAPSHOT_FILE_NAME: &str = "camera-capture.png";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraState {
    Stopped,
    Starting,
    Running,
    /// A snapshot was taken; the stream is already stopped.
    Captured,
}

/// Requested stream geometry.
#[derive(Clone, Copy, Debug)]
pub struct StreamConstraints {
    pub width: u32,
    pub height: u32,
}

impl Default for StreamConstraints {
    fn default() -> Self {
        Self {
            width: raster::SURFACE_WIDTH,
            height: raster::SURFACE_HEIGHT,
        }
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One video frame as delivered by a stream. Pixels are zeroized on drop.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            width,
            height,
            format,
        }
    }

    /// Pixels converted to packed RGB24.
    pub fn to_rgb(&self) -> Result<Vec<u8>> {
        normalize::normalize_to_rgb(&self.data, self.width, self.height, self.format)
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

// ----------------------------------------------------------------------------
// Backend traits
// ----------------------------------------------------------------------------

/// Something that can grant access to a camera.
pub trait CameraBackend: Send {
    /// Stable device identifier (e.g. "/dev/video0", "stub://front").
    fn device(&self) -> &str;

    /// Request hardware access. Fails with `Permission` or `Device`.
    fn open(&mut self, constraints: &StreamConstraints) -> Result<Box<dyn VideoStream>>;
}

/// A live media stream with one or more tracks.
pub trait VideoStream: Send {
    fn read_frame(&mut self) -> Result<Frame>;

    fn active_tracks(&self) -> usize;

    /// Stop every track. Must be safe to call more than once.
    fn stop_tracks(&mut self);
}

/// Build the backend named by the settings.
pub fn open_backend(settings: &CameraSettings) -> Result<Box<dyn CameraBackend>> {
    if settings.device.starts_with("stub://") {
        return Ok(Box::new(SyntheticCamera::new(&settings.device)));
    }
    #[cfg(feature = "camera-v4l2")]
    {
        Ok(Box::new(V4l2Camera::new(&settings.device, settings.target_fps)))
    }
    #[cfg(not(feature = "camera-v4l2"))]
    {
        Err(CaptureError::device(format!(
            "camera {} requires the camera-v4l2 feature",
            settings.device
        )))
    }
}

// ----------------------------------------------------------------------------
// Stream lease
// ----------------------------------------------------------------------------

// Device that currently owns the process's single camera stream.
fn stream_slot() -> &'static Mutex<Option<String>> {
    static SLOT: OnceLock<Mutex<Option<String>>> = OnceLock::new();
    SLOT.get_or_init(|| Mutex::new(None))
}

/// Process-wide claim on the one camera stream. Released on drop.
struct StreamLease;

impl StreamLease {
    fn acquire(device: &str) -> Result<Self> {
        let mut slot = stream_slot()
            .lock()
            .map_err(|_| CaptureError::device("camera lease poisoned"))?;
        if let Some(owner) = slot.as_deref() {
            return Err(CaptureError::device(format!(
                "cannot open {}: {} is already streaming",
                device, owner
            )));
        }
        *slot = Some(device.to_string());
        Ok(Self)
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        if let Ok(mut slot) = stream_slot().lock() {
            *slot = None;
        }
    }
}

/// Device currently streaming in this process, if any.
pub fn streaming_device() -> Option<String> {
    stream_slot().lock().ok().and_then(|slot| slot.clone())
}

/// Whether `device` holds the process's camera stream.
pub fn is_device_streaming(device: &str) -> bool {
    streaming_device().as_deref() == Some(device)
}

// Tests that open streams share the process-wide slot.
#[cfg(test)]
pub(crate) fn stream_test_guard() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct LiveStream {
    stream: Box<dyn VideoStream>,
    _lease: StreamLease,
}

// ----------------------------------------------------------------------------
// Controller
// ----------------------------------------------------------------------------

pub struct CameraController {
    backend: Box<dyn CameraBackend>,
    constraints: StreamConstraints,
    live: Option<LiveStream>,
    state: CameraState,
}

impl CameraController {
    pub fn new(backend: Box<dyn CameraBackend>) -> Self {
        Self::with_constraints(backend, StreamConstraints::default())
    }

    pub fn with_constraints(backend: Box<dyn CameraBackend>, constraints: StreamConstraints) -> Self {
        Self {
            backend,
            constraints,
            live: None,
            state: CameraState::Stopped,
        }
    }

    pub fn state(&self) -> CameraState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == CameraState::Running
    }

    pub fn device(&self) -> &str {
        self.backend.device()
    }

    pub fn active_tracks(&self) -> usize {
        self.live
            .as_ref()
            .map(|live| live.stream.active_tracks())
            .unwrap_or(0)
    }

    /// Request hardware access and begin streaming.
    ///
    /// A second call while running is a no-op. On failure the controller is
    /// left `Stopped` with no lease held.
    pub fn start(&mut self) -> Result<()> {
        if self.state == CameraState::Running {
            return Ok(());
        }
        self.state = CameraState::Starting;
        let opened = StreamLease::acquire(self.backend.device()).and_then(|lease| {
            let stream = self.backend.open(&self.constraints)?;
            Ok(LiveStream {
                stream,
                _lease: lease,
            })
        });
        match opened {
            Ok(live) => {
                self.live = Some(live);
                self.state = CameraState::Running;
                log::info!("camera {} started", self.backend.device());
                Ok(())
            }
            Err(err) => {
                self.state = CameraState::Stopped;
                log::warn!("camera {} failed to start: {}", self.backend.device(), err);
                Err(err)
            }
        }
    }

    /// Release every track of the current stream. No-op when nothing is live.
    pub fn stop(&mut self) {
        self.release();
        self.state = CameraState::Stopped;
    }

    fn release(&mut self) {
        if let Some(mut live) = self.live.take() {
            live.stream.stop_tracks();
            log::info!("camera {} stopped", self.backend.device());
        }
    }

    /// Snapshot the current frame into the 640×480 surface as PNG.
    ///
    /// The stream is stopped whether or not the frame could be read.
    pub fn capture(&mut self) -> Result<ImageBlob> {
        if self.state != CameraState::Running {
            return Err(CaptureError::device("camera is not running"));
        }
        let live = self
            .live
            .as_mut()
            .ok_or_else(|| CaptureError::device("camera is not running"))?;
        let frame = live.stream.read_frame();
        self.release();
        self.state = CameraState::Captured;

        let png = raster::snapshot_png(&frame?)?;
        ImageBlob::validate(png, Some("image/png"), SNAPSHOT_FILE_NAME, SourceKind::Camera)
    }

    /// Discard a capture and return to `Stopped`.
    pub fn retake(&mut self) {
        self.stop();
    }
}

impl Drop for CameraController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(device: &str) -> (CameraController, synthetic::TrackProbe) {
        let camera = SyntheticCamera::new(device);
        let probe = camera.probe();
        (CameraController::new(Box::new(camera)), probe)
    }

    #[test]
    fn start_then_stop_leaves_no_tracks() -> Result<()> {
        let _guard = stream_test_guard();
        let (mut camera, probe) = controller("stub://unit-start-stop");
        camera.start()?;
        assert_eq!(camera.state(), CameraState::Running);
        assert_eq!(probe.live_tracks(), 1);

        camera.stop();
        assert_eq!(camera.state(), CameraState::Stopped);
        assert_eq!(probe.live_tracks(), 0);
        assert!(!is_device_streaming("stub://unit-start-stop"));
        Ok(())
    }

    #[test]
    fn stop_is_idempotent() -> Result<()> {
        let _guard = stream_test_guard();
        let (mut camera, probe) = controller("stub://unit-idempotent");
        camera.stop();
        camera.start()?;
        camera.stop();
        camera.stop();
        assert_eq!(camera.state(), CameraState::Stopped);
        assert_eq!(probe.live_tracks(), 0);
        assert_eq!(probe.opened_streams(), 1);
        Ok(())
    }

    #[test]
    fn start_twice_opens_one_stream() -> Result<()> {
        let _guard = stream_test_guard();
        let (mut camera, probe) = controller("stub://unit-twice");
        camera.start()?;
        camera.start()?;
        assert_eq!(probe.opened_streams(), 1);
        assert_eq!(probe.live_tracks(), 1);
        Ok(())
    }

    #[test]
    fn capture_stops_stream_and_yields_png() -> Result<()> {
        let _guard = stream_test_guard();
        let (mut camera, probe) = controller("stub://unit-capture");
        camera.start()?;
        let blob = camera.capture()?;
        assert_eq!(camera.state(), CameraState::Captured);
        assert_eq!(probe.live_tracks(), 0);
        assert_eq!(blob.mime_type(), "image/png");
        assert_eq!(blob.source(), SourceKind::Camera);

        camera.retake();
        assert_eq!(camera.state(), CameraState::Stopped);
        Ok(())
    }

    #[test]
    fn capture_stops_stream_even_when_frame_fails() -> Result<()> {
        let _guard = stream_test_guard();
        let camera = SyntheticCamera::new("stub://unit-broken").failing_frames();
        let probe = camera.probe();
        let mut camera = CameraController::new(Box::new(camera));
        camera.start()?;
        assert!(camera.capture().is_err());
        assert_eq!(probe.live_tracks(), 0);
        assert_ne!(camera.state(), CameraState::Running);
        Ok(())
    }

    #[test]
    fn capture_requires_running_stream() {
        let (mut camera, _probe) = controller("stub://unit-not-running");
        let err = camera.capture().unwrap_err();
        assert!(matches!(err, CaptureError::Device(_)));
    }

    #[test]
    fn permission_denied_leaves_camera_stopped() {
        let _guard = stream_test_guard();
        let camera = SyntheticCamera::new("stub://unit-denied").deny_permission();
        let mut camera = CameraController::new(Box::new(camera));
        let err = camera.start().unwrap_err();
        assert!(matches!(err, CaptureError::Permission(_)));
        assert_eq!(camera.state(), CameraState::Stopped);
        assert!(!is_device_streaming("stub://unit-denied"));
    }

    #[test]
    fn second_controller_cannot_claim_live_device() -> Result<()> {
        let _guard = stream_test_guard();
        let (mut first, _p1) = controller("stub://unit-shared");
        let (mut second, p2) = controller("stub://unit-shared");
        first.start()?;
        let err = second.start().unwrap_err();
        assert!(matches!(err, CaptureError::Device(_)));
        assert_eq!(second.state(), CameraState::Stopped);
        assert_eq!(p2.opened_streams(), 0);

        first.stop();
        second.start()?;
        Ok(())
    }

    #[test]
    fn one_stream_across_devices() -> Result<()> {
        let _guard = stream_test_guard();
        let (mut front, _front_probe) = controller("stub://unit-front");
        let (mut rear, rear_probe) = controller("stub://unit-rear");
        front.start()?;
        let err = rear.start().unwrap_err();
        assert!(matches!(err, CaptureError::Device(_)));
        assert_eq!(rear.state(), CameraState::Stopped);
        assert_eq!(rear_probe.opened_streams(), 0);
        assert_eq!(streaming_device().as_deref(), Some("stub://unit-front"));

        front.stop();
        assert_eq!(streaming_device(), None);
        rear.start()?;
        assert_eq!(rear_probe.live_tracks(), 1);
        Ok(())
    }

    #[test]
    fn drop_releases_stream() -> Result<()> {
        let _guard = stream_test_guard();
        let (mut camera, probe) = controller("stub://unit-drop");
        camera.start()?;
        drop(camera);
        assert_eq!(probe.live_tracks(), 0);
        assert!(!is_device_streaming("stub://unit-drop"));
        Ok(())
    }
}
