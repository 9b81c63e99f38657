//! Synthetic camera for `stub://` devices.
//!
//! Produces a deterministic moving test pattern. Used by tests and demos in
//! place of real hardware; a `TrackProbe` exposes track accounting.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use super::{CameraBackend, Frame, PixelFormat, StreamConstraints, VideoStream};
use crate::error::{CaptureError, Result};

/// Observes the tracks a synthetic camera has handed out.
#[derive(Clone, Debug, Default)]
pub struct TrackProbe {
    live: Arc<AtomicUsize>,
    opened: Arc<AtomicU64>,
}

impl TrackProbe {
    pub fn live_tracks(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn opened_streams(&self) -> u64 {
        self.opened.load(Ordering::SeqCst)
    }
}

pub struct SyntheticCamera {
    device: String,
    format: PixelFormat,
    deny_permission: bool,
    fail_frames: bool,
    probe: TrackProbe,
}

impl SyntheticCamera {
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            format: PixelFormat::Rgb24,
            deny_permission: false,
            fail_frames: false,
            probe: TrackProbe::default(),
        }
    }

    /// Emit frames in `format` instead of RGB24.
    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    /// Simulate the user rejecting the permission prompt.
    pub fn deny_permission(mut self) -> Self {
        self.deny_permission = true;
        self
    }

    /// Streams open but every frame read fails.
    pub fn failing_frames(mut self) -> Self {
        self.fail_frames = true;
        self
    }

    pub fn probe(&self) -> TrackProbe {
        self.probe.clone()
    }
}

impl CameraBackend for SyntheticCamera {
    fn device(&self) -> &str {
        &self.device
    }

    fn open(&mut self, constraints: &StreamConstraints) -> Result<Box<dyn VideoStream>> {
        if self.deny_permission {
            return Err(CaptureError::Permission(format!(
                "access to {} was denied",
                self.device
            )));
        }
        self.probe.opened.fetch_add(1, Ordering::SeqCst);
        self.probe.live.fetch_add(1, Ordering::SeqCst);
        log::info!("SyntheticCamera: opened {} (synthetic)", self.device);
        Ok(Box::new(SyntheticStream {
            width: constraints.width,
            height: constraints.height,
            format: self.format,
            fail_frames: self.fail_frames,
            frame_count: 0,
            live: true,
            probe: self.probe.clone(),
        }))
    }
}

struct SyntheticStream {
    width: u32,
    height: u32,
    format: PixelFormat,
    fail_frames: bool,
    frame_count: u64,
    live: bool,
    probe: TrackProbe,
}

impl SyntheticStream {
    /// Diagonal gradient that shifts by one step per frame.
    fn generate_rgb(&self) -> Vec<u8> {
        let pixel_count = (self.width * self.height * 3) as usize;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 / 3 + self.frame_count) % 256) as u8;
        }
        pixels
    }

    fn generate_yuv(&self) -> Vec<u8> {
        let y_len = (self.width * self.height) as usize;
        let luma = (64 + self.frame_count % 128) as u8;
        match self.format {
            PixelFormat::Nv12 => {
                let mut out = vec![luma; y_len];
                out.resize(y_len + y_len / 2, 128);
                out
            }
            _ => {
                let mut out = Vec::with_capacity(y_len * 2);
                for _ in 0..y_len / 2 {
                    out.extend_from_slice(&[luma, 128, luma, 128]);
                }
                out
            }
        }
    }
}

impl VideoStream for SyntheticStream {
    fn read_frame(&mut self) -> Result<Frame> {
        if !self.live {
            return Err(CaptureError::device("stream is stopped"));
        }
        if self.fail_frames {
            return Err(CaptureError::device("synthetic frame read failure"));
        }
        self.frame_count += 1;
        let data = match self.format {
            PixelFormat::Rgb24 => self.generate_rgb(),
            PixelFormat::Nv12 | PixelFormat::Yuyv => self.generate_yuv(),
        };
        Ok(Frame::new(data, self.width, self.height, self.format))
    }

    fn active_tracks(&self) -> usize {
        usize::from(self.live)
    }

    fn stop_tracks(&mut self) {
        if std::mem::replace(&mut self.live, false) {
            self.probe.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for SyntheticStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_match_constraints() -> Result<()> {
        let mut camera = SyntheticCamera::new("stub://synthetic-frames");
        let mut stream = camera.open(&StreamConstraints {
            width: 32,
            height: 24,
        })?;
        let frame = stream.read_frame()?;
        assert_eq!((frame.width, frame.height), (32, 24));
        assert_eq!(frame.to_rgb()?.len(), 32 * 24 * 3);
        Ok(())
    }

    #[test]
    fn nv12_frames_normalize_to_rgb() -> Result<()> {
        let mut camera = SyntheticCamera::new("stub://synthetic-nv12").with_format(PixelFormat::Nv12);
        let mut stream = camera.open(&StreamConstraints {
            width: 16,
            height: 8,
        })?;
        let frame = stream.read_frame()?;
        assert_eq!(frame.byte_len(), 16 * 8 * 3 / 2);
        assert_eq!(frame.to_rgb()?.len(), 16 * 8 * 3);
        Ok(())
    }

    #[test]
    fn stopped_stream_refuses_frames() -> Result<()> {
        let mut camera = SyntheticCamera::new("stub://synthetic-stopped");
        let probe = camera.probe();
        let mut stream = camera.open(&StreamConstraints::default())?;
        stream.stop_tracks();
        stream.stop_tracks();
        assert_eq!(stream.active_tracks(), 0);
        assert_eq!(probe.live_tracks(), 0);
        assert!(stream.read_frame().is_err());
        Ok(())
    }
}
