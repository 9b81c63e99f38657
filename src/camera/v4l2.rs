//! V4L2 camera backend.
//!
//! Opens a local device node (e.g. /dev/video0), negotiates RGB3 or YUYV at
//! the requested geometry and streams through mmap buffers. Stopping the
//! stream drops the buffers and closes the device node.

use std::io;

use ouroboros::self_referencing;

use super::{CameraBackend, Frame, PixelFormat, StreamConstraints, VideoStream};
use crate::error::{CaptureError, Result};

pub struct V4l2Camera {
    device: String,
    target_fps: u32,
}

impl V4l2Camera {
    pub fn new(device: &str, target_fps: u32) -> Self {
        Self {
            device: device.to_string(),
            target_fps,
        }
    }
}

#[self_referencing]
struct DeviceStreamState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

struct V4l2Stream {
    device: String,
    state: Option<DeviceStreamState>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

fn map_open_error(device: &str, err: io::Error) -> CaptureError {
    if err.kind() == io::ErrorKind::PermissionDenied {
        CaptureError::Permission(format!("open {}: {}", device, err))
    } else {
        CaptureError::device(format!("open {}: {}", device, err))
    }
}

impl CameraBackend for V4l2Camera {
    fn device(&self) -> &str {
        &self.device
    }

    fn open(&mut self, constraints: &StreamConstraints) -> Result<Box<dyn VideoStream>> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device =
            v4l::Device::with_path(&self.device).map_err(|e| map_open_error(&self.device, e))?;
        let mut format = device
            .format()
            .map_err(|e| CaptureError::device(format!("read v4l2 format: {}", e)))?;
        format.width = constraints.width;
        format.height = constraints.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: RGB3 rejected on {}: {}; trying YUYV",
                    self.device,
                    err
                );
                format.fourcc = v4l::FourCC::new(b"YUYV");
                device
                    .set_format(&format)
                    .map_err(|e| CaptureError::device(format!("set v4l2 format: {}", e)))?
            }
        };
        let pixel_format = match &format.fourcc.repr {
            b"RGB3" => PixelFormat::Rgb24,
            b"YUYV" => PixelFormat::Yuyv,
            b"NV12" => PixelFormat::Nv12,
            other => {
                return Err(CaptureError::device(format!(
                    "unsupported v4l2 pixel format {}",
                    String::from_utf8_lossy(other)
                )))
            }
        };

        if self.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Camera: failed to set fps on {}: {}", self.device, err);
            }
        }

        let state = DeviceStreamStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|e| CaptureError::device(format!("create v4l2 buffer stream: {}", e)))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Camera: streaming {} ({}x{})",
            self.device,
            format.width,
            format.height
        );
        Ok(Box::new(V4l2Stream {
            device: self.device.clone(),
            state: Some(state),
            width: format.width,
            height: format.height,
            format: pixel_format,
        }))
    }
}

impl VideoStream for V4l2Stream {
    fn read_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self
            .state
            .as_mut()
            .ok_or_else(|| CaptureError::device("stream is stopped"))?;
        let data = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|e| CaptureError::device(format!("capture v4l2 frame: {}", e)))?;
        Ok(Frame::new(data, self.width, self.height, self.format))
    }

    fn active_tracks(&self) -> usize {
        usize::from(self.state.is_some())
    }

    fn stop_tracks(&mut self) {
        if self.state.take().is_some() {
            log::debug!("V4l2Camera: released {}", self.device);
        }
    }
}
