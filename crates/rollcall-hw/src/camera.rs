//! V4L2 webcam capture via the `v4l` crate, delivering RGB frames.

use crate::frame::{self, Frame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;
/// `/dev/video0` up to (not including) this index are scanned by [`Camera::list_devices`].
const MAX_VIDEO_INDEX: u32 = 16;
const EBUSY: i32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("no such camera: {0}")]
    NotFound(String),
    #[error("camera {0} is in use by another process")]
    Busy(String),
    #[error("cannot open camera {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not a video capture device")]
    NotCapture(String),
    #[error("format negotiation failed: {0}")]
    Format(String),
    #[error("capture failed: {0}")]
    Capture(String),
}

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Pixel layouts the camera may deliver; all are converted to RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed YUV 4:2:2, what almost every webcam offers.
    Yuyv,
    Grey,
    /// 16-bit little-endian greyscale.
    Y16,
}

impl PixelFormat {
    pub fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            b"Y16 " | b"Y16\0" => Some(Self::Y16),
            _ => None,
        }
    }

    fn to_rgb(self, buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, frame::FrameError> {
        match self {
            Self::Yuyv => frame::yuyv_to_rgb(buf, width, height),
            Self::Grey => frame::grey_to_rgb(buf, width, height),
            Self::Y16 => frame::y16_to_rgb(buf, width, height),
        }
    }
}

/// An open V4L2 capture device with a negotiated 640×480 (or driver-chosen) format.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pixel_format: PixelFormat,
}

impl Camera {
    pub fn open(path: &str) -> Result<Self, CameraError> {
        if !Path::new(path).exists() {
            return Err(CameraError::NotFound(path.to_string()));
        }
        let device = Device::with_path(path).map_err(|source| {
            if source.raw_os_error() == Some(EBUSY) {
                CameraError::Busy(path.to_string())
            } else {
                CameraError::Open {
                    path: path.to_string(),
                    source,
                }
            }
        })?;

        let caps = device.query_caps().map_err(|source| CameraError::Open {
            path: path.to_string(),
            source,
        })?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::NotCapture(path.to_string()));
        }

        let mut wanted = device
            .format()
            .map_err(|e| CameraError::Format(format!("query: {e}")))?;
        wanted.fourcc = FourCC::new(b"YUYV");
        wanted.width = CAPTURE_WIDTH;
        wanted.height = CAPTURE_HEIGHT;
        // The driver may substitute another size or layout; take what it grants.
        let got = device
            .set_format(&wanted)
            .map_err(|e| CameraError::Format(format!("set: {e}")))?;
        let pixel_format = PixelFormat::from_fourcc(got.fourcc).ok_or_else(|| {
            CameraError::Format(format!("unsupported pixel format {:?} (need YUYV, GREY or Y16)", got.fourcc))
        })?;

        tracing::info!(
            path,
            card = %caps.card,
            driver = %caps.driver,
            width = got.width,
            height = got.height,
            format = ?pixel_format,
            "camera opened"
        );

        Ok(Self {
            device,
            width: got.width,
            height: got.height,
            pixel_format,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Start memory-mapped streaming. The stream borrows the camera.
    pub fn stream(&self) -> Result<CameraStream<'_>, CameraError> {
        let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| CameraError::Capture(format!("mmap stream: {e}")))?;
        Ok(CameraStream {
            camera: self,
            stream,
        })
    }

    /// Capture-capable devices among `/dev/video0` to `/dev/video15`.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..MAX_VIDEO_INDEX)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                caps.capabilities
                    .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        path,
                        name: caps.card,
                        driver: caps.driver,
                        bus: caps.bus,
                    })
            })
            .collect()
    }
}

/// An active capture stream borrowed from a [`Camera`].
pub struct CameraStream<'a> {
    camera: &'a Camera,
    stream: MmapStream<'a>,
}

impl CameraStream<'_> {
    /// Block until the next frame is available and return it as RGB.
    pub fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::Capture(format!("dequeue: {e}")))?;
        let (width, height) = (self.camera.width, self.camera.height);
        let data = self
            .camera
            .pixel_format
            .to_rgb(buf, width, height)
            .map_err(|e| CameraError::Capture(format!("frame {}: {e}", meta.sequence)))?;

        tracing::trace!(seq = meta.sequence, "frame captured");
        Ok(Frame {
            data,
            width,
            height,
            sequence: meta.sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"Y16 ")), Some(PixelFormat::Y16));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), None);
    }

    #[test]
    fn test_pixel_format_conversion_dispatch() {
        // One YUYV macropixel at mid-grey, two GREY pixels, two Y16 pixels.
        let yuyv = PixelFormat::Yuyv.to_rgb(&[126, 128, 126, 128], 2, 1).unwrap();
        assert_eq!(yuyv.len(), 6);
        assert_eq!(PixelFormat::Grey.to_rgb(&[7, 9], 2, 1).unwrap(), vec![7, 7, 7, 9, 9, 9]);
        assert_eq!(PixelFormat::Y16.to_rgb(&[0, 7, 0, 9], 2, 1).unwrap(), vec![7, 7, 7, 9, 9, 9]);
        assert!(PixelFormat::Grey.to_rgb(&[7], 2, 1).is_err());
    }

    #[test]
    fn test_open_missing_device() {
        assert!(matches!(
            Camera::open("/dev/rollcall-no-such-video"),
            Err(CameraError::NotFound(_))
        ));
    }
}
