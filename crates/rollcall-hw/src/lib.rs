//! rollcall-hw: webcam capture.
//!
//! Opens a V4L2 device, negotiates a 640×480 format and streams frames
//! converted to packed RGB.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraStream, DeviceInfo, PixelFormat};
pub use frame::{Frame, FrameError};
