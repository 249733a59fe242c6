//! stylemate-hw — Hardware abstraction for camera capture.
//!
//! Provides the camera device capability (acquire / release with
//! move-only stream ownership), a V4L2 backend, and RGB frame conversion.

pub mod camera;
pub mod frame;
pub mod v4l2;

pub use camera::{CameraError, CameraProvider, CaptureConstraints, DeviceStream, FrameGrabber};
pub use frame::Frame;
pub use v4l2::{DeviceInfo, V4l2CameraProvider};
