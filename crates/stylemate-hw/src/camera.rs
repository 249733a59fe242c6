//! Camera device capability: acquisition and move-only stream ownership.
//!
//! A [`DeviceStream`] is the only handle to an open device. It is not
//! `Clone`; releasing consumes it, and dropping it releases the device.
//! Holding a stream is therefore proof of exclusive ownership.

use crate::frame::Frame;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceUnavailable(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Requested device and resolution. Drivers may negotiate a different size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub device: String,
    pub width: u32,
    pub height: u32,
}

impl CaptureConstraints {
    pub fn new(device: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            device: device.into(),
            width,
            height,
        }
    }
}

/// Backend half of a device stream. Dropping it must close the device.
pub trait FrameGrabber {
    /// Capture the next frame from the device.
    fn grab(&mut self) -> Result<Frame, CameraError>;

    /// Negotiated (width, height).
    fn resolution(&self) -> (u32, u32);
}

/// Something that can open camera devices.
pub trait CameraProvider {
    fn acquire(&mut self, constraints: &CaptureConstraints) -> Result<DeviceStream, CameraError>;
}

/// Exclusively owned, open camera stream.
pub struct DeviceStream {
    device: String,
    grabber: Box<dyn FrameGrabber>,
    frames_grabbed: u64,
}

impl DeviceStream {
    pub fn new(device: impl Into<String>, grabber: Box<dyn FrameGrabber>) -> Self {
        Self {
            device: device.into(),
            grabber,
            frames_grabbed: 0,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.grabber.resolution()
    }

    /// Capture the latest frame.
    pub fn frame(&mut self) -> Result<Frame, CameraError> {
        let frame = self.grabber.grab()?;
        self.frames_grabbed += 1;
        Ok(frame)
    }

    /// Capture and throw away `count` frames (AE/AWB settling).
    pub fn discard(&mut self, count: usize) {
        for _ in 0..count {
            if let Err(e) = self.grabber.grab() {
                tracing::debug!(device = %self.device, error = %e, "warm-up frame failed");
            }
        }
    }

    /// Release the device. Consumes the handle so it cannot be used again.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for DeviceStream {
    fn drop(&mut self) {
        tracing::info!(
            device = %self.device,
            frames = self.frames_grabbed,
            "camera stream released"
        );
    }
}

impl std::fmt::Debug for DeviceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceStream")
            .field("device", &self.device)
            .field("frames_grabbed", &self.frames_grabbed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingGrabber {
        grabs: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    impl FrameGrabber for CountingGrabber {
        fn grab(&mut self) -> Result<Frame, CameraError> {
            self.grabs.fetch_add(1, Ordering::SeqCst);
            Ok(Frame::from_image(RgbImage::new(4, 3)))
        }

        fn resolution(&self) -> (u32, u32) {
            (4, 3)
        }
    }

    impl Drop for CountingGrabber {
        fn drop(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn stream() -> (DeviceStream, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let grabs = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let grabber = CountingGrabber {
            grabs: grabs.clone(),
            closed: closed.clone(),
        };
        (DeviceStream::new("/dev/video9", Box::new(grabber)), grabs, closed)
    }

    #[test]
    fn test_release_closes_backend_once() {
        let (s, _, closed) = stream();
        s.release();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_discard_grabs_without_counting_frames() {
        let (mut s, grabs, _) = stream();
        s.discard(3);
        let frame = s.frame().unwrap();
        assert_eq!(grabs.load(Ordering::SeqCst), 4);
        assert_eq!(frame.width(), 4);
        assert_eq!(s.resolution(), (4, 3));
        assert_eq!(s.device(), "/dev/video9");
    }
}
