//! Frame sources: live camera feed or a static uploaded image.

use serde::Serialize;
use stylemate_hw::{CameraError, CameraProvider, CaptureConstraints, DeviceStream, Frame};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    #[default]
    Live,
    Static,
}

/// Main analysis camera.
///
/// `stop()` pauses the feed but keeps the device; only `release()` (or
/// dropping the camera) gives the device back.
#[derive(Debug)]
pub struct LiveCamera {
    stream: DeviceStream,
    streaming: bool,
    mirror: bool,
    latest: Option<Frame>,
}

impl LiveCamera {
    /// Acquire the device, negotiate resolution and discard warm-up frames.
    pub fn setup(
        provider: &mut dyn CameraProvider,
        constraints: &CaptureConstraints,
        warmup_frames: usize,
        mirror: bool,
    ) -> Result<Self, CameraError> {
        let mut stream = provider.acquire(constraints)?;
        let (width, height) = stream.resolution();
        tracing::info!(device = %stream.device(), width, height, mirror, "live camera acquired");

        if warmup_frames > 0 {
            tracing::debug!(count = warmup_frames, "discarding warmup frames");
            stream.discard(warmup_frames);
        }

        Ok(Self {
            stream,
            streaming: false,
            mirror,
            latest: None,
        })
    }

    pub fn start(&mut self) {
        self.streaming = true;
    }

    pub fn stop(&mut self) {
        self.streaming = false;
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Pull a fresh frame from the device and make it current.
    pub fn capture(&mut self) -> Result<&Frame, CameraError> {
        if !self.streaming {
            return Err(CameraError::CaptureFailed("camera feed is stopped".into()));
        }
        let frame = self.stream.frame()?;
        let frame = if self.mirror { frame.mirrored() } else { frame };
        Ok(self.latest.insert(frame))
    }

    /// Latest captured frame, if any.
    pub fn current_frame(&self) -> Option<&Frame> {
        self.latest.as_ref()
    }

    /// Forget the last captured frame (e.g. after a mode switch).
    pub fn clear_frame(&mut self) {
        self.latest = None;
    }

    pub fn device(&self) -> &str {
        self.stream.device()
    }

    /// Fully release the device.
    pub fn release(self) {
        self.stream.release();
    }
}

/// User-uploaded still image.
#[derive(Debug, Default)]
pub struct StaticImage {
    image: Option<Frame>,
    analyzed: bool,
}

impl StaticImage {
    /// Replace the image wholesale and reset the analyzed marker.
    pub fn set(&mut self, frame: Frame) {
        self.image = Some(frame);
        self.analyzed = false;
    }

    pub fn current_frame(&self) -> Option<&Frame> {
        self.image.as_ref()
    }

    pub fn is_analyzed(&self) -> bool {
        self.analyzed
    }

    pub fn mark_analyzed(&mut self) {
        self.analyzed = true;
    }
}

/// The attached frame source.
#[derive(Debug)]
pub enum FrameSource {
    Live(LiveCamera),
    Static(StaticImage),
}

impl FrameSource {
    pub fn mode(&self) -> CaptureMode {
        match self {
            FrameSource::Live(_) => CaptureMode::Live,
            FrameSource::Static(_) => CaptureMode::Static,
        }
    }

    pub fn current_frame(&self) -> Option<&Frame> {
        match self {
            FrameSource::Live(camera) => camera.current_frame(),
            FrameSource::Static(still) => still.current_frame(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeCameras;
    use image::RgbImage;

    fn constraints() -> CaptureConstraints {
        CaptureConstraints::new("/dev/video0", 400, 300)
    }

    #[test]
    fn test_setup_discards_warmup_frames() {
        let cameras = FakeCameras::new();
        let mut provider = cameras.provider();
        let camera = LiveCamera::setup(&mut provider, &constraints(), 3, false).unwrap();
        assert_eq!(cameras.grabs("/dev/video0"), 3);
        assert!(camera.current_frame().is_none());
        assert!(!camera.is_streaming());
    }

    #[test]
    fn test_capture_requires_started_feed() {
        let cameras = FakeCameras::new();
        let mut provider = cameras.provider();
        let mut camera = LiveCamera::setup(&mut provider, &constraints(), 0, false).unwrap();
        assert!(camera.capture().is_err());

        camera.start();
        let seq = camera.capture().unwrap().sequence;
        assert_eq!(camera.current_frame().unwrap().sequence, seq);

        camera.stop();
        assert!(camera.capture().is_err());
        // Stopping keeps the last frame and the device.
        assert!(camera.current_frame().is_some());
        assert_eq!(cameras.open_count(), 1);
    }

    #[test]
    fn test_mirror_applies_to_captured_frames() {
        let cameras = FakeCameras::new();
        let mut provider = cameras.provider();
        let mut camera = LiveCamera::setup(&mut provider, &constraints(), 0, true).unwrap();
        camera.start();
        let frame = camera.capture().unwrap();
        // Fake frames are bright in the left column; mirrored they are bright on the right.
        let right = frame.image.get_pixel(frame.width() - 1, 0)[0];
        let left = frame.image.get_pixel(0, 0)[0];
        assert!(right > left);
    }

    #[test]
    fn test_release_returns_device() {
        let cameras = FakeCameras::new();
        let mut provider = cameras.provider();
        let camera = LiveCamera::setup(&mut provider, &constraints(), 0, false).unwrap();
        assert_eq!(cameras.open_count(), 1);
        camera.release();
        assert_eq!(cameras.open_count(), 0);
        assert_eq!(cameras.releases(), 1);
    }

    #[test]
    fn test_static_image_replace_resets_marker() {
        let mut still = StaticImage::default();
        assert!(still.current_frame().is_none());

        still.set(Frame::from_image(RgbImage::new(10, 10)));
        still.mark_analyzed();
        assert!(still.is_analyzed());

        still.set(Frame::from_image(RgbImage::new(20, 10)));
        assert!(!still.is_analyzed());
        assert_eq!(still.current_frame().unwrap().width(), 20);

        let source = FrameSource::Static(still);
        assert_eq!(source.mode(), CaptureMode::Static);
        assert_eq!(source.current_frame().unwrap().width(), 20);
    }
}
