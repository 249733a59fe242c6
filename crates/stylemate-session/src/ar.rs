//! AR try-on: a second camera stream under a fixed-position sticker.
//!
//! The preview is shown mirrored. Screenshots composite the mirrored
//! frame with the sticker drawn unmirrored at its on-screen placement.

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage, RgbaImage};
use std::path::{Path, PathBuf};
use stylemate_core::recommendation::OverlaySpec;
use stylemate_hw::{CameraError, CameraProvider, CaptureConstraints, DeviceStream, Frame};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("failed to load overlay {path}: {source}")]
    Asset {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("unknown overlay asset: {0}")]
    UnknownOverlay(String),
    #[error("AR try-on is not active")]
    NotActive,
}

/// A sticker image and its placement in preview coordinates.
#[derive(Debug, Clone)]
pub struct Overlay {
    pub id: String,
    pub image: RgbaImage,
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl Overlay {
    /// Overlay displayed at its native size.
    pub fn new(id: impl Into<String>, image: RgbaImage, x: i64, y: i64) -> Self {
        let (width, height) = image.dimensions();
        Self {
            id: id.into(),
            image,
            x,
            y,
            width,
            height,
        }
    }

    /// Override the displayed size.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width.max(1);
        self.height = height.max(1);
        self
    }

    /// Load the sticker named by `spec` from `asset_dir`.
    pub fn load(spec: &OverlaySpec, asset_dir: &Path) -> Result<Self, ArError> {
        let path = asset_dir.join(&spec.path);
        let image = image::open(&path)
            .map_err(|source| ArError::Asset {
                path: path.clone(),
                source,
            })?
            .to_rgba8();
        tracing::debug!(id = %spec.id, path = %path.display(), "overlay loaded");
        Ok(Overlay::new(spec.id.clone(), image, spec.x, spec.y).with_size(spec.width, spec.height))
    }
}

/// An active try-on: owns its own device stream.
#[derive(Debug)]
pub struct ArSession {
    stream: DeviceStream,
    overlay: Overlay,
    latest: Option<Frame>,
}

impl ArSession {
    pub fn start(
        provider: &mut dyn CameraProvider,
        constraints: &CaptureConstraints,
        overlay: Overlay,
    ) -> Result<Self, CameraError> {
        let stream = provider.acquire(constraints)?;
        tracing::info!(device = %stream.device(), overlay = %overlay.id, "AR try-on started");
        Ok(Self {
            stream,
            overlay,
            latest: None,
        })
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn device(&self) -> &str {
        self.stream.device()
    }

    /// Grab a frame and return it mirrored, as displayed under the sticker.
    pub fn preview(&mut self) -> Result<RgbImage, ArError> {
        let frame = self.stream.frame()?;
        let mirrored = imageops::flip_horizontal(&frame.image);
        self.latest = Some(frame);
        Ok(mirrored)
    }

    /// Composite the current camera frame with the sticker.
    pub fn screenshot(&mut self) -> Result<RgbaImage, ArError> {
        let frame = self.stream.frame()?;
        let shot = compose(&frame.image, &self.overlay);
        self.latest = Some(frame);
        Ok(shot)
    }

    /// Release the AR device stream.
    pub fn stop(self) {
        tracing::info!(device = %self.stream.device(), "AR try-on stopped");
        self.stream.release();
    }
}

/// Draw `frame` mirrored, then `overlay` unmirrored at its placement.
pub fn compose(frame: &RgbImage, overlay: &Overlay) -> RgbaImage {
    let mirrored = imageops::flip_horizontal(frame);
    let mut canvas = DynamicImage::ImageRgb8(mirrored).to_rgba8();

    let sticker = if overlay.image.dimensions() == (overlay.width, overlay.height) {
        overlay.image.clone()
    } else {
        imageops::resize(&overlay.image, overlay.width, overlay.height, FilterType::Triangle)
    };
    imageops::overlay(&mut canvas, &sticker, overlay.x, overlay.y);
    canvas
}
