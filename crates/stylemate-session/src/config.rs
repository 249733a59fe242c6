use serde::Serialize;
use std::path::PathBuf;
use stylemate_core::pipeline::{DEFAULT_FACE_CONFIDENCE, DEFAULT_MIN_FACE_SIZE};
use stylemate_core::PredictionPipeline;
use stylemate_hw::CaptureConstraints;

/// Session configuration, loaded from environment variables.
#[derive(Debug, Clone, Serialize)]
pub struct SessionConfig {
    /// Directory containing `model_1/`, `model_2/` and the detector model.
    pub model_dir: PathBuf,
    /// Directory containing overlay stickers and recommendation images.
    pub asset_dir: PathBuf,
    /// V4L2 device for live analysis (default: /dev/video0).
    pub camera_device: String,
    /// V4L2 device for AR try-on (default: same as `camera_device`).
    pub ar_camera_device: String,
    pub capture_width: u32,
    pub capture_height: u32,
    /// Mirror live frames before analysis, like a selfie preview.
    pub mirror: bool,
    /// Frames discarded after acquiring a camera (AE/AWB settling).
    pub warmup_frames: usize,
    /// Minimum detector confidence for a face to count.
    pub face_confidence: f32,
    /// Minimum face box width and height, in pixels.
    pub min_face_size: f32,
    /// Polling loop rate.
    pub refresh_hz: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let model_dir = stylemate_core::default_model_dir();
        let asset_dir = default_asset_dir(&model_dir);
        Self {
            model_dir,
            asset_dir,
            camera_device: "/dev/video0".to_string(),
            ar_camera_device: "/dev/video0".to_string(),
            capture_width: 400,
            capture_height: 300,
            mirror: true,
            warmup_frames: 2,
            face_confidence: DEFAULT_FACE_CONFIDENCE,
            min_face_size: DEFAULT_MIN_FACE_SIZE,
            refresh_hz: 60,
        }
    }
}

impl SessionConfig {
    /// Load configuration from `STYLEMATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let model_dir = std::env::var("STYLEMATE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.model_dir);

        let asset_dir = std::env::var("STYLEMATE_ASSET_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_asset_dir(&model_dir));

        let camera_device =
            std::env::var("STYLEMATE_CAMERA_DEVICE").unwrap_or(defaults.camera_device);
        let ar_camera_device =
            std::env::var("STYLEMATE_AR_CAMERA_DEVICE").unwrap_or_else(|_| camera_device.clone());

        Self {
            model_dir,
            asset_dir,
            camera_device,
            ar_camera_device,
            capture_width: env_parse("STYLEMATE_CAPTURE_WIDTH", defaults.capture_width),
            capture_height: env_parse("STYLEMATE_CAPTURE_HEIGHT", defaults.capture_height),
            mirror: std::env::var("STYLEMATE_MIRROR")
                .map(|v| v != "0")
                .unwrap_or(defaults.mirror),
            warmup_frames: env_parse("STYLEMATE_WARMUP_FRAMES", defaults.warmup_frames),
            face_confidence: env_parse("STYLEMATE_FACE_CONFIDENCE", defaults.face_confidence),
            min_face_size: env_parse("STYLEMATE_MIN_FACE_SIZE", defaults.min_face_size),
            refresh_hz: env_parse("STYLEMATE_REFRESH_HZ", defaults.refresh_hz).max(1),
        }
    }

    pub fn camera_constraints(&self) -> CaptureConstraints {
        CaptureConstraints::new(&self.camera_device, self.capture_width, self.capture_height)
    }

    pub fn ar_constraints(&self) -> CaptureConstraints {
        CaptureConstraints::new(&self.ar_camera_device, self.capture_width, self.capture_height)
    }

    pub fn pipeline(&self) -> PredictionPipeline {
        PredictionPipeline::new(self.face_confidence, self.min_face_size)
    }
}

fn default_asset_dir(model_dir: &std::path::Path) -> PathBuf {
    model_dir
        .parent()
        .map(|p| p.join("assets"))
        .unwrap_or_else(|| PathBuf::from("assets"))
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_webcam_setup() {
        let cfg = SessionConfig::default();
        assert_eq!((cfg.capture_width, cfg.capture_height), (400, 300));
        assert!(cfg.mirror);
        assert_eq!(cfg.face_confidence, 0.9);
        assert_eq!(cfg.min_face_size, 50.0);
        assert_eq!(cfg.camera_device, cfg.ar_camera_device);
    }

    #[test]
    fn test_asset_dir_is_sibling_of_models() {
        let dir = default_asset_dir(std::path::Path::new("/opt/stylemate/models"));
        assert_eq!(dir, PathBuf::from("/opt/stylemate/assets"));
    }

    #[test]
    fn test_constraints_and_pipeline() {
        let cfg = SessionConfig {
            ar_camera_device: "/dev/video4".into(),
            min_face_size: 80.0,
            ..SessionConfig::default()
        };
        assert_eq!(cfg.camera_constraints().device, "/dev/video0");
        assert_eq!(cfg.ar_constraints().device, "/dev/video4");
        assert_eq!(cfg.pipeline().min_face_size, 80.0);
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        assert_eq!(env_parse("STYLEMATE_TEST_UNSET_VARIABLE", 7u32), 7);
    }
}
