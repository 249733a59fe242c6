//! stylemate-core — Face gating and style classification engine.
//!
//! Defines the classifier and face-detector capabilities, their ONNX
//! Runtime implementations, the gated prediction pipeline, and the
//! static recommendation table.

pub mod classifier;
pub mod detector;
pub mod loader;
pub mod pipeline;
pub mod recommendation;
pub mod types;

pub use classifier::Classifier;
pub use detector::FaceDetector;
pub use loader::{LoadError, ModelLoader, OnnxModelLoader};
pub use pipeline::{Evaluation, PredictionError, PredictionPipeline};
pub use types::{BoundingBox, ClassScore, ModelId};

use std::path::PathBuf;

/// Default model directory: `$XDG_DATA_HOME/stylemate/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("stylemate")
        .join("models")
}
