//! Model loading capability.

use crate::classifier::{Classifier, OnnxClassifier};
use crate::detector::{FaceDetector, ScrfdDetector};
use crate::types::ModelId;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// SCRFD 10G detection model file name.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("bad model metadata: {0}")]
    Metadata(String),
    #[error("incompatible model: {0}")]
    Incompatible(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Loads the pre-trained models a session needs.
pub trait ModelLoader {
    fn load_classifier(&self, id: ModelId) -> Result<Arc<dyn Classifier>, LoadError>;
    fn load_face_detector(&self) -> Result<Arc<dyn FaceDetector>, LoadError>;
}

/// Loads ONNX models from a model directory laid out as:
///
/// ```text
/// <model_dir>/model_1/{model.onnx,metadata.json}
/// <model_dir>/model_2/{model.onnx,metadata.json}
/// <model_dir>/det_10g.onnx
/// ```
#[derive(Debug, Clone)]
pub struct OnnxModelLoader {
    model_dir: PathBuf,
}

impl OnnxModelLoader {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
        }
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    pub fn classifier_dir(&self, id: ModelId) -> PathBuf {
        self.model_dir.join(id.dir_name())
    }

    pub fn detector_path(&self) -> PathBuf {
        self.model_dir.join(DETECTOR_MODEL_FILE)
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load_classifier(&self, id: ModelId) -> Result<Arc<dyn Classifier>, LoadError> {
        let classifier = OnnxClassifier::load(id, &self.classifier_dir(id))?;
        Ok(Arc::new(classifier))
    }

    fn load_face_detector(&self) -> Result<Arc<dyn FaceDetector>, LoadError> {
        let detector = ScrfdDetector::load(&self.detector_path())?;
        Ok(Arc::new(detector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let loader = OnnxModelLoader::new("/opt/stylemate/models");
        assert_eq!(
            loader.classifier_dir(ModelId::PersonalTone),
            PathBuf::from("/opt/stylemate/models/model_2")
        );
        assert_eq!(
            loader.detector_path(),
            PathBuf::from("/opt/stylemate/models/det_10g.onnx")
        );
    }

    #[test]
    fn test_missing_models_fail_with_not_found() {
        let loader = OnnxModelLoader::new("/nonexistent/stylemate");
        assert!(matches!(
            loader.load_classifier(ModelId::FaceShape),
            Err(LoadError::ModelNotFound(_))
        ));
        assert!(matches!(
            loader.load_face_detector(),
            Err(LoadError::ModelNotFound(_))
        ));
    }
}
