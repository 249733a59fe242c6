//! Style classifier capability and its ONNX Runtime implementation.
//!
//! Models are image classifiers exported from Teachable Machine style
//! projects: a `model.onnx` next to a `metadata.json` listing the class
//! labels in output order.

use crate::loader::LoadError;
use crate::types::{ClassScore, ModelId};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::Deserialize;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

const DEFAULT_INPUT_SIZE: u32 = 224;
const PIXEL_SCALE: f32 = 127.5;
/// Outputs summing to 1 within this tolerance are already probabilities.
const DISTRIBUTION_TOLERANCE: f32 = 1e-3;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// An opaque, pre-trained classification model.
///
/// `predict` returns exactly `class_count()` scores in the model's own
/// class order.
pub trait Classifier: Send + Sync {
    fn id(&self) -> ModelId;
    fn class_count(&self) -> usize;
    fn predict(&self, image: &RgbImage) -> Result<Vec<ClassScore>, ClassifierError>;
}

/// Tensor layout expected by the exported model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// Keras exports: [1, H, W, 3].
    #[default]
    Nhwc,
    /// PyTorch exports: [1, 3, H, W].
    Nchw,
}

/// Contents of a model's `metadata.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelMetadata {
    pub labels: Vec<String>,
    #[serde(rename = "imageSize", default = "default_input_size")]
    pub image_size: u32,
    #[serde(rename = "modelName", default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub layout: TensorLayout,
}

fn default_input_size() -> u32 {
    DEFAULT_INPUT_SIZE
}

impl ModelMetadata {
    pub fn from_json(json: &str) -> Result<Self, LoadError> {
        let meta: ModelMetadata =
            serde_json::from_str(json).map_err(|e| LoadError::Metadata(e.to_string()))?;
        if meta.labels.is_empty() {
            return Err(LoadError::Metadata("metadata lists no class labels".into()));
        }
        if meta.image_size == 0 {
            return Err(LoadError::Metadata("imageSize must be positive".into()));
        }
        Ok(meta)
    }
}

/// Classifier backed by an ONNX Runtime session.
pub struct OnnxClassifier {
    id: ModelId,
    metadata: ModelMetadata,
    session: Mutex<Session>,
}

impl OnnxClassifier {
    /// Load `model.onnx` and `metadata.json` from `model_dir`.
    pub fn load(id: ModelId, model_dir: &Path) -> Result<Self, LoadError> {
        let model_path = model_dir.join("model.onnx");
        let metadata_path = model_dir.join("metadata.json");

        if !model_path.exists() {
            return Err(LoadError::ModelNotFound(model_path.display().to_string()));
        }
        let json = std::fs::read_to_string(&metadata_path)
            .map_err(|e| LoadError::Metadata(format!("{}: {e}", metadata_path.display())))?;
        let metadata = ModelMetadata::from_json(&json)?;

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(&model_path)?;

        tracing::info!(
            model = %id,
            path = %model_path.display(),
            classes = metadata.labels.len(),
            image_size = metadata.image_size,
            layout = ?metadata.layout,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded classifier"
        );

        Ok(Self {
            id,
            metadata,
            session: Mutex::new(session),
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.metadata.labels
    }
}

impl Classifier for OnnxClassifier {
    fn id(&self) -> ModelId {
        self.id
    }

    fn class_count(&self) -> usize {
        self.metadata.labels.len()
    }

    fn predict(&self, image: &RgbImage) -> Result<Vec<ClassScore>, ClassifierError> {
        let input = preprocess(image, self.metadata.image_size, self.metadata.layout);

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::InferenceFailed(format!("score extraction: {e}")))?;

        let expected = self.metadata.labels.len();
        if raw.len() != expected {
            return Err(ClassifierError::InferenceFailed(format!(
                "expected {expected} scores, got {}",
                raw.len()
            )));
        }

        let probabilities = to_probabilities(raw);
        Ok(self
            .metadata
            .labels
            .iter()
            .zip(probabilities)
            .map(|(label, p)| ClassScore::new(label.clone(), p))
            .collect())
    }
}

/// Center-crop to a square, resize, and normalize to [-1, 1].
fn preprocess(image: &RgbImage, size: u32, layout: TensorLayout) -> Array4<f32> {
    let side = image.width().min(image.height()).max(1);
    let x0 = (image.width().saturating_sub(side)) / 2;
    let y0 = (image.height().saturating_sub(side)) / 2;
    let cropped = imageops::crop_imm(image, x0, y0, side, side).to_image();
    let resized = imageops::resize(&cropped, size, size, FilterType::Triangle);

    let s = size as usize;
    let mut tensor = match layout {
        TensorLayout::Nhwc => Array4::<f32>::zeros((1, s, s, 3)),
        TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, s, s)),
    };

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let v = pixel[c] as f32 / PIXEL_SCALE - 1.0;
            match layout {
                TensorLayout::Nhwc => tensor[[0, y, x, c]] = v,
                TensorLayout::Nchw => tensor[[0, c, y, x]] = v,
            }
        }
    }

    tensor
}

/// Pass through outputs that already form a distribution; softmax anything else.
fn to_probabilities(raw: &[f32]) -> Vec<f32> {
    let in_range = raw.iter().all(|v| (0.0..=1.0).contains(v));
    let sum: f32 = raw.iter().sum();
    if in_range && (sum - 1.0).abs() <= DISTRIBUTION_TOLERANCE {
        return raw.to_vec();
    }

    let max = raw.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = raw.iter().map(|v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    if total > 0.0 {
        exps.iter().map(|e| e / total).collect()
    } else {
        vec![0.0; raw.len()]
    }
}
