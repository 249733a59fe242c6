//! Gated prediction pipeline: face presence and size gate, then classification.
//!
//! The classifier is only invoked once the gate has passed, so a
//! `Classified` evaluation always corresponds to a validated face.

use crate::classifier::{Classifier, ClassifierError};
use crate::detector::{DetectorError, FaceDetector};
use crate::types::{BoundingBox, ClassScore, ModelId};
use image::RgbImage;
use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_FACE_CONFIDENCE: f32 = 0.9;
pub const DEFAULT_MIN_FACE_SIZE: f32 = 50.0;

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("face detection failed: {0}")]
    Detector(#[from] DetectorError),
    #[error("classification failed: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("{model} returned {actual} scores, expected {expected}")]
    ClassCountMismatch {
        model: ModelId,
        expected: usize,
        actual: usize,
    },
    #[error("{model} returned probability {probability} for {label:?}")]
    InvalidProbability {
        model: ModelId,
        label: String,
        probability: f32,
    },
}

/// Outcome of evaluating one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Evaluation {
    NoFaceDetected,
    FaceTooSmall { width: f32, height: f32 },
    /// Scores in the model's own class order, one per class.
    Classified { scores: Vec<ClassScore> },
}

impl Evaluation {
    pub fn scores(&self) -> Option<&[ClassScore]> {
        match self {
            Evaluation::Classified { scores } => Some(scores),
            _ => None,
        }
    }

    /// Highest-probability class, if classified.
    pub fn top(&self) -> Option<&ClassScore> {
        self.scores()?.iter().max_by(|a, b| {
            a.probability
                .partial_cmp(&b.probability)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }
}

/// Face gate thresholds plus the evaluate step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionPipeline {
    pub confidence_threshold: f32,
    pub min_face_size: f32,
}

impl Default for PredictionPipeline {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_FACE_CONFIDENCE,
            min_face_size: DEFAULT_MIN_FACE_SIZE,
        }
    }
}

impl PredictionPipeline {
    pub fn new(confidence_threshold: f32, min_face_size: f32) -> Self {
        Self {
            confidence_threshold,
            min_face_size,
        }
    }

    /// Run the face gate and, if it passes, the classifier.
    pub fn evaluate(
        &self,
        image: &RgbImage,
        detector: &dyn FaceDetector,
        model: &dyn Classifier,
    ) -> Result<Evaluation, PredictionError> {
        let faces = detector.estimate_faces(image, self.confidence_threshold)?;

        let Some(face) = largest_face(&faces, self.confidence_threshold) else {
            tracing::debug!(model = %model.id(), "no face above threshold");
            return Ok(Evaluation::NoFaceDetected);
        };

        if face.width < self.min_face_size || face.height < self.min_face_size {
            tracing::debug!(
                width = face.width,
                height = face.height,
                min = self.min_face_size,
                "face too small"
            );
            return Ok(Evaluation::FaceTooSmall {
                width: face.width,
                height: face.height,
            });
        }

        let scores = model.predict(image)?;
        validate_scores(model, &scores)?;

        tracing::debug!(
            model = %model.id(),
            face_confidence = face.confidence,
            classes = scores.len(),
            "classified frame"
        );
        Ok(Evaluation::Classified { scores })
    }
}

/// Largest box (by area) among those at or above `threshold`.
///
/// Detectors are asked to filter already; this re-check keeps the gate
/// honest for backends that ignore the threshold argument.
fn largest_face(faces: &[BoundingBox], threshold: f32) -> Option<&BoundingBox> {
    faces
        .iter()
        .filter(|f| f.confidence >= threshold)
        .max_by(|a, b| {
            a.area()
                .partial_cmp(&b.area())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

fn validate_scores(model: &dyn Classifier, scores: &[ClassScore]) -> Result<(), PredictionError> {
    let expected = model.class_count();
    if scores.len() != expected {
        return Err(PredictionError::ClassCountMismatch {
            model: model.id(),
            expected,
            actual: scores.len(),
        });
    }
    if let Some(bad) = scores
        .iter()
        .find(|s| !(0.0..=1.0).contains(&s.probability))
    {
        return Err(PredictionError::InvalidProbability {
            model: model.id(),
            label: bad.label.clone(),
            probability: bad.probability,
        });
    }
    Ok(())
}
