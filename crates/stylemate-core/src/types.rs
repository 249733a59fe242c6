use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Build a box from its top-left and bottom-right corners.
    pub fn from_corners(top_left: (f32, f32), bottom_right: (f32, f32), confidence: f32) -> Self {
        Self {
            x: top_left.0,
            y: top_left.1,
            width: bottom_right.0 - top_left.0,
            height: bottom_right.1 - top_left.1,
            confidence,
            landmarks: None,
        }
    }

    pub fn top_left(&self) -> (f32, f32) {
        (self.x, self.y)
    }

    pub fn bottom_right(&self) -> (f32, f32) {
        (self.x + self.width, self.y + self.height)
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// One entry of a classifier's output: class label and its probability in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassScore {
    pub label: String,
    pub probability: f32,
}

impl ClassScore {
    pub fn new(label: impl Into<String>, probability: f32) -> Self {
        Self {
            label: label.into(),
            probability,
        }
    }
}

/// The two interchangeable classification models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelId {
    /// Face shape classifier ("model 1").
    #[default]
    FaceShape,
    /// Personal color tone classifier ("model 2").
    #[serde(rename = "tone")]
    PersonalTone,
}

impl ModelId {
    pub const ALL: [ModelId; 2] = [ModelId::FaceShape, ModelId::PersonalTone];

    /// Human-readable analysis name.
    pub fn display_name(self) -> &'static str {
        match self {
            ModelId::FaceShape => "Face Type Analysis",
            ModelId::PersonalTone => "Personal Tone Analysis",
        }
    }

    /// Sub-directory of the model directory holding this model's files.
    pub fn dir_name(self) -> &'static str {
        match self {
            ModelId::FaceShape => "model_1",
            ModelId::PersonalTone => "model_2",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            ModelId::FaceShape => "face-shape",
            ModelId::PersonalTone => "tone",
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown model {0:?} (expected face-shape or tone)")]
pub struct UnknownModel(String);

impl FromStr for ModelId {
    type Err = UnknownModel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "face-shape" | "face" | "model1" | "1" => Ok(ModelId::FaceShape),
            "tone" | "personal-tone" | "model2" | "2" => Ok(ModelId::PersonalTone),
            _ => Err(UnknownModel(s.to_string())),
        }
    }
}
