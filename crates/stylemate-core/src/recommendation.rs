//! Recommendation table.
//!
//! Maps classifier labels (face shapes, color tones) to guidance text,
//! reference assets and an AR try-on overlay. The table is embedded at
//! compile time from `contrib/recommendations.toml`.

use crate::types::ModelId;
use serde::Deserialize;
use std::sync::OnceLock;

const RECOMMENDATIONS_TOML: &str = include_str!("../../../contrib/recommendations.toml");

static TABLE: OnceLock<RecommendationTable> = OnceLock::new();

/// Guidance for one classifier label.
#[derive(Debug, Clone, Deserialize)]
pub struct Recommendation {
    pub label: String,
    pub model: ModelId,
    pub title: String,
    pub guidance: String,
    #[serde(default)]
    pub assets: Vec<String>,
    /// Id of an [`OverlaySpec`] to try on.
    #[serde(default)]
    pub overlay: Option<String>,
}

/// An AR sticker and where it sits on the preview.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OverlaySpec {
    pub id: String,
    pub path: String,
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecommendationTable {
    #[serde(default, rename = "recommendation")]
    pub recommendations: Vec<Recommendation>,
    #[serde(default, rename = "overlay")]
    pub overlays: Vec<OverlaySpec>,
}

impl RecommendationTable {
    pub fn from_toml(src: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(src)
    }

    /// Case-insensitive label lookup.
    pub fn lookup(&self, label: &str) -> Option<&Recommendation> {
        let label = label.trim();
        self.recommendations
            .iter()
            .find(|r| r.label.eq_ignore_ascii_case(label))
    }

    pub fn for_model(&self, model: ModelId) -> impl Iterator<Item = &Recommendation> {
        self.recommendations.iter().filter(move |r| r.model == model)
    }

    pub fn overlay(&self, id: &str) -> Option<&OverlaySpec> {
        self.overlays.iter().find(|o| o.id == id)
    }
}

/// The embedded table, parsed on first use.
pub fn table() -> &'static RecommendationTable {
    TABLE.get_or_init(|| match RecommendationTable::from_toml(RECOMMENDATIONS_TOML) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = %e, "bad embedded recommendations TOML");
            RecommendationTable::default()
        }
    })
}

/// Look up a label in the embedded table.
pub fn lookup(label: &str) -> Option<&'static Recommendation> {
    table().lookup(label)
}
