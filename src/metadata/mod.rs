//! Job metadata extracted from slicer comments, plus optional sidecar
//! overrides.

pub mod scanner;

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use scanner::{MetadataScanner, ScanOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerCountSource {
    /// A slicer header declared the count.
    Declared,
    /// Counted from layer markers in the body.
    Counted,
    Sidecar,
    #[default]
    Missing,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub layer_count: u32,
    pub layer_count_source: LayerCountSource,
    pub filament_total_mm: f64,
    pub estimated_time_s: u64,
    pub thumbnails: Vec<Thumbnail>,
}

impl JobMetadata {
    /// Replaces each field the sidecar provides. Negative or non-finite
    /// sidecar values are ignored.
    pub fn apply_sidecar(&mut self, sidecar: &MetadataSidecar) {
        if let Some(layers) = sidecar.layer_count {
            self.layer_count = layers;
            self.layer_count_source = LayerCountSource::Sidecar;
        }
        if let Some(filament) = sidecar.filament_total.filter(|v| v.is_finite() && *v >= 0.0) {
            self.filament_total_mm = filament;
        }
        if let Some(time) = sidecar.estimated_time.filter(|v| v.is_finite() && *v >= 0.0) {
            self.estimated_time_s = time.round() as u64;
        }
    }
}

/// Out-of-band metadata shipped next to a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataSidecar {
    #[serde(default)]
    pub layer_count: Option<u32>,
    /// Millimetres.
    #[serde(default)]
    pub filament_total: Option<f64>,
    /// Seconds.
    #[serde(default)]
    pub estimated_time: Option<f64>,
}

impl MetadataSidecar {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailFormat {
    Png,
    Jpg,
    Qoi,
}

impl ThumbnailFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ThumbnailFormat::Png => "png",
            ThumbnailFormat::Jpg => "jpg",
            ThumbnailFormat::Qoi => "qoi",
        }
    }
}

/// Embedded preview image; `data` stays base64 until asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    pub size: usize,
    pub format: ThumbnailFormat,
    pub data: String,
}

impl Thumbnail {
    pub fn relative_path(&self) -> String {
        format!("thumbs/{}x{}.{}", self.width, self.height, self.format.extension())
    }

    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(self.data.as_bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataField {
    LayerCount,
    FilamentTotal,
    EstimatedTime,
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetadataField::LayerCount => "layer count",
            MetadataField::FilamentTotal => "filament total",
            MetadataField::EstimatedTime => "estimated time",
        };
        f.write_str(name)
    }
}

/// Non-fatal scan result: the field fell back to zero.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MetadataWarning {
    #[error("No {0} found in slicer comments")]
    PatternNotFound(MetadataField),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_overrides_only_present_fields() {
        let mut metadata = JobMetadata {
            layer_count: 10,
            layer_count_source: LayerCountSource::Declared,
            filament_total_mm: 100.0,
            estimated_time_s: 60,
            thumbnails: Vec::new(),
        };
        let sidecar = MetadataSidecar::from_json(r#"{"filament_total": 250.5, "estimated_time": -3}"#).unwrap();
        metadata.apply_sidecar(&sidecar);
        assert_eq!(metadata.layer_count, 10);
        assert_eq!(metadata.layer_count_source, LayerCountSource::Declared);
        assert_eq!(metadata.filament_total_mm, 250.5);
        assert_eq!(metadata.estimated_time_s, 60);
    }

    #[test]
    fn test_thumbnail_path_and_decode() {
        let thumb = Thumbnail {
            width: 32,
            height: 24,
            size: 8,
            format: ThumbnailFormat::Qoi,
            data: "aGVsbG8=".to_string(),
        };
        assert_eq!(thumb.relative_path(), "thumbs/32x24.qoi");
        assert_eq!(thumb.decode().unwrap(), b"hello");
    }
}
