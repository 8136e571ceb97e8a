//! Overlay records as the overlay API stores them.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};

pub const MIN_COORDINATE: f64 = -1000.0;
pub const MAX_COORDINATE: f64 = 10000.0;
pub const MIN_DIMENSION: f64 = 0.0;
pub const MAX_DIMENSION: f64 = 5000.0;
pub const MIN_Z_INDEX: i32 = -100;
pub const MAX_Z_INDEX: i32 = 100;
pub const MAX_CONTENT_LENGTH: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayKind {
    Text,
    Image,
}

/// A persisted overlay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overlay {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: OverlayKind,
    pub content: String,
    #[serde(rename = "imageUrl", default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default = "default_size")]
    pub width: f64,
    #[serde(default = "default_size")]
    pub height: f64,
    #[serde(rename = "zIndex", default = "default_z_index")]
    pub z_index: i32,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Text(String),
    Other(IgnoredAny),
}

/// The overlay API passes stored dates through as-is: RFC 3339, naive ISO
/// (UTC), epoch milliseconds, or `{}` when the field was never set.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let parsed = match Option::<RawTimestamp>::deserialize(deserializer)? {
        Some(RawTimestamp::Millis(ms)) => DateTime::from_timestamp_millis(ms),
        Some(RawTimestamp::Text(text)) => DateTime::parse_from_rfc3339(&text)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            }),
        Some(RawTimestamp::Other(_)) | None => None,
    };
    Ok(parsed)
}

fn default_size() -> f64 {
    100.0
}

fn default_z_index() -> i32 {
    1
}

fn default_visible() -> bool {
    true
}

impl Overlay {
    /// New overlay at the origin with default size
    pub fn new(id: impl Into<String>, kind: OverlayKind, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            content: content.into(),
            image_url: None,
            x: 0.0,
            y: 0.0,
            width: default_size(),
            height: default_size(),
            z_index: default_z_index(),
            visible: default_visible(),
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    /// Apply the fields present in `patch`
    pub fn apply(&mut self, patch: &OverlayPatch) {
        if let Some(kind) = patch.kind {
            self.kind = kind;
        }
        if let Some(content) = &patch.content {
            self.content = content.clone();
        }
        if let Some(image_url) = &patch.image_url {
            self.image_url = Some(image_url.clone());
        }
        if let Some(x) = patch.x {
            self.x = x;
        }
        if let Some(y) = patch.y {
            self.y = y;
        }
        if let Some(width) = patch.width {
            self.width = width;
        }
        if let Some(height) = patch.height {
            self.height = height;
        }
        if let Some(z_index) = patch.z_index {
            self.z_index = z_index;
        }
        if let Some(visible) = patch.visible {
            self.visible = visible;
        }
    }

    pub fn geometry(&self) -> OverlayDraft {
        OverlayDraft {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }
}

/// Partial update; absent fields are left alone
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverlayPatch {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<OverlayKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(rename = "imageUrl", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(rename = "zIndex", skip_serializing_if = "Option::is_none")]
    pub z_index: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visible: Option<bool>,
}

/// Every problem found in a patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchError(pub Vec<String>);

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validation error: {}", self.0.join("; "))
    }
}

impl std::error::Error for PatchError {}

impl OverlayPatch {
    pub fn is_empty(&self) -> bool {
        *self == OverlayPatch::default()
    }

    /// Check every present field against the overlay API's limits.
    pub fn validate(&self) -> Result<(), PatchError> {
        let mut errors = Vec::new();

        if let Some(content) = &self.content {
            if content.is_empty() {
                errors.push("Content is required".to_string());
            } else if content.chars().count() > MAX_CONTENT_LENGTH {
                errors.push(format!(
                    "Content must not exceed {} characters",
                    MAX_CONTENT_LENGTH
                ));
            }
        }
        check_range(&mut errors, "x", self.x, MIN_COORDINATE, MAX_COORDINATE);
        check_range(&mut errors, "y", self.y, MIN_COORDINATE, MAX_COORDINATE);
        check_range(&mut errors, "width", self.width, MIN_DIMENSION, MAX_DIMENSION);
        check_range(&mut errors, "height", self.height, MIN_DIMENSION, MAX_DIMENSION);
        if let Some(z) = self.z_index {
            if !(MIN_Z_INDEX..=MAX_Z_INDEX).contains(&z) {
                errors.push(format!(
                    "zIndex must be between {} and {}",
                    MIN_Z_INDEX, MAX_Z_INDEX
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PatchError(errors))
        }
    }
}

fn check_range(errors: &mut Vec<String>, field: &str, value: Option<f64>, min: f64, max: f64) {
    let Some(value) = value else {
        return;
    };
    if !value.is_finite() {
        errors.push(format!("{} must be a number", field));
    } else if value < min || value > max {
        errors.push(format!("{} must be between {} and {}", field, min, max));
    }
}

/// In-flight position and size during a drag or resize
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayDraft {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl OverlayDraft {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Pull every field into the range the overlay API accepts. Non-finite
    /// values collapse to the lower bound.
    pub fn clamped(self) -> Self {
        Self {
            x: clamp(self.x, MIN_COORDINATE, MAX_COORDINATE),
            y: clamp(self.y, MIN_COORDINATE, MAX_COORDINATE),
            width: clamp(self.width, MIN_DIMENSION, MAX_DIMENSION),
            height: clamp(self.height, MIN_DIMENSION, MAX_DIMENSION),
        }
    }

    pub fn into_patch(self) -> OverlayPatch {
        OverlayPatch {
            x: Some(self.x),
            y: Some(self.y),
            width: Some(self.width),
            height: Some(self.height),
            ..OverlayPatch::default()
        }
    }
}

fn clamp(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}
