//! Recipient signature capture

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::validator;

/// One sampled point of a pen/finger stroke, in canvas pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrokePoint {
    pub x: f64,
    pub y: f64,
    /// Milliseconds since the stroke started, when the device records it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<i64>,
}

/// Ordered points of one continuous stroke
pub type Stroke = Vec<StrokePoint>;

/// Signature as submitted with a capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureInput {
    /// Encoded image: a `data:image/...;base64,` URL or bare base64
    pub signature_data: String,
    #[serde(default)]
    pub stroke_data: Vec<Stroke>,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub device_info: Option<String>,
}

/// Persisted signature, owned 1:1 by a delivery confirmation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub signature_data: String,
    pub signature_hash: String,
    pub quality_score: f64,
    pub stroke_data: Vec<Stroke>,
    pub width: u32,
    pub height: u32,
    pub device_info: Option<String>,
    pub signed_at: DateTime<Utc>,
}

impl Signature {
    /// Re-derive legal validity from stored data alone
    ///
    /// Requires quality at or above the legal threshold, at least one stroke,
    /// and a hash that still matches the stored image data. Capture-time
    /// flags are never consulted.
    pub fn is_legally_valid(&self) -> bool {
        self.quality_score >= validator::LEGAL_QUALITY_THRESHOLD
            && !self.stroke_data.is_empty()
            && self.stroke_data.iter().any(|stroke| !stroke.is_empty())
            && validator::signature_hash(&self.signature_data) == self.signature_hash
    }
}
