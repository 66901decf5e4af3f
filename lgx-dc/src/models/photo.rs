//! Delivery photos

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// What a photo documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoType {
    DeliveryProof,
    SitePhoto,
    IssueDocumentation,
}

impl PhotoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoType::DeliveryProof => "delivery_proof",
            PhotoType::SitePhoto => "site_photo",
            PhotoType::IssueDocumentation => "issue_documentation",
        }
    }
}

impl fmt::Display for PhotoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhotoType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delivery_proof" => Ok(PhotoType::DeliveryProof),
            "site_photo" => Ok(PhotoType::SitePhoto),
            "issue_documentation" => Ok(PhotoType::IssueDocumentation),
            other => Err(format!("Unknown photo type: {}", other)),
        }
    }
}

/// Photo as uploaded by the device (base64 payload)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoInput {
    pub data: String,
    pub photo_type: PhotoType,
    #[serde(default)]
    pub gps_latitude: Option<f64>,
    #[serde(default)]
    pub gps_longitude: Option<f64>,
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
}

/// Persisted photo, owned by a delivery confirmation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Photo {
    pub id: Uuid,
    pub delivery_id: Uuid,
    /// Path relative to the service's photo root
    pub path: String,
    pub thumbnail_path: String,
    #[serde(rename = "type")]
    pub photo_type: PhotoType,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub file_size: u64,
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
    pub captured_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_photo_type_wire_names() {
        for ty in [
            PhotoType::DeliveryProof,
            PhotoType::SitePhoto,
            PhotoType::IssueDocumentation,
        ] {
            let json = serde_json::to_value(ty).unwrap();
            assert_eq!(json, ty.as_str());
            assert_eq!(ty.as_str().parse::<PhotoType>().unwrap(), ty);
        }
        assert!("selfie".parse::<PhotoType>().is_err());
    }
}
