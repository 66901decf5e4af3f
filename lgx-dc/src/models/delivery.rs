//! Delivery confirmation record and capture input

use chrono::{DateTime, Utc};
use lgx_common::events::{DeliveryStatus, SyncState};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{Photo, PhotoInput, Signature, SignatureInput};

/// A GPS position as captured on the device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
}

/// What the driver's device submits when confirming a delivery
///
/// `recipient_name` is optional at the wire level so that its absence is
/// reported as a field-level validation error rather than a parse failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureInput {
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub delivery_notes: Option<String>,
    #[serde(default)]
    pub gps_latitude: Option<f64>,
    #[serde(default)]
    pub gps_longitude: Option<f64>,
    #[serde(default)]
    pub gps_accuracy: Option<f64>,
    /// Business outcome; defaults to `delivered`
    #[serde(default)]
    pub status: Option<DeliveryStatus>,
    /// Capture time on the device; defaults to receipt time
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub signature: Option<SignatureInput>,
    #[serde(default)]
    pub photos: Vec<PhotoInput>,
}

impl CaptureInput {
    /// Trimmed recipient name, `None` when missing or blank
    pub fn recipient(&self) -> Option<&str> {
        self.recipient_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// Trimmed notes, `None` when missing or blank
    pub fn notes(&self) -> Option<&str> {
        self.delivery_notes
            .as_deref()
            .map(str::trim)
            .filter(|notes| !notes.is_empty())
    }
}

/// One shipment-delivery event and its ERP synchronization state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryConfirmation {
    pub id: Uuid,
    pub shipment_id: i64,
    pub delivered_by: String,
    pub delivered_at: DateTime<Utc>,
    pub recipient_name: String,
    pub delivery_notes: Option<String>,
    pub gps_latitude: Option<f64>,
    pub gps_longitude: Option<f64>,
    pub gps_accuracy: Option<f64>,
    pub verification_hash: String,
    pub status: DeliveryStatus,
    pub sync_state: SyncState,
    pub sync_attempts: u32,
    pub sync_error: Option<String>,
    pub erp_sync_timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub signature: Option<Signature>,
    pub photos: Vec<Photo>,
}

impl DeliveryConfirmation {
    /// GPS fix, present only when both coordinates were captured
    pub fn gps(&self) -> Option<GpsFix> {
        match (self.gps_latitude, self.gps_longitude) {
            (Some(latitude), Some(longitude)) => Some(GpsFix {
                latitude,
                longitude,
                accuracy: self.gps_accuracy,
            }),
            _ => None,
        }
    }

    /// SHA-256 hex over the canonical JSON of the capture fields
    ///
    /// Covers who/when/where/recipient/notes and the signature hash; sync
    /// bookkeeping and business status are excluded. `deliveredAt` is taken
    /// at microsecond precision, the precision it is stored at.
    pub fn compute_verification_hash(&self) -> String {
        let fields = HashedFields {
            shipment_id: self.shipment_id,
            delivered_by: &self.delivered_by,
            delivered_at: lgx_common::time::to_storage(&self.delivered_at),
            recipient_name: &self.recipient_name,
            delivery_notes: self.delivery_notes.as_deref(),
            gps_latitude: self.gps_latitude,
            gps_longitude: self.gps_longitude,
            gps_accuracy: self.gps_accuracy,
            signature_hash: self.signature.as_ref().map(|s| s.signature_hash.as_str()),
        };
        // Plain strings, integers and floats: serialization cannot fail
        let canonical = serde_json::to_vec(&fields).unwrap_or_default();
        format!("{:x}", Sha256::digest(&canonical))
    }

    /// True when the stored hash still matches the capture fields
    pub fn verify_integrity(&self) -> bool {
        self.verification_hash == self.compute_verification_hash()
    }
}

/// Field order is fixed by declaration, which makes the JSON canonical
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HashedFields<'a> {
    shipment_id: i64,
    delivered_by: &'a str,
    delivered_at: String,
    recipient_name: &'a str,
    delivery_notes: Option<&'a str>,
    gps_latitude: Option<f64>,
    gps_longitude: Option<f64>,
    gps_accuracy: Option<f64>,
    signature_hash: Option<&'a str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DeliveryConfirmation {
        let now = lgx_common::time::now();
        let mut delivery = DeliveryConfirmation {
            id: Uuid::new_v4(),
            shipment_id: 42,
            delivered_by: "driver-7".to_string(),
            delivered_at: now,
            recipient_name: "Jane Doe".to_string(),
            delivery_notes: Some("Left with reception".to_string()),
            gps_latitude: Some(40.7128),
            gps_longitude: Some(-74.0060),
            gps_accuracy: Some(5.0),
            verification_hash: String::new(),
            status: DeliveryStatus::Delivered,
            sync_state: SyncState::Pending,
            sync_attempts: 0,
            sync_error: None,
            erp_sync_timestamp: None,
            created_at: now,
            updated_at: now,
            signature: None,
            photos: Vec::new(),
        };
        delivery.verification_hash = delivery.compute_verification_hash();
        delivery
    }

    #[test]
    fn test_hash_is_reproducible() {
        let delivery = sample();
        assert_eq!(delivery.verification_hash.len(), 64);
        assert!(delivery.verify_integrity());
        assert_eq!(delivery.compute_verification_hash(), delivery.verification_hash);
    }

    #[test]
    fn test_capture_mutation_breaks_integrity() {
        let mut delivery = sample();
        delivery.recipient_name = "John Doe".to_string();
        assert!(!delivery.verify_integrity());

        let mut delivery = sample();
        delivery.gps_latitude = Some(40.7129);
        assert!(!delivery.verify_integrity());
    }

    #[test]
    fn test_sync_bookkeeping_does_not_affect_hash() {
        let mut delivery = sample();
        delivery.sync_state = SyncState::Synced;
        delivery.sync_attempts = 2;
        delivery.erp_sync_timestamp = Some(lgx_common::time::now());
        assert!(delivery.verify_integrity());
    }

    #[test]
    fn test_absent_and_empty_notes_differ() {
        let mut a = sample();
        a.delivery_notes = None;
        let mut b = sample();
        b.delivery_notes = Some(String::new());
        assert_ne!(a.compute_verification_hash(), b.compute_verification_hash());
    }

    #[test]
    fn test_hash_is_over_canonical_json() {
        let delivery = sample();
        let canonical = format!(
            concat!(
                r#"{{"shipmentId":42,"deliveredBy":"driver-7","deliveredAt":"{}","#,
                r#""recipientName":"Jane Doe","deliveryNotes":"Left with reception","#,
                r#""gpsLatitude":40.7128,"gpsLongitude":-74.006,"gpsAccuracy":5.0,"#,
                r#""signatureHash":null}}"#
            ),
            lgx_common::time::to_storage(&delivery.delivered_at)
        );
        let expected = format!("{:x}", Sha256::digest(canonical.as_bytes()));
        assert_eq!(delivery.verification_hash, expected);
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["status"], "delivered");
        assert_eq!(json["syncState"], "Pending");
        assert_eq!(json["shipmentId"], 42);
        assert!(json["erpSyncTimestamp"].is_null());
    }

    #[test]
    fn test_capture_input_trims_recipient() {
        let input = CaptureInput {
            recipient_name: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(input.recipient(), None);

        let input = CaptureInput {
            recipient_name: Some("  Jane Doe ".to_string()),
            ..Default::default()
        };
        assert_eq!(input.recipient(), Some("Jane Doe"));
    }
}
