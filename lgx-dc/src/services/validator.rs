//! Signature and photo validation
//!
//! Pure functions, no state. Quality is scored from canvas coverage, point
//! density and stroke count:
//!
//! `0.45 * coverage + 0.35 * density + 0.20 * strokes`
//!
//! where each term is clamped to [0, 1]. Coverage saturates when the
//! signature's bounding box spans 20% of the canvas, density at 150 points,
//! strokes at 3.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

use super::{DeliveryError, FieldError};
use crate::models::{GpsFix, PhotoType, SignatureInput, Stroke};

/// Minimum quality for a signature to count as legally valid
pub const LEGAL_QUALITY_THRESHOLD: f64 = 0.70;

/// Fewer points than this is a tap, not a signature
pub const MIN_SIGNATURE_POINTS: usize = 10;

const COVERAGE_WEIGHT: f64 = 0.45;
const DENSITY_WEIGHT: f64 = 0.35;
const STROKES_WEIGHT: f64 = 0.20;

const COVERAGE_SATURATION: f64 = 0.20;
const DENSITY_SATURATION: f64 = 150.0;
const STROKES_SATURATION: f64 = 3.0;

/// Image types accepted for signatures and photos
pub const ACCEPTED_IMAGE_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

#[derive(Debug, Clone, PartialEq)]
pub struct SignatureValidation {
    pub valid: bool,
    pub quality_score: f64,
    pub errors: Vec<FieldError>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignatureProgress {
    pub stroke_count: usize,
    pub point_count: usize,
    pub quality_estimate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhotoValidation {
    pub valid: bool,
    pub has_gps: bool,
    pub errors: Vec<FieldError>,
}

/// Validate an optional GPS fix
///
/// Both coordinates absent is fine. A lone coordinate, an out-of-range value
/// or a negative accuracy is rejected.
pub fn validate_gps(
    latitude: Option<f64>,
    longitude: Option<f64>,
    accuracy: Option<f64>,
) -> Result<Option<GpsFix>, DeliveryError> {
    let mut errors = Vec::new();

    match (latitude, longitude) {
        (None, None) => {
            if accuracy.is_some() {
                errors.push(FieldError::new(
                    "gps_accuracy",
                    "Accuracy given without coordinates",
                ));
                return Err(DeliveryError::InvalidGpsCoordinates(errors));
            }
            return Ok(None);
        }
        (Some(_), None) => errors.push(FieldError::new(
            "gps_longitude",
            "Longitude is required when latitude is given",
        )),
        (None, Some(_)) => errors.push(FieldError::new(
            "gps_latitude",
            "Latitude is required when longitude is given",
        )),
        (Some(_), Some(_)) => {}
    }

    if let Some(lat) = latitude {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            errors.push(FieldError::new(
                "gps_latitude",
                format!("Latitude {} is outside [-90, 90]", lat),
            ));
        }
    }
    if let Some(lon) = longitude {
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            errors.push(FieldError::new(
                "gps_longitude",
                format!("Longitude {} is outside [-180, 180]", lon),
            ));
        }
    }
    if let Some(acc) = accuracy {
        if !acc.is_finite() || acc < 0.0 {
            errors.push(FieldError::new(
                "gps_accuracy",
                "Accuracy must be a non-negative number of meters",
            ));
        }
    }

    match (latitude, longitude) {
        (Some(latitude), Some(longitude)) if errors.is_empty() => Ok(Some(GpsFix {
            latitude,
            longitude,
            accuracy,
        })),
        _ => Err(DeliveryError::InvalidGpsCoordinates(errors)),
    }
}

/// SHA-256 hex of the encoded signature image, exactly as submitted
pub fn signature_hash(signature_data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(signature_data.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Decode a `data:<mime>;base64,<payload>` URL or bare base64
pub fn decode_image_payload(data: &str) -> Result<Vec<u8>, String> {
    let data = data.trim();
    let payload = match data.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| "Data URL has no payload".to_string())?;
            if !header.ends_with(";base64") {
                return Err("Data URL must be base64 encoded".to_string());
            }
            payload
        }
        None => data,
    };

    if payload.is_empty() {
        return Err("Image payload is empty".to_string());
    }

    STANDARD
        .decode(payload)
        .map_err(|e| format!("Image payload is not valid base64: {}", e))
}

/// MIME type from magic bytes, when it is one of the accepted image types
pub fn detect_image_mime(bytes: &[u8]) -> Option<&'static str> {
    infer::get(bytes)
        .map(|kind| kind.mime_type())
        .filter(|mime| ACCEPTED_IMAGE_TYPES.contains(mime))
}

/// Score and validate a captured signature
pub fn validate_signature(input: &SignatureInput) -> SignatureValidation {
    let mut errors = Vec::new();

    match decode_image_payload(&input.signature_data) {
        Ok(bytes) => {
            if detect_image_mime(&bytes).is_none() {
                errors.push(FieldError::new(
                    "signature_data",
                    "Signature image must be PNG, JPEG or WebP",
                ));
            }
        }
        Err(message) => errors.push(FieldError::new("signature_data", message)),
    }

    if input.width == 0 || input.height == 0 {
        errors.push(FieldError::new("width", "Canvas dimensions must be non-zero"));
    }

    let points = point_count(&input.stroke_data);
    if points == 0 {
        errors.push(FieldError::new("stroke_data", "Signature has no strokes"));
    } else if points < MIN_SIGNATURE_POINTS {
        errors.push(FieldError::new(
            "stroke_data",
            format!(
                "Signature has {} points, at least {} are required",
                points, MIN_SIGNATURE_POINTS
            ),
        ));
    }

    let quality_score = quality_score(&input.stroke_data, input.width, input.height);
    if errors.is_empty() && quality_score < LEGAL_QUALITY_THRESHOLD {
        errors.push(FieldError::new(
            "quality_score",
            format!(
                "Signature quality {:.3} is below the required {:.2}",
                quality_score, LEGAL_QUALITY_THRESHOLD
            ),
        ));
    }

    SignatureValidation {
        valid: errors.is_empty(),
        quality_score,
        errors,
    }
}

/// Weighted quality in [0, 1], rounded to 3 decimals
pub fn quality_score(strokes: &[Stroke], width: u32, height: u32) -> f64 {
    let points = point_count(strokes);
    if points == 0 {
        return 0.0;
    }

    let coverage = (bounding_box_coverage(strokes, width, height) / COVERAGE_SATURATION).min(1.0);
    let density = (points as f64 / DENSITY_SATURATION).min(1.0);
    let stroke_term = (non_empty_strokes(strokes) as f64 / STROKES_SATURATION).min(1.0);

    let score = COVERAGE_WEIGHT * coverage + DENSITY_WEIGHT * density + STROKES_WEIGHT * stroke_term;
    round3(score.clamp(0.0, 1.0))
}

/// Running feedback while the recipient is still drawing
pub fn estimate_progress(strokes: &[Stroke], width: u32, height: u32) -> SignatureProgress {
    SignatureProgress {
        stroke_count: non_empty_strokes(strokes),
        point_count: point_count(strokes),
        quality_estimate: quality_score(strokes, width, height),
    }
}

/// Check a decoded photo against the configured limits
pub fn validate_photo(
    size: usize,
    mime_type: Option<&str>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    photo_type: PhotoType,
    max_bytes: usize,
    require_gps_for_proof: bool,
) -> PhotoValidation {
    let mut errors = Vec::new();

    if size == 0 {
        errors.push(FieldError::new("data", "Photo is empty"));
    } else if size > max_bytes {
        errors.push(FieldError::new(
            "data",
            format!("{} bytes exceeds the {} byte limit", size, max_bytes),
        ));
    }

    match mime_type {
        Some(mime) if ACCEPTED_IMAGE_TYPES.contains(&mime) => {}
        Some(mime) => errors.push(FieldError::new(
            "data",
            format!("Unsupported photo type {}", mime),
        )),
        None => errors.push(FieldError::new("data", "Photo must be JPEG, PNG or WebP")),
    }

    let has_gps = latitude.is_some() && longitude.is_some();
    if let Err(DeliveryError::InvalidGpsCoordinates(gps_errors)) =
        validate_gps(latitude, longitude, None)
    {
        errors.extend(gps_errors);
    }

    if require_gps_for_proof && photo_type == PhotoType::DeliveryProof && !has_gps {
        errors.push(FieldError::new(
            "gps_latitude",
            "Delivery proof photos must carry GPS coordinates",
        ));
    }

    PhotoValidation {
        valid: errors.is_empty(),
        has_gps,
        errors,
    }
}

fn point_count(strokes: &[Stroke]) -> usize {
    strokes.iter().map(Vec::len).sum()
}

fn non_empty_strokes(strokes: &[Stroke]) -> usize {
    strokes.iter().filter(|stroke| !stroke.is_empty()).count()
}

/// Fraction of the canvas covered by the bounding box of all points
fn bounding_box_coverage(strokes: &[Stroke], width: u32, height: u32) -> f64 {
    if width == 0 || height == 0 {
        return 0.0;
    }

    let mut points = strokes.iter().flatten();
    let Some(first) = points.next() else {
        return 0.0;
    };
    let (mut min_x, mut max_x, mut min_y, mut max_y) = (first.x, first.x, first.y, first.y);
    for p in points {
        min_x = min_x.min(p.x);
        max_x = max_x.max(p.x);
        min_y = min_y.min(p.y);
        max_y = max_y.max(p.y);
    }

    let w = width as f64;
    let h = height as f64;
    let box_w = (max_x.min(w) - min_x.max(0.0)).max(0.0);
    let box_h = (max_y.min(h) - min_y.max(0.0)).max(0.0);
    (box_w * box_h) / (w * h)
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::StrokePoint;

    /// 1x1 transparent PNG
    pub(crate) const TINY_PNG_B64: &str =
        "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    /// `n` points on a diagonal from (x0, y0) to (x1, y1)
    pub(crate) fn line(n: usize, x0: f64, y0: f64, x1: f64, y1: f64) -> Stroke {
        (0..n)
            .map(|i| {
                let f = if n > 1 { i as f64 / (n - 1) as f64 } else { 0.0 };
                StrokePoint {
                    x: x0 + (x1 - x0) * f,
                    y: y0 + (y1 - y0) * f,
                    t: Some(i as i64 * 10),
                }
            })
            .collect()
    }

    /// Three strokes, 150 points, spanning half the canvas each way
    pub(crate) fn strong_signature() -> SignatureInput {
        SignatureInput {
            signature_data: format!("data:image/png;base64,{}", TINY_PNG_B64),
            stroke_data: vec![
                line(50, 100.0, 50.0, 300.0, 150.0),
                line(50, 100.0, 150.0, 300.0, 50.0),
                line(50, 120.0, 100.0, 280.0, 100.0),
            ],
            width: 400,
            height: 200,
            device_info: Some("test-tablet".to_string()),
        }
    }

    #[test]
    fn test_strong_signature_scores_full() {
        let result = validate_signature(&strong_signature());
        assert!(result.valid, "errors: {:?}", result.errors);
        assert_eq!(result.quality_score, 1.0);
    }

    #[test]
    fn test_score_formula() {
        // 1 stroke, 15 points, bbox 40x20 on 400x200 => 1% coverage
        let strokes = vec![line(15, 0.0, 0.0, 40.0, 20.0)];
        // 0.45 * (0.01 / 0.2) + 0.35 * (15 / 150) + 0.20 * (1 / 3)
        let expected = 0.45 * 0.05 + 0.35 * 0.1 + 0.20 / 3.0;
        assert_eq!(quality_score(&strokes, 400, 200), round3(expected));
    }

    #[test]
    fn test_weak_signature_rejected() {
        let mut input = strong_signature();
        input.stroke_data = vec![line(12, 10.0, 10.0, 20.0, 12.0)];
        let result = validate_signature(&input);
        assert!(!result.valid);
        assert!(result.quality_score < LEGAL_QUALITY_THRESHOLD);
        assert!(result.errors.iter().any(|e| e.field == "quality_score"));
    }

    #[test]
    fn test_too_few_points_rejected() {
        let mut input = strong_signature();
        input.stroke_data = vec![line(9, 0.0, 0.0, 400.0, 200.0)];
        let result = validate_signature(&input);
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.field == "stroke_data"));

        input.stroke_data.clear();
        assert!(!validate_signature(&input).valid);
    }

    #[test]
    fn test_bad_image_payload_rejected() {
        let mut input = strong_signature();
        input.signature_data = "not base64 at all!".to_string();
        let result = validate_signature(&input);
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.field == "signature_data"));

        // Valid base64, but plain text rather than an image
        input.signature_data = STANDARD.encode(b"hello world, not an image");
        assert!(!validate_signature(&input).valid);
    }

    #[test]
    fn test_bare_base64_accepted() {
        let mut input = strong_signature();
        input.signature_data = TINY_PNG_B64.to_string();
        assert!(validate_signature(&input).valid);
    }

    #[test]
    fn test_gps_boundaries() {
        assert!(validate_gps(Some(90.0), Some(180.0), None).is_ok());
        assert!(validate_gps(Some(-90.0), Some(-180.0), Some(0.0)).is_ok());
        assert!(validate_gps(Some(90.0001), Some(0.0), None).is_err());
        assert!(validate_gps(Some(0.0), Some(-180.0001), None).is_err());
        assert!(validate_gps(Some(f64::NAN), Some(0.0), None).is_err());
        assert_eq!(validate_gps(None, None, None).unwrap(), None);
    }

    #[test]
    fn test_lone_coordinate_rejected() {
        let err = validate_gps(Some(40.7), None, None).unwrap_err();
        assert_eq!(err.code(), "INVALID_GPS_COORDINATES");
        assert!(validate_gps(None, Some(-74.0), None).is_err());
        assert!(validate_gps(Some(40.7), Some(-74.0), Some(-1.0)).is_err());
    }

    #[test]
    fn test_progress_estimate() {
        let progress = estimate_progress(&strong_signature().stroke_data, 400, 200);
        assert_eq!(progress.stroke_count, 3);
        assert_eq!(progress.point_count, 150);
        assert_eq!(progress.quality_estimate, 1.0);

        let empty = estimate_progress(&[], 400, 200);
        assert_eq!(empty.quality_estimate, 0.0);
    }

    #[test]
    fn test_photo_validation() {
        let ok = validate_photo(
            1000,
            Some("image/jpeg"),
            Some(1.0),
            Some(2.0),
            PhotoType::DeliveryProof,
            5 * 1024 * 1024,
            true,
        );
        assert!(ok.valid);
        assert!(ok.has_gps);

        let too_big = validate_photo(
            5 * 1024 * 1024 + 1,
            Some("image/png"),
            None,
            None,
            PhotoType::SitePhoto,
            5 * 1024 * 1024,
            false,
        );
        assert!(!too_big.valid);

        let gif = validate_photo(10, Some("image/gif"), None, None, PhotoType::SitePhoto, 100, false);
        assert!(!gif.valid);

        let missing_gps = validate_photo(
            10,
            Some("image/png"),
            None,
            None,
            PhotoType::DeliveryProof,
            100,
            true,
        );
        assert!(!missing_gps.valid);
        assert!(!missing_gps.has_gps);
    }
}
