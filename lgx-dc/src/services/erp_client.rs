//! ERP HTTP boundary
//!
//! Every call carries an `Idempotency-Key` of the form
//! `<shipment>:<document type>:<delivery>` so that a retried or replayed push
//! is recognised by the ERP. Responses are classified as:
//! - 2xx, 409 (already applied): success
//! - 400, 404, 413, 415, 422: rejection, never retried
//! - 408, 429, 5xx, transport errors: transient

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lgx_common::events::DeliveryStatus;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

const USER_AGENT: &str = concat!("lgx-dc/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ErpError {
    #[error("ERP unavailable: {0}")]
    Transient(String),

    #[error("ERP request timed out after {0:?}")]
    Timeout(Duration),

    #[error("ERP returned {status}: {message}")]
    Rejected { status: u16, message: String },
}

impl ErpError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErpError::Rejected { .. })
    }
}

/// `<shipment>:<document type>:<delivery>`
pub fn idempotency_key(shipment_id: i64, document_type: &str, delivery_id: Uuid) -> String {
    format!("{}:{}:{}", shipment_id, document_type, delivery_id)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub shipment_id: i64,
    pub delivery_id: Uuid,
    pub status: DeliveryStatus,
    pub delivered_at: DateTime<Utc>,
    pub delivered_by: String,
    pub recipient_name: String,
    pub delivery_notes: Option<String>,
    pub verification_hash: String,
    #[serde(skip)]
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUpload {
    pub shipment_id: i64,
    pub delivery_id: Uuid,
    /// `signature` or `photo.<photo id>`
    pub document_type: String,
    pub file_name: String,
    pub mime_type: String,
    /// Base64 file content
    pub content: String,
    #[serde(skip)]
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingRow {
    pub shipment_id: i64,
    pub delivery_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub recorded_at: DateTime<Utc>,
    #[serde(skip)]
    pub idempotency_key: String,
}

/// Operations the sync worker needs from the ERP
#[async_trait]
pub trait ErpClient: Send + Sync {
    async fn update_shipment_status(&self, update: &StatusUpdate) -> Result<(), ErpError>;

    async fn upload_document(&self, document: &DocumentUpload) -> Result<(), ErpError>;

    async fn insert_tracking(&self, row: &TrackingRow) -> Result<(), ErpError>;
}

pub struct HttpErpClient {
    http_client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpErpClient {
    pub fn new(
        base_url: impl Into<String>,
        api_token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, ErpError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| ErpError::Transient(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        })
    }

    async fn send<T: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        path: &str,
        idempotency_key: &str,
        body: &T,
    ) -> Result<(), ErpError> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(url = %url, idempotency_key, "ERP request");

        let mut request = self
            .http_client
            .request(method, &url)
            .header("Idempotency-Key", idempotency_key)
            .json(body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ErpError::Transient(format!("request to {} timed out", url))
            } else {
                ErpError::Transient(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        Err(classify(status, message))
    }
}

/// Map a non-success ERP status onto retry semantics
pub fn classify(status: StatusCode, message: String) -> ErpError {
    let message = if message.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("no response body")
            .to_string()
    } else {
        message
    };

    match status {
        StatusCode::BAD_REQUEST
        | StatusCode::NOT_FOUND
        | StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNSUPPORTED_MEDIA_TYPE
        | StatusCode::UNPROCESSABLE_ENTITY => {
            ErpError::Rejected {
                status: status.as_u16(),
                message,
            }
        }
        _ => ErpError::Transient(format!("{}: {}", status.as_u16(), message)),
    }
}

#[async_trait]
impl ErpClient for HttpErpClient {
    async fn update_shipment_status(&self, update: &StatusUpdate) -> Result<(), ErpError> {
        let path = format!("/shipments/{}/status", update.shipment_id);
        self.send(reqwest::Method::PUT, &path, &update.idempotency_key, update)
            .await
    }

    async fn upload_document(&self, document: &DocumentUpload) -> Result<(), ErpError> {
        let path = format!("/shipments/{}/documents", document.shipment_id);
        self.send(reqwest::Method::POST, &path, &document.idempotency_key, document)
            .await
    }

    async fn insert_tracking(&self, row: &TrackingRow) -> Result<(), ErpError> {
        let path = format!("/shipments/{}/tracking", row.shipment_id);
        self.send(reqwest::Method::POST, &path, &row.idempotency_key, row)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        for code in [400u16, 404, 413, 415, 422] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(!classify(status, String::new()).is_retryable(), "{}", code);
        }
        for code in [408u16, 429, 500, 502, 503, 504] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(classify(status, String::new()).is_retryable(), "{}", code);
        }
    }

    #[test]
    fn test_idempotency_key_format() {
        let delivery = Uuid::nil();
        assert_eq!(
            idempotency_key(42, "signature", delivery),
            "42:signature:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client =
            HttpErpClient::new("https://erp.example.com/api/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url, "https://erp.example.com/api");
    }
}
