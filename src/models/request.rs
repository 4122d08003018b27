use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::user::{User, UserSummary, UserWithCompany};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "bike_status", rename_all = "UPPERCASE")]
pub enum BikeStatus {
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for BikeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BikeStatus::Pending => "PENDING",
            BikeStatus::Approved => "APPROVED",
            BikeStatus::Rejected => "REJECTED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BikeRequest {
    pub id: Uuid,
    pub bike_model: String,
    pub reason: String,
    pub notes: Option<String>,
    pub url: Option<String>,
    pub status: BikeStatus,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub decided_by: Option<Uuid>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// List entry: the request with its buyer (company included) and a summary
/// of the seller it is addressed to.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BikeRequestListItem {
    #[serde(flatten)]
    pub request: BikeRequest,
    pub buyer: UserWithCompany,
    pub seller: UserSummary,
}

/// Detail view: both parties joined in full.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BikeRequestDetail {
    #[serde(flatten)]
    pub request: BikeRequest,
    pub buyer: UserWithCompany,
    pub seller: User,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BikeRequestsResponse {
    pub bike_requests: Vec<BikeRequestListItem>,
    pub next_cursor: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBikeRequestPayload {
    pub seller_id: Uuid,
    pub bike_model: String,
    pub reason: String,
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBikeRequestResponse {
    pub success: bool,
    pub bike_request: BikeRequest,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecideRequestPayload {
    pub status: BikeStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecideRequestResponse {
    pub success: bool,
    pub message: String,
    pub request: BikeRequest,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageUploadResponse {
    pub success: bool,
    pub url: String,
    pub size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format() {
        assert_eq!(serde_json::to_string(&BikeStatus::Pending).unwrap(), "\"PENDING\"");
        let parsed: BikeStatus = serde_json::from_str("\"REJECTED\"").unwrap();
        assert_eq!(parsed, BikeStatus::Rejected);
        assert_eq!(BikeStatus::Approved.to_string(), "APPROVED");
    }

    #[test]
    fn test_decide_payload_accepts_camel_case() {
        let payload: DecideRequestPayload =
            serde_json::from_str(r#"{"status":"APPROVED","notes":"Pickup Friday"}"#).unwrap();
        assert_eq!(payload.status, BikeStatus::Approved);
        assert_eq!(payload.notes.as_deref(), Some("Pickup Friday"));
    }
}
