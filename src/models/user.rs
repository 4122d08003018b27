use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::company::Company;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "user_role", rename_all = "UPPERCASE")]
pub enum UserRole {
    Seller,
    Buyer,
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            UserRole::Seller => "SELLER",
            UserRole::Buyer => "BUYER",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub external_id: String,
    pub firstname: String,
    pub lastname: Option<String>,
    pub email: String,
    pub image: Option<String>,
    pub role: UserRole,
    pub company_id: Option<Uuid>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Buyer as it appears on a request, with its company joined in.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserWithCompany {
    #[serde(flatten)]
    pub user: User,
    pub company: Option<Company>,
}

/// Counterpart summary attached to request list entries.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub firstname: String,
    pub lastname: Option<String>,
    pub email: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersResponse {
    pub users: Vec<User>,
    pub next_cursor: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_wire_format() {
        assert_eq!(serde_json::to_string(&UserRole::Seller).unwrap(), "\"SELLER\"");
        assert_eq!(serde_json::to_string(&UserRole::Buyer).unwrap(), "\"BUYER\"");
        let parsed: UserRole = serde_json::from_str("\"BUYER\"").unwrap();
        assert_eq!(parsed, UserRole::Buyer);
    }
}
