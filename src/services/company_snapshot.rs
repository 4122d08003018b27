//! Read-only company projection that grounds the chat assistant. Rebuilt in
//! full on every chat turn; company rosters are page-size bounded, so the
//! recompute stays cheap.

use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::request::BikeStatus;
use crate::models::user::UserRole;

#[derive(Debug, Clone)]
pub struct UserActivity {
    pub firstname: String,
    pub lastname: Option<String>,
    pub email: String,
    pub role: UserRole,
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
}

#[derive(Debug, Clone)]
pub struct CompanySnapshot {
    pub name: String,
    pub website: Option<String>,
    pub users: Vec<UserActivity>,
    pub codes: Vec<String>,
}

impl CompanySnapshot {
    pub fn seller_count(&self) -> usize {
        self.users.iter().filter(|u| u.role == UserRole::Seller).count()
    }

    pub fn buyer_count(&self) -> usize {
        self.users.iter().filter(|u| u.role == UserRole::Buyer).count()
    }
}

/// Loads the full snapshot for one company. Returns `None` when the company
/// row itself is gone.
pub async fn load_company_snapshot(
    pool: &PgPool,
    company_id: Uuid,
) -> Result<Option<CompanySnapshot>, sqlx::Error> {
    let company = sqlx::query("SELECT name, website FROM companies WHERE id = $1")
        .bind(company_id)
        .fetch_optional(pool)
        .await?;

    let Some(company) = company else {
        return Ok(None);
    };

    let member_rows = sqlx::query(
        "SELECT id, firstname, lastname, email, role FROM users
         WHERE company_id = $1
         ORDER BY created_at ASC",
    )
    .bind(company_id)
    .fetch_all(pool)
    .await?;

    // Per-user status breakdown over every request the user is a party to,
    // as the requesting buyer or as the addressed seller.
    let count_rows = sqlx::query(
        "SELECT t.user_id, t.status, COUNT(*) AS total
         FROM (
             SELECT buyer_id AS user_id, status FROM bike_requests
             UNION ALL
             SELECT seller_id AS user_id, status FROM bike_requests
         ) t
         JOIN users u ON u.id = t.user_id
         WHERE u.company_id = $1
         GROUP BY t.user_id, t.status",
    )
    .bind(company_id)
    .fetch_all(pool)
    .await?;

    let mut counts: std::collections::HashMap<(Uuid, BikeStatus), i64> = std::collections::HashMap::new();
    for row in &count_rows {
        let user_id: Uuid = row.get("user_id");
        let status: BikeStatus = row.get("status");
        let total: i64 = row.get("total");
        counts.insert((user_id, status), total);
    }

    let users = member_rows
        .iter()
        .map(|row| {
            let id: Uuid = row.get("id");
            UserActivity {
                firstname: row.get("firstname"),
                lastname: row.get("lastname"),
                email: row.get("email"),
                role: row.get("role"),
                pending: counts.get(&(id, BikeStatus::Pending)).copied().unwrap_or(0),
                approved: counts.get(&(id, BikeStatus::Approved)).copied().unwrap_or(0),
                rejected: counts.get(&(id, BikeStatus::Rejected)).copied().unwrap_or(0),
            }
        })
        .collect();

    let codes = sqlx::query_scalar::<_, String>(
        "SELECT code FROM codes WHERE company_id = $1 ORDER BY created_at DESC",
    )
    .bind(company_id)
    .fetch_all(pool)
    .await?;

    Ok(Some(CompanySnapshot {
        name: company.get("name"),
        website: company.get("website"),
        users,
        codes,
    }))
}

/// Assistant system prompt grounded in the snapshot.
pub fn build_system_prompt(snapshot: &CompanySnapshot) -> String {
    let directory = snapshot
        .users
        .iter()
        .map(|u| {
            format!(
                "- {} {} ({}) [{}] - Pending Requests: {}, Approved Requests: {}, Rejected Requests: {}",
                u.firstname,
                u.lastname.as_deref().unwrap_or(""),
                u.email,
                u.role,
                u.pending,
                u.approved,
                u.rejected,
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let codes = snapshot
        .codes
        .iter()
        .map(|code| format!("- {}", code))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a helpful, knowledgeable AI assistant for the bike seller company "{name}".
Your goal is to assist the company's sellers with questions related to:
- Buyer activity
- Approved or pending bike requests
- Internal users (sellers and buyers)
- Unique referral codes
- General company insights

Company Overview:
- Name: {name}
- Website: {website}

Company Stats:
- Total Users: {total_users}
  - Sellers: {sellers}
  - Buyers: {buyers}
- Total Codes Issued: {total_codes}

User Directory:
{directory}

Recent Referral Codes:
{codes}

Guidelines:
- Use this data to help sellers understand activity within the company.
- Be concise, polite, and specific to what the seller asks.
- If you're not sure, offer to clarify or ask a follow-up question.
- Never reveal data unrelated to the seller's company."#,
        name = snapshot.name,
        website = snapshot.website.as_deref().unwrap_or("Not available"),
        total_users = snapshot.users.len(),
        sellers = snapshot.seller_count(),
        buyers = snapshot.buyer_count(),
        total_codes = snapshot.codes.len(),
        directory = directory,
        codes = codes,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> CompanySnapshot {
        CompanySnapshot {
            name: "Wheelhouse".to_string(),
            website: None,
            users: vec![
                UserActivity {
                    firstname: "Sara".to_string(),
                    lastname: Some("Linden".to_string()),
                    email: "sara@wheelhouse.example".to_string(),
                    role: UserRole::Seller,
                    pending: 2,
                    approved: 5,
                    rejected: 1,
                },
                UserActivity {
                    firstname: "Omar".to_string(),
                    lastname: None,
                    email: "omar@wheelhouse.example".to_string(),
                    role: UserRole::Buyer,
                    pending: 1,
                    approved: 0,
                    rejected: 0,
                },
            ],
            codes: vec!["483920".to_string(), "104882".to_string()],
        }
    }

    #[test]
    fn test_counts_by_role() {
        let s = snapshot();
        assert_eq!(s.seller_count(), 1);
        assert_eq!(s.buyer_count(), 1);
    }

    #[test]
    fn test_prompt_carries_company_stats() {
        let prompt = build_system_prompt(&snapshot());
        assert!(prompt.contains("bike seller company \"Wheelhouse\""));
        assert!(prompt.contains("- Website: Not available"));
        assert!(prompt.contains("- Total Users: 2"));
        assert!(prompt.contains("  - Sellers: 1"));
        assert!(prompt.contains("  - Buyers: 1"));
        assert!(prompt.contains("- Total Codes Issued: 2"));
        assert!(prompt.contains(
            "- Sara Linden (sara@wheelhouse.example) [SELLER] - Pending Requests: 2, Approved Requests: 5, Rejected Requests: 1"
        ));
        assert!(prompt.contains("- 483920"));
    }
}
