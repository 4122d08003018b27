//! Role capability table. Every handler that guards an operation asks this
//! table instead of comparing roles inline, so the whole authorization
//! policy is visible in one place.

use crate::models::user::UserRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    CreateRequest,
    DecideRequest,
    ManageCodes,
    ViewCustomers,
    UseAssistant,
    ManageBilling,
}

pub fn role_can(role: UserRole, capability: Capability) -> bool {
    use Capability::*;

    match (role, capability) {
        // Request creation is open to any onboarded user; only the decision
        // step enforces company membership.
        (_, CreateRequest) => true,
        (UserRole::Seller, DecideRequest) => true,
        (UserRole::Seller, ManageCodes) => true,
        (UserRole::Seller, ViewCustomers) => true,
        (UserRole::Seller, UseAssistant) => true,
        (UserRole::Seller, ManageBilling) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buyers_can_create_but_not_administer() {
        assert!(role_can(UserRole::Buyer, Capability::CreateRequest));
        assert!(!role_can(UserRole::Buyer, Capability::DecideRequest));
        assert!(!role_can(UserRole::Buyer, Capability::ManageCodes));
        assert!(!role_can(UserRole::Buyer, Capability::ViewCustomers));
        assert!(!role_can(UserRole::Buyer, Capability::UseAssistant));
        assert!(!role_can(UserRole::Buyer, Capability::ManageBilling));
    }

    #[test]
    fn test_sellers_hold_company_capabilities() {
        assert!(role_can(UserRole::Seller, Capability::DecideRequest));
        assert!(role_can(UserRole::Seller, Capability::ManageCodes));
        assert!(role_can(UserRole::Seller, Capability::ViewCustomers));
        assert!(role_can(UserRole::Seller, Capability::UseAssistant));
        assert!(role_can(UserRole::Seller, Capability::ManageBilling));
        assert!(role_can(UserRole::Seller, Capability::CreateRequest));
    }
}
