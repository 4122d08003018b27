pub mod authz;
pub mod company_snapshot;
