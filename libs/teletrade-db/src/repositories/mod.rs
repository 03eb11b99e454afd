pub mod audit_repo;
pub mod bot_repo;
pub mod client_repo;
pub mod payment_repo;
pub mod plan_repo;
pub mod stats_repo;
pub mod subscriber_repo;
