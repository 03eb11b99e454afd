pub mod audit;
pub mod bot;
pub mod client;
pub mod payment;
pub mod plan;
pub mod stats;
pub mod subscriber;
