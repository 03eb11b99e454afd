pub mod db;
pub mod ledger;
pub mod models;
pub mod repositories;

pub use db::{init_db, ping};
pub use ledger::{LedgerStore, PgLedger};
pub use sqlx;
