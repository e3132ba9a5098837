//! PostgreSQL storage for conduit workflows.
//!
//! This crate implements the engine's storage collaborators on sqlx:
//!
//! - [`PgWorkflowStore`] opens transactions
//! - [`PgTransaction`] reads the catalog and persists workflows, their
//!   graph rows, notifications, event integration links and groups
//! - [`MIGRATOR`] creates the schema
//!
//! Row locks use `FOR UPDATE SKIP LOCKED`: a workflow held by another
//! transaction is reported as locked instead of waited for.

mod catalog;
pub mod config;
mod import;
mod rows;
mod transaction;

pub use config::StoreConfig;
pub use transaction::{PgTransaction, PgWorkflowStore};

/// Schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
