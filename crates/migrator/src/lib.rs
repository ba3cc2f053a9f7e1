//! # oac-migrator: Database migrations for OAC
//!
//! Applies the ordered SQL migration files of the OAC schema, and of any
//! additional modules, to a PostgreSQL database exactly once each.
//!
//! Every module has its own directory of `NNNNNNNN-description.sql` files and
//! its own rows in the `migrations` bookkeeping table. Outstanding files of a
//! module are applied in a single transaction; installations that predate
//! the bookkeeping table are reconciled on their first run.

pub mod backends;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod migrations;

// Re-export core traits and types
pub use backends::{MigrationConnection, PostgresConnection};
pub use config::*;
pub use database::{connect, connect_or_create, replace_database};
pub use error::*;
pub use logging::*;
pub use migrations::*;
