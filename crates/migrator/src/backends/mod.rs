//! Database Backend Abstractions
//!
//! The migration runner talks to the database through the
//! [`MigrationConnection`] trait; PostgreSQL is the production backend.

pub mod core;
pub mod postgres;

#[cfg(test)]
pub(crate) mod memory;

// Re-export core traits and types
pub use self::core::*;
pub use self::postgres::PostgresConnection;
