//! Migration System
//!
//! Module catalog and directory lookup, migration file resolution and the
//! runner that applies outstanding files per module.

pub mod definitions;
pub mod modules;
pub mod resolver;
pub mod runner;

// Re-export migration types
pub use definitions::*;
pub use modules::*;
pub use resolver::*;
pub use runner::*;
