//! SQLite-backed contract store.
//!
//! This module provides:
//! - Database initialization, pragmas and schema migration
//! - `Repository`, the `ContractStore` used in production

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::Repository;
