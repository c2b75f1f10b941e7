//! Persistence façade over SQLite.
//!
//! # Responsibility
//! - Expose resource CRUD, table provisioning and notifications through a
//!   single handle.
//! - Keep SQL execution details behind the façade boundary.
//!
//! # Invariants
//! - Zero-row matches surface as `Ok(None)`, not as errors.
//! - Write failures roll back the whole call.

pub mod persistence;
