//! Resource model shared by every persisted row type.
//!
//! # Responsibility
//! - Define the `Common` envelope embedded (by composition) in resources.
//! - Define the `Resource` capability the persistence façade is generic over.
//!
//! # Invariants
//! - Every resource is identified by a stable, non-nil `ResourceId`.
//! - Deletion is a `delete_time` tombstone; rows are never physically removed.

pub mod common;
pub mod resource;
