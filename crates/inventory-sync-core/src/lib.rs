//! # inventory-sync core
//!
//! Pure reconciliation logic for inventory-sync: source record models,
//! identity normalization, timestamp interpretation, the OCS/AD merge, and
//! the index sink abstraction.
//!
//! This crate performs no network or database I/O and carries no tokio
//! dependency. The application crate supplies concrete sources and sinks.

pub mod identity;
pub mod models;
pub mod reconcile;
pub mod sink;
pub mod timestamp;
