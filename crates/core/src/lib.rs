//! Pure domain logic for the generation orchestration core.
//!
//! This crate has zero internal dependencies so it can be used by the
//! render client, the engine, the persistence layer, and any future
//! CLI tooling.

pub mod error;
pub mod job;
pub mod replenish;
pub mod stats;
pub mod store;
pub mod types;
