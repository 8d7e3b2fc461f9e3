//! Kiln API server library.
//!
//! Exposes the building blocks (config, state, error handling, routes,
//! WebSocket infrastructure, the event bridge, and the batch submitter)
//! so integration tests and the binary entrypoint can both access them.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod stats;
pub mod submit;
pub mod ws;
