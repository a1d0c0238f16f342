//! # Bollwerk
//!
//! An axum backend whose every request passes an ordered security pipeline,
//! plus the reqwest-based client that cooperates with it.
//!
//! ## Architecture
//!
//! - **Axum** for routing; route-scoped middleware (bearer auth, per-route
//!   limiters) runs inside the pipeline
//! - **Tokio** for the runtime and the lock primitives behind the limiters
//! - **Serde** for the JSON envelopes
//!
//! ## Core Components
//!
//! - [`middleware`]: the pipeline driver and its stages (request id, header
//!   hardening, CORS, rate limiting, body ceiling, sanitizing, anomaly
//!   detection, content-type checks, compression bypass)
//! - [`classifier`]: maps every failure onto the fixed taxonomy and renders
//!   the error envelope with the request id
//! - [`crypto`] / [`token`]: encryption, hashing, signatures and the
//!   access/refresh credential pair
//! - [`client`]: token-aware API client with refresh-and-retry and encrypted
//!   session storage
//! - [`config`], [`state`], [`store`], [`metrics`], [`routes`], [`types`]

pub mod classifier;
pub mod client;
pub mod config;
pub mod context;
pub mod crypto;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod sanitize;
pub mod state;
pub mod store;
pub mod token;
pub mod types;

#[cfg(test)]
mod tests;
