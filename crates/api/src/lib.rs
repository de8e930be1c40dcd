//! Chatgate HTTP API.
//!
//! Thin axum handlers over the domain, persistence, and delivery crates:
//! instance CRUD and lifecycle control, the inbound event seam, and
//! read-only views of webhook deliveries and instance logs.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod query;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
