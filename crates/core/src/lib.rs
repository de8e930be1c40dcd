//! Chatgate domain logic.
//!
//! Pure types and rules shared by the persistence, event, and API crates:
//!
//! - [`lifecycle`] -- the instance lifecycle state machine.
//! - [`events`] -- the gateway event vocabulary (message, connection, ...).
//! - [`backoff`] -- the webhook retry policy.
//! - [`api_keys`] -- instance API key generation.
//!
//! This crate has no database or HTTP dependency; everything in it is
//! unit-testable without IO.

pub mod api_keys;
pub mod backoff;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod types;

pub use backoff::RetryPolicy;
pub use error::CoreError;
pub use events::EventKind;
pub use lifecycle::{ControlAction, InstanceStatus, LifecycleError};
