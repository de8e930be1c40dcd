//! Chatgate event and webhook-delivery infrastructure.
//!
//! The building blocks between "something happened on an instance" and
//! "the configured webhook URL received an HTTP POST":
//!
//! - [`EventBus`] / [`GatewayEvent`] -- in-process publish/subscribe hub
//!   backed by `tokio::sync::broadcast`.
//! - [`EventEmitter`] -- background task that turns subscribed events into
//!   `pending` delivery rows and hands them to the scheduler.
//! - [`DeliveryLedger`] -- durable attempt bookkeeping (Postgres-backed in
//!   production, in-memory in tests).
//! - [`DeliveryScheduler`] -- due-set, backoff timing, and the bounded
//!   worker pool performing outbound HTTP calls.
//! - [`WebhookClient`] -- the reqwest transport (one attempt, 10 s timeout).

pub mod bus;
pub mod emitter;
pub mod ledger;
pub mod scheduler;
pub mod transport;

#[cfg(test)]
mod testing;

pub use bus::{EventBus, GatewayEvent};
pub use emitter::{EventEmitter, InstanceDirectory, PgDirectory};
pub use ledger::{AttemptRecord, DeliveryLedger, LedgerError, PgLedger};
pub use scheduler::{DeliveryScheduler, ScheduledDelivery, SchedulerHandle};
pub use transport::{AttemptResult, DeliveryTransport, WebhookClient};
