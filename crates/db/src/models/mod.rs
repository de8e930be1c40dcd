//! Database row types.
//!
//! Each struct derives `FromRow` and maps one table. Status/event columns
//! are stored as TEXT; the enums in `chatgate-core` own the value sets and
//! conversions.

pub mod delivery;
pub mod instance;
pub mod instance_log;
pub mod user;

pub use delivery::{NewDelivery, WebhookDeliveryRow};
pub use instance::{Instance, UpdateWebhookConfig, WebhookConfig};
pub use instance_log::InstanceLog;
pub use user::User;
