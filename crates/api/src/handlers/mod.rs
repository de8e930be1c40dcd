pub mod deliveries;
pub mod events;
pub mod instances;
pub mod logs;
pub mod messages;
