//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&PgPool` as the first argument.

pub mod delivery_repo;
pub mod instance_log_repo;
pub mod instance_repo;
pub mod user_repo;

pub use delivery_repo::DeliveryRepo;
pub use instance_log_repo::InstanceLogRepo;
pub use instance_repo::InstanceRepo;
pub use user_repo::UserRepo;
