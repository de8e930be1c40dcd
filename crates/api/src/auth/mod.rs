//! Caller resolution: JWT validation and the [`AuthUser`] extractor.

pub mod extract;
pub mod jwt;

pub use extract::AuthUser;
