//! Review management for accommodations and hosts.
//!
//! Guests review stays they completed, authors edit or withdraw their own
//! reviews, and anyone can read reviews of an accommodation or host. New
//! reviews are announced over the message broker, and identity-system events
//! keep usernames in stored reviews current.

pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod reviews;
pub mod telemetry;
