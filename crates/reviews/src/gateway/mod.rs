//! Clients for collaborating services.

pub mod reservations;

pub use reservations::ReservationsClient;
