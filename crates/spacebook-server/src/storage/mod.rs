//! SQLite storage for the SpaceBook server.
//!
//! Provides persistence for spaces, slots, reservations, penalizations, push
//! subscriptions and the notification inbox.

mod db;
mod models;
mod queries_notifications;
mod queries_penalties;
mod queries_reservations;
mod queries_spaces;
mod queries_subscriptions;

#[cfg(test)]
mod tests;

pub use db::{DatabaseError, SpacebookDatabase};
pub use models::*;
