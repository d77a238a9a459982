//! SpaceBook Server Library
//!
//! Core functionality for the SpaceBook reservation service:
//! - SQLite storage for spaces, slots, reservations and penalizations
//! - Slot ledger and reservation state machine
//! - Background monitor expiring unconfirmed reservations
//! - Web push subscriptions and notification fan-out
//! - HTTP API

pub mod booking;
pub mod http;
pub mod notifications;
pub mod storage;

#[cfg(test)]
mod test_helpers;
