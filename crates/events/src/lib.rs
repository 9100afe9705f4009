//! Event system for the council engine
//!
//! This crate provides the progress event types and a process-wide event
//! bus that fans every published session event out to global subscribers.

mod bus;
mod types;

pub use bus::{BusSubscription, EventBus};
pub use types::*;
