//! Deal record lifecycle and access-scoped coordination layer.
//!
//! Turns a negotiated-sale document through a regulated state machine under
//! optimistic concurrency, resolves requester permissions through a
//! short-lived cache, narrows queries to what a requester may see, reserves
//! and releases inventory units as transition side effects, and fans state
//! changes out to exactly the subscribers entitled to them.

pub mod access;
pub mod audit;
pub mod cache;
pub mod error;
pub mod gateway;
pub mod inventory;
pub mod record;
pub mod service;
pub mod state;
pub mod store;
pub mod utils;

pub use error::{LifecycleError, Result};
