//! Durable state store.
//!
//! [`StateStore`] owns the ledger file. Every mutation is persisted with a
//! write-to-temp, fsync, rename sequence before the call returns.

pub(crate) mod persist;
mod state_store;

pub use state_store::{LoadOutcome, StateStore};
