//! Roster sync core: provider adapters, canonical model, delta detection,
//! cursor and token management, and the state store.

pub mod canonical_id;
pub mod config;
pub mod coordinator;
pub mod deletion;
pub mod error;
pub mod hash_detector;
pub mod hashing;
pub mod models;
pub mod orchestrator;
pub mod pager;
pub mod providers;
pub mod rate_limit;
pub mod retry;
pub mod store;
pub mod token;

#[cfg(test)]
mod test_support;
