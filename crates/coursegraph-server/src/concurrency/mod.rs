//! Concurrency control for regeneration.
//!
//! - [`lease_manager`]: per-node leases with TTL expiry and a periodic sweep

pub mod lease_manager;

pub use lease_manager::{Lease, LeaseError, LeaseId, LeaseManager, LeasePhase, LeaseStatusEntry};
