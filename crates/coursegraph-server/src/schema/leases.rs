//! Schema types for lease status.

use serde::Serialize;

use crate::concurrency::LeaseStatusEntry;

/// Response showing all held regeneration leases.
#[derive(Debug, Clone, Serialize)]
pub struct LeaseStatusResponse {
    pub leases: Vec<LeaseStatusEntry>,
}
