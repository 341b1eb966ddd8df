//! HTTP/JSON orchestrator for course dependency graphs.
//!
//! Serves the graph store from coursegraph-core over axum and adds what a
//! running course needs around it: background staleness propagation,
//! per-node regeneration leases, tiered context assembly, the regeneration
//! coordinator, state-change notifications, and incremental persistence.

pub mod collaborators;
pub mod concurrency;
pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod llm_provider;
pub mod notify;
pub mod propagation;
pub mod regenerate;
pub mod router;
pub mod schema;
pub mod service;
pub mod state;
