//! API schema types for request/response definitions.
//!
//! Each sub-module defines the request and response types for one API
//! domain. Core records (`NodeRecord`, `Subgraph`, `ImpactReport`) already
//! serialize and are returned as-is; the views here cover outcomes that
//! carry more than a record.

pub mod courses;
pub mod edges;
pub mod leases;
pub mod nodes;
pub mod queries;
pub mod regenerate;
