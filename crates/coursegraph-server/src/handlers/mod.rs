//! HTTP handler modules for the coursegraph API.
//!
//! Each sub-module implements thin handlers that parse requests, resolve the
//! course orchestrator from [`AppState`](crate::state::AppState), delegate
//! to [`CourseService`](crate::service::CourseService), and return JSON
//! responses. Mutating handlers flush the course before responding.

pub mod courses;
pub mod edges;
pub mod events;
pub mod leases;
pub mod nodes;
pub mod propagation;
pub mod queries;
pub mod regenerate;
