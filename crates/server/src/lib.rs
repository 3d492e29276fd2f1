//! Fleet monitoring backend.
//!
//! Agents push host status reports and process snapshots; dashboards read
//! host/process/event state and manage per-process detection configuration.
//! Exposed as a library so integration tests can drive the router
//! in-process.

pub mod api;
pub mod db;
pub mod detection_store;
pub mod event_log;
pub mod host_registry;
pub mod identity;
pub mod reconciler;

pub use api::{build_router, build_test_router, AppState, SharedState};
pub use db::Database;
pub use reconciler::{ReconcileOutcome, Replacement};
