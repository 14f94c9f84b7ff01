//! HTTP server module
//!
//! Routing and handlers for the playback surface (`/hdl/<path>[.flv]` and
//! bare `/<path>[.flv]`) and the control plane (`/api/hdl/list`,
//! `/api/hdl/pull`).

pub mod handlers;
pub mod routes;

pub use routes::create_router;
