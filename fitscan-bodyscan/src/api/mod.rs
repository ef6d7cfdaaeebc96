//! HTTP API handlers for fitscan-bodyscan

pub mod health;
pub mod scans;
pub mod sse;

pub use health::health_routes;
pub use scans::scan_routes;
pub use sse::event_routes;
