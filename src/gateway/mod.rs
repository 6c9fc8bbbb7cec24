//! Request gateway: HTTP/WebSocket entry point.
//!
//! - `service`: validation and orchestration (`Gateway`)
//! - `routes`: Axum router and WebSocket forwarding
//! - `model`: request/response bodies
//! - `dashboard`: the HTML status page

pub mod dashboard;
pub mod model;
pub mod routes;
pub mod service;

pub use routes::router;
pub use service::{Gateway, GatewayDeps};
