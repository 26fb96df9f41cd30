//! API Module
//!
//! HTTP handlers and routing for the admin surface over the cache.
//!
//! # Endpoints
//! - `GET /health` - Health check endpoint
//! - `GET /stats` - Cache statistics
//! - `DELETE /cache` - Drop every cached entry
//! - `GET /locks` - Locked resources
//! - `GET /locks/:resource` - Lock state of one resource

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
