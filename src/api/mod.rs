//! API Module
//!
//! HTTP handlers and routing for the cache admin REST API.
//!
//! # Endpoints
//! - `PUT /items` - Cache a JSON value with expiration and dependent sets
//! - `GET /items/:key` - Read a live value
//! - `DELETE /items/:key` - Invalidate one item
//! - `POST /sets/invalidate` - Invalidate every item in the given sets
//! - `POST /purge` - Remove expired entries now
//! - `POST /flush` - Flush the whole store (requires `ALLOW_ADMIN`)
//! - `GET /stats` - Engine counters and key count
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
