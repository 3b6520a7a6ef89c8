//! API Module
//!
//! Thin HTTP adapter over the store. Holds no storage logic of its own.
//!
//! # Endpoints
//! - `GET /get/:key` - Read a value, `?consistent=true` for a master read
//! - `PUT /put` - Upsert a key-value pair
//! - `DELETE /delete/:key` - Logically delete a key
//! - `POST /purge` - Run an expiry sweep
//! - `GET /stats` - Engine counters
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
