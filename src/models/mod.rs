//! Request and Response models for the HTTP adapter
//!
//! This module defines the DTOs (Data Transfer Objects) used for
//! serializing/deserializing HTTP request and response bodies.

pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use requests::{GetQuery, PutRequest};
pub use responses::{
    DeleteResponse, GetResponse, HealthResponse, PurgeResponse, PutResponse, StatsResponse,
};
