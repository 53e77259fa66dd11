#![forbid(unsafe_code)]

//! Aggregation proxy in front of the YouTube Data API.
//!
//! Clients page through results with plain integers; the [`cursor_cache`]
//! module remembers which upstream continuation cursor each virtual page maps
//! to. The binary in `src/bin/backend.rs` wires everything behind axum.

pub mod aggregate;
pub mod config;
pub mod cursor_cache;
pub mod normalize;
pub mod routes;
pub mod upstream;
