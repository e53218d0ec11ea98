#![forbid(unsafe_code)]

//! Library side of the FilmFilman backend.
//!
//! The binary in `src/bin/backend.rs` only wires configuration and logging;
//! everything the HTTP surface does lives here so it can be driven in-process
//! from tests.

pub mod cache;
pub mod config;
pub mod error;
pub mod proxy;
pub mod rate_limit;
pub mod server;
pub mod upstream;
pub mod video;
