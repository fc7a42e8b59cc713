#![forbid(unsafe_code)]

//! Public entry point for the tubegrab crate.
//!
//! The gateway binary wires these modules into an axum server; the terminal
//! client reuses the metadata and format helpers to talk to that server.

pub mod api;
pub mod config;
pub mod error;
pub mod extractor;
pub mod formats;
pub mod metadata;
pub mod mux;
pub mod stream;
pub mod video_ref;
