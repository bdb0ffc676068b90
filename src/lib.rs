//! Ephemera Server Library
//!
//! Ephemeral file hosting: resumable chunked uploads, size-based retention
//! and a background sweeper that evicts expired content.
//!
//! # Modules
//!
//! - `upload`: chunked upload sessions, chunk storage and finalization
//! - `retention`: retention policy and the expiration sweeper
//! - `catalog` / `db`: the resource catalog and its SQLite implementation
//! - `routes`: the axum HTTP surface

pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod ids;
pub mod retention;
pub mod routes;
pub mod state;
pub mod upload;
