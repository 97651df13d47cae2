//! Coordinator process
//!
//! The coordinator is responsible for:
//! - Persisting routing, the snapshot watermark, schema and backups
//! - Serving the client API over HTTP
//! - Wiring the executor engine to the write, schema, load and backup services

pub mod client;
pub mod http;
pub mod metadata;
pub mod server;

pub use client::GraphClient;
pub use server::Coordinator;
