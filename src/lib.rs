//! Consulator
//!
//! Flattens JSON and YAML trees into slash-joined keys and reconciles them
//! with a Consul KV namespace.

pub mod cli;
pub mod config;
pub mod console;
pub mod document;
pub mod error;
pub mod export;
pub mod flatten;
pub mod ingest;
pub mod keys;
pub mod logging;
pub mod sync;
