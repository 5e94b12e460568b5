//! # Campus RAG Core
//!
//! Runtime-agnostic retrieval-and-context pipeline: data models, chunking,
//! cache snapshots, the index and embedding collaborator traits, query
//! preprocessing, hybrid retrieval, context assembly, and session state.
//!
//! This crate contains no tokio, filesystem I/O, or network code. Concrete
//! collaborators (S3, SQLite, HTTP embedding providers) live in the
//! `campus-rag` app crate.

pub mod cache;
pub mod chunk;
pub mod context;
pub mod embedding;
pub mod error;
pub mod models;
pub mod preprocess;
pub mod search;
pub mod session;
pub mod store;

pub use error::{RagError, Result};
