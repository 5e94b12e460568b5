//! # Campus RAG
//!
//! Retrieval-augmented question answering over a university document corpus.
//!
//! The retrieval-and-context core (chunking, hybrid retrieval, context
//! assembly, session state) lives in `campus-rag-core`. This crate supplies
//! the concrete collaborators around it and the `rag` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌───────────┐
//! │  Storage    │──▶│  Pipeline         │──▶│  SQLite    │
//! │  S3 / FS    │   │ Cache+Chunk+Embed │   │ FTS5+Vec   │
//! └─────────────┘   └──────────────────┘   └─────┬─────┘
//!                                                │
//!                      ┌─────────────────────────┤
//!                      ▼                         ▼
//!                 ┌──────────┐            ┌────────────┐
//!                 │  Search  │            │ ChatService│──▶ LLM
//!                 │  (rag)   │            │ ask / chat │
//!                 └──────────┘            └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`storage`] | S3 and filesystem document sources |
//! | [`extract`] | PDF / DOCX / text extraction |
//! | [`embedding`] | Embedding providers |
//! | [`generation`] | Chat-completions client and prompts |
//! | [`translate`] | Query translation via the language model |
//! | [`sqlite_index`] | SQLite index backend |
//! | [`cache`] | Processed-documents cache file |
//! | [`indexer`] | Batch embed + upsert |
//! | [`pipeline`] | Startup indexing pipeline |
//! | [`chat`] | Conversation service |
//! | [`retry`] | Exponential backoff |

pub mod app;
pub mod cache;
pub mod chat;
pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod indexer;
pub mod pipeline;
pub mod retry;
pub mod sqlite_index;
pub mod storage;
pub mod translate;
