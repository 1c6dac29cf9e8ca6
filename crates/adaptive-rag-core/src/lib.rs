//! # Adaptive RAG Core
//!
//! Runtime-agnostic logic for the adaptive RAG service: data models,
//! chunking, sparse (BM25) encoding, the embedder and vector store
//! capabilities, hybrid fusion, query categories with the deterministic
//! fallback classifier, and conversation memory.
//!
//! This crate contains no tokio, HTTP client, database, or filesystem I/O.
//! Providers and the service itself live in the `adaptive-rag` app crate.

pub mod chunk;
pub mod classify;
pub mod embedding;
pub mod memory;
pub mod models;
pub mod search;
pub mod sparse;
pub mod store;
