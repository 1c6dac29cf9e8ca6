//! # Adaptive RAG
//!
//! A retrieval-augmented question-answering service that routes each
//! question by intent before answering it.
//!
//! Uploaded documents are extracted, chunked and indexed with both a dense
//! embedding and a BM25-style sparse encoding. At query time an LLM
//! classifier (with a keyword fallback) picks one of four routes: answer
//! from conversation memory, search the web, search the documents, or ask
//! the user to be more specific.
//!
//! ## Architecture
//!
//! ```text
//!  upload ─▶ extract ─▶ chunk ─▶ embed (dense + sparse) ─▶ ┌────────────┐
//!                                                          │ VectorStore │
//!  query ─▶ classify ─▶ route ─┬─ memory ─▶ LLM            └─────┬──────┘
//!                              ├─ web search ─▶ LLM              │
//!                              ├─ hybrid search ◀────────────────┘ ─▶ LLM
//!                              └─ guidance
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! arag init                          # create the SQLite schema
//! arag ingest report.pdf notes.txt   # index local files
//! arag ask "What does the report say about revenue?"
//! arag serve                         # start the HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Caller-visible error taxonomy |
//! | [`embedding`] | Dense embedding providers |
//! | [`llm`] | Chat model client |
//! | [`websearch`] | Web search client |
//! | [`extract`] | Text extraction from uploaded files |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`retrieval`] | Hybrid retrieval engine |
//! | [`classifier`] | LLM query classifier with fallback |
//! | [`router`] | Adaptive router state machine |
//! | [`ingest`] | Ingestion pipeline |
//! | [`gate`] | Clear vs. ingest/query exclusion |
//! | [`service`] | Service assembly |
//! | [`server`] | HTTP server |

pub mod classifier;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod gate;
pub mod http;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod retrieval;
pub mod router;
pub mod server;
pub mod service;
pub mod sqlite_store;
pub mod websearch;
