//! # Prep
//!
//! Grounded question answering over ingested course materials.
//!
//! Materials are chunked, embedded and indexed. A question is answered only
//! from the retrieved chunks, and every generated answer is checked sentence
//! by sentence against those chunks before it is returned. Answers that the
//! sources do not support are replaced by a refusal.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Ingestion   │──▶│ SQLite store │◀──│  Ask pipeline │
//! │ Extract+Chunk│   │ + FlatIndex  │   │ Retrieve+Gen  │
//! └──────────────┘   └──────────────┘   │ +Verify+Score │
//!                                       └──────┬───────┘
//!                      ┌───────────────────────┤
//!                      ▼                       ▼
//!                 ┌──────────┐           ┌──────────┐
//!                 │   CLI    │           │   HTTP   │
//!                 │  (prep)  │           │  (axum)  │
//!                 └──────────┘           └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! prep init
//! prep ingest ./materials --type lecture
//! prep ask "What is the time complexity of heap insert?"
//! prep serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`models`] | Core data types |
//! | [`store`] | Storage trait, SQLite and in-memory backends |
//! | [`db`] / [`migrate`] | Database connection and schema |
//! | [`extract`] / [`chunk`] / [`ingest`] | Material ingestion |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index with atomic rebuilds |
//! | [`reformulate`] / [`filter`] / [`rerank`] / [`context`] | Retrieval stages |
//! | [`generation`] / [`prompts`] | Answer generation |
//! | [`faithfulness`] / [`scorer`] | Verification and decision bands |
//! | [`recorder`] | Query log and chat turn persistence |
//! | [`ask`] | The answering pipeline |
//! | [`chat`] / [`logs`] / [`source`] / [`admin`] / [`evaluate`] | Surrounding operations |
//! | [`services`] | Collaborator wiring |
//! | [`server`] | HTTP API |

pub mod admin;
pub mod ask;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod error;
pub mod evaluate;
pub mod extract;
pub mod faithfulness;
pub mod filter;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod logging;
pub mod logs;
pub mod migrate;
pub mod models;
pub mod prompts;
pub mod recorder;
pub mod reformulate;
pub mod rerank;
pub mod scorer;
pub mod server;
pub mod services;
pub mod source;
pub mod store;
