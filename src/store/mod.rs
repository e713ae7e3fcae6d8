//! Storage abstraction for materials, chunks, chat history and query logs.
//!
//! The [`Store`] trait defines every durable operation the answering
//! pipeline and its surrounding commands need, so the pipeline can be
//! driven by SQLite in production and by [`memory::InMemoryStore`] in tests.
//!
//! Implementations must be `Send + Sync` to be shared across requests.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    ChatMessage, ChatSession, Chunk, Material, NewMaterial, NewMessage, NewQueryLog, QueryLog,
};

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_material`](Store::insert_material) | Register a new material |
/// | [`insert_chunks`](Store::insert_chunks) | Store the chunks of a material |
/// | [`get_chunk`](Store::get_chunk) | Resolve a chunk id from the index |
/// | [`append_message`](Store::append_message) | Append a chat turn and touch the session |
/// | [`recent_history`](Store::recent_history) | Last N turns of a session, oldest first |
/// | [`insert_query_log`](Store::insert_query_log) | Write the audit record of an exchange |
#[async_trait]
pub trait Store: Send + Sync {
    // Materials

    async fn insert_material(&self, material: &NewMaterial) -> Result<Material>;

    async fn set_material_chunk_count(&self, material_id: i64, chunk_count: i64) -> Result<()>;

    async fn get_material(&self, material_id: i64) -> Result<Option<Material>>;

    async fn list_materials(&self) -> Result<Vec<Material>>;

    /// Delete a material and all of its chunks. Returns `false` if the
    /// material did not exist.
    async fn delete_material(&self, material_id: i64) -> Result<bool>;

    // Chunks

    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()>;

    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>>;

    /// Every stored chunk, ordered by material then ordinal.
    async fn all_chunks(&self) -> Result<Vec<Chunk>>;

    async fn chunks_for_material(&self, material_id: i64) -> Result<Vec<Chunk>>;

    // Chat sessions

    async fn create_session(&self, session: &ChatSession) -> Result<()>;

    async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>>;

    /// Sessions ordered by `updated_at` descending.
    async fn list_sessions(&self, skip: i64, limit: i64) -> Result<Vec<ChatSession>>;

    async fn rename_session(&self, session_id: &str, title: &str) -> Result<Option<ChatSession>>;

    /// Append a message and bump the session's `updated_at`.
    async fn append_message(&self, session_id: &str, message: &NewMessage) -> Result<ChatMessage>;

    /// Full history of a session, ascending by creation time.
    async fn session_history(&self, session_id: &str) -> Result<Vec<ChatMessage>>;

    /// The most recent `limit` messages of a session, in chronological order.
    async fn recent_history(&self, session_id: &str, limit: i64) -> Result<Vec<ChatMessage>>;

    // Query logs

    async fn insert_query_log(&self, log: &NewQueryLog) -> Result<i64>;

    async fn get_query_log(&self, log_id: i64) -> Result<Option<QueryLog>>;

    /// Most recent logs first.
    async fn recent_query_logs(&self, limit: i64) -> Result<Vec<QueryLog>>;

    /// Delete every row from every table.
    async fn reset(&self) -> Result<()>;
}

pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
