//! SQLite-backed [`Store`] implementation.
//!
//! Maps each [`Store`] operation onto the schema created by
//! [`crate::migrate`]. JSON columns are (de)serialized with `serde_json` at
//! the row boundary so callers only ever see typed models.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::models::{
    ChatMessage, ChatSession, Chunk, Material, NewMaterial, NewMessage, NewQueryLog, QueryLog,
    Role,
};

use super::{now_ts, Store};

/// SQLite implementation of the [`Store`] trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `path` and ensure the schema exists.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = crate::db::connect_path(path).await?;
        crate::migrate::migrate_pool(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn opt_to_json<T: Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value.as_ref().map(to_json).transpose()
}

fn opt_from_json<T: DeserializeOwned>(raw: Option<String>, column: &str) -> Result<Option<T>> {
    raw.map(|s| {
        serde_json::from_str(&s).with_context(|| format!("Corrupt JSON in column {}", column))
    })
    .transpose()
}

fn material_from_row(row: &SqliteRow) -> Material {
    Material {
        id: row.get("id"),
        filename: row.get("filename"),
        material_type: row.get("material_type"),
        course: row.get("course"),
        file_path: row.get("file_path"),
        chunk_count: row.get("chunk_count"),
        uploaded_at: row.get("uploaded_at"),
    }
}

fn chunk_from_row(row: &SqliteRow) -> Result<Chunk> {
    let metadata_json: String = row.get("metadata_json");
    Ok(Chunk {
        id: row.get("id"),
        material_id: row.get("material_id"),
        ordinal: row.get("ordinal"),
        text: row.get("text"),
        metadata: serde_json::from_str(&metadata_json)
            .context("Corrupt JSON in column metadata_json")?,
    })
}

fn session_from_row(row: &SqliteRow) -> ChatSession {
    ChatSession {
        id: row.get("id"),
        title: row.get("title"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn message_from_row(row: &SqliteRow) -> Result<ChatMessage> {
    let role: String = row.get("role");
    Ok(ChatMessage {
        id: row.get("id"),
        session_id: row.get("session_id"),
        role: Role::parse(&role).with_context(|| format!("Unknown message role: {}", role))?,
        content: row.get("content"),
        sources: opt_from_json(row.get("sources_json"), "sources_json")?,
        verification: opt_from_json(row.get("verification_json"), "verification_json")?,
        created_at: row.get("created_at"),
    })
}

fn log_from_row(row: &SqliteRow) -> Result<QueryLog> {
    Ok(QueryLog {
        id: row.get("id"),
        created_at: row.get("created_at"),
        question: row.get("question"),
        answer: row.get("answer"),
        sources: opt_from_json(row.get("sources_json"), "sources_json")?,
        faithfulness_score: row.get("faithfulness_score"),
        verification_status: row.get("verification_status"),
        filters: opt_from_json(row.get("filters_json"), "filters_json")?,
        top_k: row.get("top_k"),
        session_id: row.get("session_id"),
    })
}

const MESSAGE_COLUMNS: &str =
    "id, session_id, role, content, sources_json, verification_json, created_at";

const LOG_COLUMNS: &str = "id, created_at, question, answer, sources_json, faithfulness_score, \
     verification_status, filters_json, top_k, session_id";

#[async_trait]
impl Store for SqliteStore {
    async fn insert_material(&self, material: &NewMaterial) -> Result<Material> {
        let uploaded_at = now_ts();
        let result = sqlx::query(
            r#"
            INSERT INTO materials (filename, material_type, course, file_path, chunk_count, uploaded_at)
            VALUES (?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(&material.filename)
        .bind(&material.material_type)
        .bind(&material.course)
        .bind(&material.file_path)
        .bind(uploaded_at)
        .execute(&self.pool)
        .await?;

        Ok(Material {
            id: result.last_insert_rowid(),
            filename: material.filename.clone(),
            material_type: material.material_type.clone(),
            course: material.course.clone(),
            file_path: material.file_path.clone(),
            chunk_count: 0,
            uploaded_at,
        })
    }

    async fn set_material_chunk_count(&self, material_id: i64, chunk_count: i64) -> Result<()> {
        sqlx::query("UPDATE materials SET chunk_count = ? WHERE id = ?")
            .bind(chunk_count)
            .bind(material_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_material(&self, material_id: i64) -> Result<Option<Material>> {
        let row = sqlx::query("SELECT * FROM materials WHERE id = ?")
            .bind(material_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(material_from_row))
    }

    async fn list_materials(&self) -> Result<Vec<Material>> {
        let rows = sqlx::query("SELECT * FROM materials ORDER BY uploaded_at DESC, id DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(material_from_row).collect())
    }

    async fn delete_material(&self, material_id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE material_id = ?")
            .bind(material_id)
            .execute(&mut *tx)
            .await?;

        let deleted = sqlx::query("DELETE FROM materials WHERE id = ?")
            .bind(material_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, material_id, ordinal, text, metadata_json)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    material_id = excluded.material_id,
                    ordinal = excluded.ordinal,
                    text = excluded.text,
                    metadata_json = excluded.metadata_json
                "#,
            )
            .bind(&chunk.id)
            .bind(chunk.material_id)
            .bind(chunk.ordinal)
            .bind(&chunk.text)
            .bind(to_json(&chunk.metadata)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let row = sqlx::query(
            "SELECT id, material_id, ordinal, text, metadata_json FROM chunks WHERE id = ?",
        )
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(chunk_from_row).transpose()
    }

    async fn all_chunks(&self) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT id, material_id, ordinal, text, metadata_json FROM chunks ORDER BY material_id, ordinal",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(chunk_from_row).collect()
    }

    async fn chunks_for_material(&self, material_id: i64) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            "SELECT id, material_id, ordinal, text, metadata_json FROM chunks WHERE material_id = ? ORDER BY ordinal",
        )
        .bind(material_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(chunk_from_row).collect()
    }

    async fn create_session(&self, session: &ChatSession) -> Result<()> {
        sqlx::query(
            "INSERT INTO chat_sessions (id, title, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.title)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>> {
        let row = sqlx::query("SELECT * FROM chat_sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(session_from_row))
    }

    async fn list_sessions(&self, skip: i64, limit: i64) -> Result<Vec<ChatSession>> {
        let rows = sqlx::query(
            "SELECT * FROM chat_sessions ORDER BY updated_at DESC, id ASC LIMIT ? OFFSET ?",
        )
        .bind(limit.max(0))
        .bind(skip.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(session_from_row).collect())
    }

    async fn rename_session(&self, session_id: &str, title: &str) -> Result<Option<ChatSession>> {
        let updated = sqlx::query("UPDATE chat_sessions SET title = ? WHERE id = ?")
            .bind(title)
            .bind(session_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Ok(None);
        }
        self.get_session(session_id).await
    }

    async fn append_message(&self, session_id: &str, message: &NewMessage) -> Result<ChatMessage> {
        let now = now_ts();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO chat_messages (session_id, role, content, sources_json, verification_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(opt_to_json(&message.sources)?)
        .bind(opt_to_json(&message.verification)?)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE chat_sessions SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(ChatMessage {
            id: result.last_insert_rowid(),
            session_id: session_id.to_string(),
            role: message.role,
            content: message.content.clone(),
            sources: message.sources.clone(),
            verification: message.verification.clone(),
            created_at: now,
        })
    }

    async fn session_history(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let sql = format!(
            "SELECT {} FROM chat_messages WHERE session_id = ? ORDER BY created_at ASC, id ASC",
            MESSAGE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn recent_history(&self, session_id: &str, limit: i64) -> Result<Vec<ChatMessage>> {
        let sql = format!(
            "SELECT {} FROM chat_messages WHERE session_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
            MESSAGE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(session_id)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        let mut messages = rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn insert_query_log(&self, log: &NewQueryLog) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO query_logs (created_at, question, answer, sources_json, faithfulness_score,
                                    verification_status, filters_json, top_k, session_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(now_ts())
        .bind(&log.question)
        .bind(&log.answer)
        .bind(opt_to_json(&log.sources)?)
        .bind(log.faithfulness_score)
        .bind(&log.verification_status)
        .bind(opt_to_json(&log.filters)?)
        .bind(log.top_k)
        .bind(&log.session_id)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn get_query_log(&self, log_id: i64) -> Result<Option<QueryLog>> {
        let sql = format!("SELECT {} FROM query_logs WHERE id = ?", LOG_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(log_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(log_from_row).transpose()
    }

    async fn recent_query_logs(&self, limit: i64) -> Result<Vec<QueryLog>> {
        let sql = format!(
            "SELECT {} FROM query_logs ORDER BY created_at DESC, id DESC LIMIT ?",
            LOG_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(log_from_row).collect()
    }

    async fn reset(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in [
            "chat_messages",
            "chat_sessions",
            "query_logs",
            "chunks",
            "materials",
        ] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
