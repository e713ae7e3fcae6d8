//! In-memory [`Store`] implementation for tests and ephemeral runs.
//!
//! Uses `Vec`s and `HashMap`s behind `std::sync::RwLock`. Ids are assigned
//! from simple counters, mirroring SQLite's autoincrement behaviour.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{
    ChatMessage, ChatSession, Chunk, Material, NewMaterial, NewMessage, NewQueryLog, QueryLog,
};

use super::{now_ts, Store};

#[derive(Default)]
struct Tables {
    materials: Vec<Material>,
    chunks: Vec<Chunk>,
    sessions: HashMap<String, ChatSession>,
    messages: Vec<ChatMessage>,
    logs: Vec<QueryLog>,
    next_material_id: i64,
    next_message_id: i64,
    next_log_id: i64,
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_material(&self, material: &NewMaterial) -> Result<Material> {
        let mut t = self.write()?;
        t.next_material_id += 1;
        let stored = Material {
            id: t.next_material_id,
            filename: material.filename.clone(),
            material_type: material.material_type.clone(),
            course: material.course.clone(),
            file_path: material.file_path.clone(),
            chunk_count: 0,
            uploaded_at: now_ts(),
        };
        t.materials.push(stored.clone());
        Ok(stored)
    }

    async fn set_material_chunk_count(&self, material_id: i64, chunk_count: i64) -> Result<()> {
        let mut t = self.write()?;
        if let Some(m) = t.materials.iter_mut().find(|m| m.id == material_id) {
            m.chunk_count = chunk_count;
        }
        Ok(())
    }

    async fn get_material(&self, material_id: i64) -> Result<Option<Material>> {
        let t = self.read()?;
        Ok(t.materials.iter().find(|m| m.id == material_id).cloned())
    }

    async fn list_materials(&self) -> Result<Vec<Material>> {
        Ok(self.read()?.materials.clone())
    }

    async fn delete_material(&self, material_id: i64) -> Result<bool> {
        let mut t = self.write()?;
        let before = t.materials.len();
        t.materials.retain(|m| m.id != material_id);
        if t.materials.len() == before {
            return Ok(false);
        }
        t.chunks.retain(|c| c.material_id != material_id);
        Ok(true)
    }

    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut t = self.write()?;
        for c in chunks {
            t.chunks.retain(|existing| existing.id != c.id);
            t.chunks.push(c.clone());
        }
        Ok(())
    }

    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let t = self.read()?;
        Ok(t.chunks.iter().find(|c| c.id == chunk_id).cloned())
    }

    async fn all_chunks(&self) -> Result<Vec<Chunk>> {
        let mut chunks = self.read()?.chunks.clone();
        chunks.sort_by_key(|c| (c.material_id, c.ordinal));
        Ok(chunks)
    }

    async fn chunks_for_material(&self, material_id: i64) -> Result<Vec<Chunk>> {
        let mut chunks: Vec<Chunk> = self
            .read()?
            .chunks
            .iter()
            .filter(|c| c.material_id == material_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.ordinal);
        Ok(chunks)
    }

    async fn create_session(&self, session: &ChatSession) -> Result<()> {
        let mut t = self.write()?;
        t.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>> {
        Ok(self.read()?.sessions.get(session_id).cloned())
    }

    async fn list_sessions(&self, skip: i64, limit: i64) -> Result<Vec<ChatSession>> {
        let t = self.read()?;
        let mut sessions: Vec<ChatSession> = t.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(sessions
            .into_iter()
            .skip(skip.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn rename_session(&self, session_id: &str, title: &str) -> Result<Option<ChatSession>> {
        let mut t = self.write()?;
        Ok(t.sessions.get_mut(session_id).map(|s| {
            s.title = Some(title.to_string());
            s.clone()
        }))
    }

    async fn append_message(&self, session_id: &str, message: &NewMessage) -> Result<ChatMessage> {
        let mut t = self.write()?;
        let now = now_ts();
        t.next_message_id += 1;
        let stored = ChatMessage {
            id: t.next_message_id,
            session_id: session_id.to_string(),
            role: message.role,
            content: message.content.clone(),
            sources: message.sources.clone(),
            verification: message.verification.clone(),
            created_at: now,
        };
        t.messages.push(stored.clone());
        if let Some(session) = t.sessions.get_mut(session_id) {
            session.updated_at = now;
        }
        Ok(stored)
    }

    async fn session_history(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        let t = self.read()?;
        Ok(t.messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn recent_history(&self, session_id: &str, limit: i64) -> Result<Vec<ChatMessage>> {
        let history = self.session_history(session_id).await?;
        let skip = history.len().saturating_sub(limit.max(0) as usize);
        Ok(history.into_iter().skip(skip).collect())
    }

    async fn insert_query_log(&self, log: &NewQueryLog) -> Result<i64> {
        let mut t = self.write()?;
        t.next_log_id += 1;
        let id = t.next_log_id;
        t.logs.push(QueryLog {
            id,
            created_at: now_ts(),
            question: log.question.clone(),
            answer: log.answer.clone(),
            sources: log.sources.clone(),
            faithfulness_score: log.faithfulness_score,
            verification_status: log.verification_status.clone(),
            filters: log.filters.clone(),
            top_k: log.top_k,
            session_id: log.session_id.clone(),
        });
        Ok(id)
    }

    async fn get_query_log(&self, log_id: i64) -> Result<Option<QueryLog>> {
        let t = self.read()?;
        Ok(t.logs.iter().find(|l| l.id == log_id).cloned())
    }

    async fn recent_query_logs(&self, limit: i64) -> Result<Vec<QueryLog>> {
        let t = self.read()?;
        Ok(t.logs
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn reset(&self) -> Result<()> {
        *self.write()? = Tables::default();
        Ok(())
    }
}
