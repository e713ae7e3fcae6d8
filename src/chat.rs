//! Chat session management.
//!
//! Sessions group a sequence of questions so that follow-ups are retrieved
//! with the earlier turns in mind. Messages themselves are appended by the
//! answering pipeline; this module only creates, lists, renames and reads
//! sessions. Used by the `prep chat` commands and the `/chat/sessions`
//! endpoints.

use anyhow::{bail, Result};
use serde::Deserialize;

use crate::models::{ChatMessage, ChatSession};
use crate::store::{now_ts, Store};

/// Body of `POST /chat/sessions`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewSession {
    #[serde(default)]
    pub title: Option<String>,
}

/// Title given to sessions created without one.
pub fn default_title(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| format!("Chat {}", dt.format("%Y-%m-%d %H:%M")))
        .unwrap_or_else(|| "Chat".to_string())
}

pub async fn create_session(store: &dyn Store, title: Option<String>) -> Result<ChatSession> {
    let now = now_ts();
    let title = match title.map(|t| t.trim().to_string()) {
        Some(t) if !t.is_empty() => t,
        _ => default_title(now),
    };
    let session = ChatSession {
        id: uuid::Uuid::new_v4().to_string(),
        title: Some(title),
        created_at: now,
        updated_at: now,
    };
    store.create_session(&session).await?;
    tracing::info!(session_id = %session.id, "chat session created");
    Ok(session)
}

/// Most recently active sessions first.
pub async fn list_sessions(store: &dyn Store, skip: i64, limit: i64) -> Result<Vec<ChatSession>> {
    if skip < 0 || limit < 0 {
        bail!("invalid paging: skip and limit must be non-negative");
    }
    store.list_sessions(skip, limit).await
}

pub async fn get_session(store: &dyn Store, session_id: &str) -> Result<Option<ChatSession>> {
    store.get_session(session_id).await
}

/// Full history of a session, oldest first. `None` if the session does
/// not exist.
pub async fn session_history(
    store: &dyn Store,
    session_id: &str,
) -> Result<Option<Vec<ChatMessage>>> {
    if store.get_session(session_id).await?.is_none() {
        return Ok(None);
    }
    Ok(Some(store.session_history(session_id).await?))
}

pub async fn rename_session(
    store: &dyn Store,
    session_id: &str,
    title: &str,
) -> Result<Option<ChatSession>> {
    let title = title.trim();
    if title.is_empty() {
        bail!("title must not be empty");
    }
    store.rename_session(session_id, title).await
}

// CLI entry points

pub async fn run_new(store: &dyn Store, title: Option<String>) -> Result<()> {
    let session = create_session(store, title).await?;
    println!("{}", session.id);
    println!("title: {}", session.title.as_deref().unwrap_or(""));
    Ok(())
}

pub async fn run_list(store: &dyn Store, limit: i64) -> Result<()> {
    let sessions = list_sessions(store, 0, limit).await?;
    if sessions.is_empty() {
        println!("No chat sessions.");
        return Ok(());
    }
    println!("{:<38} {:<20} TITLE", "ID", "UPDATED");
    for s in &sessions {
        println!(
            "{:<38} {:<20} {}",
            s.id,
            format_ts(s.updated_at),
            s.title.as_deref().unwrap_or("(untitled)")
        );
    }
    Ok(())
}

pub async fn run_history(store: &dyn Store, session_id: &str) -> Result<()> {
    let Some(messages) = session_history(store, session_id).await? else {
        bail!("chat session not found: {}", session_id);
    };
    for m in &messages {
        println!("[{}] {}", format_ts(m.created_at), m.role.as_str());
        println!("{}", m.content);
        if let Some(v) = &m.verification {
            match v.faithfulness {
                Some(score) => println!("  ({}, faithfulness {:.2})", v.status, score),
                None => println!("  ({})", v.status),
            }
        }
        println!();
    }
    Ok(())
}

pub async fn run_rename(store: &dyn Store, session_id: &str, title: &str) -> Result<()> {
    match rename_session(store, session_id, title).await? {
        Some(s) => {
            println!("Renamed {} to \"{}\"", s.id, s.title.as_deref().unwrap_or(""));
            Ok(())
        }
        None => bail!("chat session not found: {}", session_id),
    }
}

pub(crate) fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    #[test]
    fn test_default_title_format() {
        // 2024-03-05 14:07:00 UTC
        assert_eq!(default_title(1_709_647_620), "Chat 2024-03-05 14:07");
    }

    #[tokio::test]
    async fn test_create_uses_default_title_when_blank() {
        let store = InMemoryStore::new();
        let s = create_session(&store, Some("   ".to_string())).await.unwrap();
        assert!(s.title.unwrap().starts_with("Chat "));
        assert_eq!(s.id.len(), 36);
    }

    #[tokio::test]
    async fn test_rename_rejects_empty_and_reports_missing() {
        let store = InMemoryStore::new();
        let s = create_session(&store, Some("Graphs".to_string()))
            .await
            .unwrap();

        assert!(rename_session(&store, &s.id, "  ").await.is_err());
        assert!(rename_session(&store, "missing", "x").await.unwrap().is_none());

        let renamed = rename_session(&store, &s.id, "Trees").await.unwrap().unwrap();
        assert_eq!(renamed.title.as_deref(), Some("Trees"));
    }

    #[tokio::test]
    async fn test_history_of_missing_session_is_none() {
        let store = InMemoryStore::new();
        assert!(session_history(&store, "nope").await.unwrap().is_none());
    }
}
