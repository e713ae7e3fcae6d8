//! Core data models used throughout the answering pipeline.
//!
//! These types represent the materials, chunks, chat history and audit
//! records that flow between the store, the retrieval stages, and the
//! response returned to callers.

use serde::{Deserialize, Serialize};

/// An uploaded course material. Owns zero or more [`Chunk`]s.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Material {
    pub id: i64,
    pub filename: String,
    pub material_type: String,
    pub course: Option<String>,
    pub file_path: String,
    pub chunk_count: i64,
    /// Unix seconds.
    pub uploaded_at: i64,
}

/// Fields supplied when a material is first registered.
#[derive(Debug, Clone, Default)]
pub struct NewMaterial {
    pub filename: String,
    pub material_type: String,
    pub course: Option<String>,
    pub file_path: String,
}

/// Per-chunk metadata, serialized as JSON in the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub material_title: String,
    pub material_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lecture_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

/// Immutable unit of retrievable text.
///
/// `id` is the join key between the vector index and the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub material_id: i64,
    pub ordinal: i64,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// A chunk paired with the score assigned by the most recent ranking stage.
///
/// After vector search the score is an inner product of unit vectors; after
/// reranking it is a cross-encoder relevance score on an unrelated scale.
#[derive(Debug, Clone)]
pub struct RankedChunk {
    pub chunk: Chunk,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatSession {
    pub id: String,
    pub title: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// Compact verification outcome attached to assistant messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationSummary {
    pub faithfulness: Option<f64>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationSummary>,
    pub created_at: i64,
}

/// Fields supplied when appending a message to a session.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub sources: Option<Vec<SourceInfo>>,
    pub verification: Option<VerificationSummary>,
}

impl NewMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            sources: None,
            verification: None,
        }
    }
}

/// A cited source as reported to callers and written to audit records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceInfo {
    pub chunk_id: String,
    pub material_id: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub material_type: String,
    pub score: f64,
}

/// Metadata predicates applied to retrieval candidates. Absent fields are
/// no-ops; present fields are ANDed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lecture_number: Option<i64>,
    /// Case-insensitive substring match against the chunk's topic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material_ids: Option<Vec<i64>>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self.material_type.is_none()
            && self.lecture_number.is_none()
            && self.topic.is_none()
            && self.material_ids.is_none()
    }
}

/// Durable audit record of one question/answer exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryLog {
    pub id: i64,
    pub created_at: i64,
    pub question: String,
    pub answer: Option<String>,
    pub sources: Option<Vec<SourceInfo>>,
    pub faithfulness_score: Option<f64>,
    pub verification_status: String,
    pub filters: Option<QueryFilters>,
    pub top_k: i64,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewQueryLog {
    pub question: String,
    pub answer: Option<String>,
    pub sources: Option<Vec<SourceInfo>>,
    pub faithfulness_score: Option<f64>,
    pub verification_status: String,
    pub filters: Option<QueryFilters>,
    pub top_k: i64,
    pub session_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_skips_absent_fields() {
        let meta = ChunkMetadata {
            material_title: "Graphs".to_string(),
            material_type: "lecture".to_string(),
            page: Some(3),
            ..Default::default()
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["page"], 3);
        assert!(json.get("section").is_none());
        assert!(json.get("topic").is_none());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("user"), Some(Role::User));
        assert_eq!(Role::parse("assistant"), Some(Role::Assistant));
        assert_eq!(Role::parse("system"), None);
        assert_eq!(Role::Assistant.as_str(), "assistant");
    }

    #[test]
    fn test_filters_empty() {
        assert!(QueryFilters::default().is_empty());
        let f = QueryFilters {
            topic: Some("trees".to_string()),
            ..Default::default()
        };
        assert!(!f.is_empty());
    }
}
