//! Best-effort persistence of a finished exchange.
//!
//! Each terminal pipeline branch calls [`record_exchange`] exactly once. A
//! storage failure here never replaces the answer: it is logged and handed
//! back as [`AuditReceipt::error`] for the caller to surface separately.

use crate::models::{NewMessage, NewQueryLog, Role, SourceInfo, VerificationSummary};
use crate::store::Store;

/// What was persisted for one exchange.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditReceipt {
    pub query_log_id: Option<i64>,
    pub error: Option<String>,
}

/// Assistant turn to append when the request belongs to a session.
pub struct AssistantTurn<'a> {
    pub session_id: &'a str,
    pub answer: &'a str,
    pub sources: &'a [SourceInfo],
    pub verification: VerificationSummary,
}

/// Write the query log and, if given, the assistant turn.
///
/// Both writes are attempted even if the first fails.
pub async fn record_exchange(
    store: &dyn Store,
    log: &NewQueryLog,
    turn: Option<AssistantTurn<'_>>,
) -> AuditReceipt {
    let mut receipt = AuditReceipt::default();
    let mut errors = Vec::new();

    match store.insert_query_log(log).await {
        Ok(id) => receipt.query_log_id = Some(id),
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), status = %log.verification_status, "failed to write query log");
            errors.push(format!("query log: {:#}", e));
        }
    }

    if let Some(turn) = turn {
        let message = NewMessage {
            role: Role::Assistant,
            content: turn.answer.to_string(),
            sources: Some(turn.sources.to_vec()),
            verification: Some(turn.verification),
        };
        if let Err(e) = store.append_message(turn.session_id, &message).await {
            tracing::error!(
                error = %format!("{:#}", e),
                session_id = %turn.session_id,
                "failed to append assistant turn"
            );
            errors.push(format!("assistant turn: {:#}", e));
        }
    }

    if !errors.is_empty() {
        receipt.error = Some(errors.join("; "));
    }
    receipt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatSession;
    use crate::store::memory::InMemoryStore;

    fn log() -> NewQueryLog {
        NewQueryLog {
            question: "What is a heap?".to_string(),
            answer: Some("A tree.".to_string()),
            sources: None,
            faithfulness_score: Some(1.0),
            verification_status: "passed".to_string(),
            filters: None,
            top_k: 12,
            session_id: None,
        }
    }

    #[tokio::test]
    async fn test_records_log_and_turn() {
        let store = InMemoryStore::new();
        store
            .create_session(&ChatSession {
                id: "s1".to_string(),
                title: None,
                created_at: 0,
                updated_at: 0,
            })
            .await
            .unwrap();

        let receipt = record_exchange(
            &store,
            &log(),
            Some(AssistantTurn {
                session_id: "s1",
                answer: "A tree.",
                sources: &[],
                verification: VerificationSummary {
                    faithfulness: Some(1.0),
                    status: "passed".to_string(),
                },
            }),
        )
        .await;

        assert_eq!(receipt.query_log_id, Some(1));
        assert!(receipt.error.is_none());
        let history = store.session_history("s1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::Assistant);
        assert_eq!(history[0].verification.as_ref().unwrap().status, "passed");
    }
}
