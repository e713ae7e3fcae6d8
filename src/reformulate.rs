//! History-aware retrieval query construction.
//!
//! The retrieval query is used for vector search and reranking only; the
//! generator always receives the raw question.

use crate::models::{ChatMessage, Role};

/// Build the retrieval query from `question` and chronological `history`.
///
/// If the last history entry is a user turn equal to `question` (the echo
/// persisted on entry) it is dropped first. The last `max_turns` remaining
/// user turns are then appended after the question, oldest first.
pub fn retrieval_query(question: &str, history: &[ChatMessage], max_turns: usize) -> String {
    let prior = strip_echo(question, history);

    let user_turns: Vec<&str> = prior
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .collect();
    let start = user_turns.len().saturating_sub(max_turns);

    let mut parts = Vec::with_capacity(1 + user_turns.len() - start);
    parts.push(question);
    parts.extend_from_slice(&user_turns[start..]);
    parts.join(" ")
}

/// `history` without a trailing user echo of `question`.
pub fn strip_echo<'a>(question: &str, history: &'a [ChatMessage]) -> &'a [ChatMessage] {
    match history.last() {
        Some(last) if last.role == Role::User && last.content == question => {
            &history[..history.len() - 1]
        }
        _ => history,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: Role, content: &str) -> ChatMessage {
        ChatMessage {
            id: 0,
            session_id: "s".to_string(),
            role,
            content: content.to_string(),
            sources: None,
            verification: None,
            created_at: 0,
        }
    }

    #[test]
    fn test_no_history_is_question() {
        assert_eq!(retrieval_query("What is a heap?", &[], 3), "What is a heap?");
    }

    #[test]
    fn test_drops_trailing_echo_and_keeps_last_user_turns() {
        let history = vec![
            msg(Role::User, "one"),
            msg(Role::Assistant, "answer one"),
            msg(Role::User, "two"),
            msg(Role::User, "three"),
            msg(Role::User, "four"),
            msg(Role::User, "current"),
        ];
        assert_eq!(retrieval_query("current", &history, 3), "current two three four");
    }

    #[test]
    fn test_only_exact_trailing_echo_is_dropped() {
        let history = vec![msg(Role::User, "Current?"), msg(Role::Assistant, "a")];
        assert_eq!(retrieval_query("Current?", &history, 3), "Current? Current?");

        let history = vec![msg(Role::User, "current ")];
        assert_eq!(retrieval_query("current", &history, 3), "current current ");
    }

    #[test]
    fn test_echo_removal_is_idempotent() {
        let with_echo = vec![msg(Role::User, "earlier"), msg(Role::User, "q")];
        let without = vec![msg(Role::User, "earlier")];
        assert_eq!(
            retrieval_query("q", &with_echo, 3),
            retrieval_query("q", &without, 3)
        );
    }

    #[test]
    fn test_assistant_turns_ignored() {
        let history = vec![msg(Role::Assistant, "ignored"), msg(Role::User, "kept")];
        assert_eq!(retrieval_query("q", &history, 3), "q kept");
    }
}
