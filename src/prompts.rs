//! Prompt text and the lexical refusal check.
//!
//! The system prompt fixes the citation format (`[Material Title, Page X]`)
//! that [`crate::evaluate`] later parses, and the refusal sentence that
//! [`is_refusal`] detects.

use crate::models::{ChatMessage, ChunkMetadata, Role};

pub const SYSTEM_PROMPT: &str = r#"You are a study assistant helping students prepare for technical interviews. Answer questions ONLY from the course materials supplied in the context.

RULES:
1. Use only the provided context. Do not add general knowledge or facts that are not in the context.
2. Cite every factual claim as [Material Title, Page X] or [Material Title, Section Y].
3. If the context does not contain the answer, reply exactly: "I don't have this information in the provided materials."
4. When sources disagree, present each position with its own citation.
5. Never invent citations.
6. Earlier conversation turns may be shown for context. They are not sources and must never be cited.

OUTPUT FORMAT:
- A short, clear answer in bullet points or brief paragraphs.
- Then a "Sources:" section listing every citation used.

Example:
"A binary search tree keeps smaller keys in the left subtree and larger keys in the right subtree [Data Structures Lecture, Page 45]. Search takes O(log n) time on a balanced tree [Algorithms Textbook, Section 3.2].

Sources:
- Data Structures Lecture, Page 45
- Algorithms Textbook, Section 3.2""#;

/// Phrases that mark a self-declared "insufficient evidence" answer.
/// Matched case-insensitively as substrings.
pub const REFUSAL_PHRASES: &[&str] = &[
    "don't have enough information",
    "don't have this information",
    "not in the context you provided",
    "not in the provided materials",
    "not mentioned in the context",
    "cannot find",
    "no information about",
    "context does not contain",
];

/// Whether `answer` is the generator declining to answer.
pub fn is_refusal(answer: &str) -> bool {
    // Curly apostrophes are common in model output.
    let lower = answer.to_lowercase().replace('\u{2019}', "'");
    REFUSAL_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

/// Human-readable citation label: title, plus page if present, else section.
pub fn source_label(metadata: &ChunkMetadata) -> String {
    let title = if metadata.material_title.is_empty() {
        "Unknown"
    } else {
        metadata.material_title.as_str()
    };
    match (&metadata.page, &metadata.section) {
        (Some(page), _) => format!("{}, Page {}", title, page),
        (None, Some(section)) => format!("{}, Section: {}", title, section),
        (None, None) => title.to_string(),
    }
}

/// Numbered context block, one entry per chunk in relevance order.
pub fn render_context<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a ChunkMetadata)>,
{
    entries
        .into_iter()
        .enumerate()
        .map(|(i, (text, metadata))| {
            format!("[Source {}: {}]\n{}\n", i + 1, source_label(metadata), text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Transcript of prior turns, or `None` when there are none.
pub fn render_history(history: &[ChatMessage]) -> Option<String> {
    if history.is_empty() {
        return None;
    }
    let mut out = String::from(
        "Previous conversation (context only, not a citable source):\n",
    );
    for message in history {
        let speaker = match message.role {
            Role::User => "Student",
            Role::Assistant => "Assistant",
        };
        out.push_str(&format!("{}: {}\n", speaker, message.content.trim()));
    }
    Some(out)
}

/// Final user prompt: optional history block, numbered context, the raw
/// question and formatting instructions.
pub fn build_prompt(question: &str, context: &str, history: Option<&str>) -> String {
    let mut prompt = String::new();
    if let Some(history) = history {
        prompt.push_str(history);
        prompt.push('\n');
    }
    prompt.push_str("Context from course materials:\n\n");
    prompt.push_str(context);
    prompt.push_str("\nQuestion: ");
    prompt.push_str(question);
    prompt.push_str(
        "\n\nProvide a clear, concise answer based ONLY on the context above. Include citations for all claims.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(title: &str, page: Option<i64>, section: Option<&str>) -> ChunkMetadata {
        ChunkMetadata {
            material_title: title.to_string(),
            material_type: "lecture".to_string(),
            page,
            section: section.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_refusal_detection() {
        assert!(is_refusal(
            "I don't have enough information in the context you provided."
        ));
        assert!(is_refusal("The CONTEXT DOES NOT CONTAIN that."));
        assert!(is_refusal("I don\u{2019}t have this information in the provided materials."));
        assert!(!is_refusal("A heap is a complete binary tree [Heaps, Page 2]."));
    }

    #[test]
    fn test_source_label_prefers_page() {
        assert_eq!(source_label(&meta("Trees", Some(4), Some("Intro"))), "Trees, Page 4");
        assert_eq!(
            source_label(&meta("Trees", None, Some("Intro"))),
            "Trees, Section: Intro"
        );
        assert_eq!(source_label(&meta("", None, None)), "Unknown");
    }

    #[test]
    fn test_render_context_numbers_entries() {
        let a = meta("Graphs", Some(1), None);
        let b = meta("Heaps", None, None);
        let block = render_context(vec![("BFS uses a queue.", &a), ("Heaps are trees.", &b)]);
        assert!(block.starts_with("[Source 1: Graphs, Page 1]\nBFS uses a queue.\n"));
        assert!(block.contains("[Source 2: Heaps]\nHeaps are trees.\n"));
    }

    #[test]
    fn test_build_prompt_places_history_first() {
        let prompt = build_prompt("What is BFS?", "[Source 1: G]\nx\n", Some("Previous conversation (context only, not a citable source):\nStudent: hi\n"));
        let history_at = prompt.find("Previous conversation").unwrap();
        let context_at = prompt.find("Context from course materials").unwrap();
        let question_at = prompt.find("Question: What is BFS?").unwrap();
        assert!(history_at < context_at && context_at < question_at);
    }

    #[test]
    fn test_render_history_empty() {
        assert!(render_history(&[]).is_none());
    }
}
