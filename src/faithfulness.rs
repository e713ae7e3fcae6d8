//! Sentence-level faithfulness verification.
//!
//! An answer is split into sentences (citation markers removed first), and
//! each sentence is compared by cosine similarity against every context
//! chunk. A sentence is supported when its best match reaches the
//! configured threshold. The score is the supported fraction, defined as
//! `1.0` when the answer has no checkable sentences.

use std::sync::Arc;

use anyhow::{bail, Result};
use regex::Regex;
use serde::Serialize;

use crate::config::VerificationConfig;
use crate::embedding::{dot, embed_in_batches, normalize, EmbeddingProvider};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SentenceCheck {
    pub sentence: String,
    pub supported: bool,
    pub max_similarity: f32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VerificationReport {
    pub total_sentences: usize,
    pub supported_sentences: usize,
    pub faithfulness_score: f64,
    pub unsupported_sentences: Vec<String>,
    pub details: Vec<SentenceCheck>,
}

impl VerificationReport {
    fn from_checks(details: Vec<SentenceCheck>) -> Self {
        let total = details.len();
        let supported = details.iter().filter(|d| d.supported).count();
        let unsupported_sentences = details
            .iter()
            .filter(|d| !d.supported)
            .map(|d| d.sentence.clone())
            .collect();
        let faithfulness_score = if total == 0 {
            1.0
        } else {
            supported as f64 / total as f64
        };
        Self {
            total_sentences: total,
            supported_sentences: supported,
            faithfulness_score,
            unsupported_sentences,
            details,
        }
    }
}

/// Splits answers into checkable sentences.
///
/// `[...]` citation markers are stripped first, then the text is split on
/// sentence-ending punctuation followed by whitespace. Trimmed fragments
/// shorter than `min_chars` characters are discarded.
pub struct SentenceSplitter {
    citation: Regex,
    boundary: Regex,
    min_chars: usize,
}

impl SentenceSplitter {
    pub fn new(min_chars: usize) -> Result<Self> {
        Ok(Self {
            citation: Regex::new(r"\[[^\]]+\]")?,
            boundary: Regex::new(r"[.!?]\s+")?,
            min_chars,
        })
    }

    pub fn split(&self, answer: &str) -> Vec<String> {
        let text = self.citation.replace_all(answer, "");

        let mut pieces = Vec::new();
        let mut start = 0;
        for m in self.boundary.find_iter(&text) {
            // Punctuation is ASCII, so the sentence ends one byte into the match.
            pieces.push(&text[start..m.start() + 1]);
            start = m.end();
        }
        pieces.push(&text[start..]);

        pieces
            .into_iter()
            .map(str::trim)
            .filter(|s| !s.is_empty() && s.chars().count() >= self.min_chars)
            .map(String::from)
            .collect()
    }
}

pub struct FaithfulnessVerifier {
    embedder: Arc<dyn EmbeddingProvider>,
    splitter: SentenceSplitter,
    similarity_threshold: f32,
    batch_size: usize,
}

impl FaithfulnessVerifier {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        config: &VerificationConfig,
        batch_size: usize,
    ) -> Result<Self> {
        Ok(Self {
            embedder,
            splitter: SentenceSplitter::new(config.min_sentence_chars)?,
            similarity_threshold: config.similarity_threshold,
            batch_size,
        })
    }

    /// Score `answer` against the texts of the chunks it was generated from.
    pub async fn verify(&self, answer: &str, context: &[String]) -> Result<VerificationReport> {
        let sentences = self.splitter.split(answer);
        if sentences.is_empty() {
            return Ok(VerificationReport::from_checks(Vec::new()));
        }

        if context.is_empty() {
            let details = sentences
                .into_iter()
                .map(|sentence| SentenceCheck {
                    sentence,
                    supported: false,
                    max_similarity: 0.0,
                })
                .collect();
            return Ok(VerificationReport::from_checks(details));
        }

        let sentence_vecs =
            embed_in_batches(self.embedder.as_ref(), &sentences, self.batch_size).await?;
        let context_vecs =
            embed_in_batches(self.embedder.as_ref(), context, self.batch_size).await?;
        if sentence_vecs.len() != sentences.len() || context_vecs.len() != context.len() {
            bail!("embedding count mismatch during verification");
        }
        let context_vecs: Vec<Vec<f32>> = context_vecs.into_iter().map(normalize).collect();

        let details = sentences
            .into_iter()
            .zip(sentence_vecs)
            .map(|(sentence, vector)| {
                let vector = normalize(vector);
                let max_similarity = context_vecs
                    .iter()
                    .map(|c| dot(&vector, c))
                    .fold(f32::NEG_INFINITY, f32::max);
                SentenceCheck {
                    sentence,
                    supported: max_similarity >= self.similarity_threshold,
                    max_similarity,
                }
            })
            .collect();

        let report = VerificationReport::from_checks(details);
        tracing::debug!(
            sentences = report.total_sentences,
            supported = report.supported_sentences,
            score = report.faithfulness_score,
            "faithfulness verified"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Maps each text to a one-hot vector on the first keyword it contains.
    struct KeywordEmbedder;

    const KEYWORDS: &[&str] = &["heap", "graph", "sort"];

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keyword"
        }
        fn dims(&self) -> usize {
            KEYWORDS.len() + 1
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let lower = t.to_lowercase();
                    let mut v = vec![0.0; KEYWORDS.len() + 1];
                    let slot = KEYWORDS
                        .iter()
                        .position(|k| lower.contains(k))
                        .unwrap_or(KEYWORDS.len());
                    v[slot] = 1.0;
                    v
                })
                .collect())
        }
    }

    fn verifier() -> FaithfulnessVerifier {
        FaithfulnessVerifier::new(Arc::new(KeywordEmbedder), &VerificationConfig::default(), 8)
            .unwrap()
    }

    #[test]
    fn test_split_strips_citations_and_short_fragments() {
        let answer = "A heap is a tree [Heaps, Page 2]. Ok. Graphs have edges! Why?\nSorting is fun";
        let sentences = SentenceSplitter::new(10).unwrap().split(answer);
        assert_eq!(
            sentences,
            vec!["A heap is a tree .", "Graphs have edges!", "Sorting is fun"]
        );
    }

    #[test]
    fn test_exactly_min_chars_is_kept() {
        let splitter = SentenceSplitter::new(10).unwrap();
        assert_eq!(splitter.split("abcdefghi."), vec!["abcdefghi."]);
        assert!(splitter.split("abcdefgh.").is_empty());
    }

    #[tokio::test]
    async fn test_no_sentences_scores_one() {
        let report = verifier().verify("[Only, Page 1]", &["heap".into()]).await.unwrap();
        assert_eq!(report.faithfulness_score, 1.0);
        assert_eq!(report.total_sentences, 0);
        assert_eq!(report.supported_sentences, 0);
    }

    #[tokio::test]
    async fn test_three_of_four_supported() {
        let answer = "A heap is a complete tree. Graph search visits nodes. \
                      Merge sort splits arrays. The moon is made of cheese.";
        let context = vec![
            "Heaps are complete binary trees.".to_string(),
            "A graph has vertices.".to_string(),
            "Sorting algorithms order data.".to_string(),
        ];
        let report = verifier().verify(answer, &context).await.unwrap();
        assert_eq!(report.total_sentences, 4);
        assert_eq!(report.supported_sentences, 3);
        assert_eq!(report.faithfulness_score, 0.75);
        assert_eq!(
            report.unsupported_sentences,
            vec!["The moon is made of cheese."]
        );
        assert_eq!(
            report.supported_sentences + report.unsupported_sentences.len(),
            report.total_sentences
        );
    }

    #[tokio::test]
    async fn test_empty_context_supports_nothing() {
        let report = verifier()
            .verify("A heap is a complete tree.", &[])
            .await
            .unwrap();
        assert_eq!(report.faithfulness_score, 0.0);
        assert_eq!(report.details[0].max_similarity, 0.0);
    }
}
