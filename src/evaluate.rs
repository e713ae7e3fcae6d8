//! Offline quality metrics.
//!
//! - **Citation accuracy**: for a logged answer, the fraction of the
//!   materials it was grounded on that the answer actually cites.
//! - **Recall@K**: for a labelled query set, the fraction of relevant chunks
//!   that plain vector search returns in its top K.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingProvider;
use crate::index::VectorIndex;
use crate::models::QueryLog;
use crate::services::Services;
use crate::store::Store;

pub const DEFAULT_RECALL_KS: &[usize] = &[5, 10, 12, 20];

/// An answer split into its body and the citations it contains.
#[derive(Debug, Clone, PartialEq)]
pub struct Citations {
    pub answer: String,
    pub citations: Vec<String>,
}

pub struct CitationParser {
    sources_heading: Regex,
    inline: Regex,
    bullet: Regex,
}

impl CitationParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            sources_heading: Regex::new(r"(?i)\n\s*(?:sources?|references?):\s*\n")?,
            inline: Regex::new(r"(?i)\[([^\]]+(?:page|section|chapter)[^\]]+)\]")?,
            bullet: Regex::new(r"^[-•*]\s*")?,
        })
    }

    /// Citations come from a trailing `Sources:`/`References:` list when the
    /// answer has one, otherwise from inline `[Title, Page N]` markers.
    pub fn extract(&self, response: &str) -> Citations {
        if let Some(m) = self.sources_heading.find(response) {
            let rest = &response[m.end()..];
            let list = match self.sources_heading.find(rest) {
                Some(next) => &rest[..next.start()],
                None => rest,
            };
            let citations = list
                .lines()
                .map(|line| self.bullet.replace(line.trim(), "").trim().to_string())
                .filter(|line| !line.is_empty())
                .collect();
            return Citations {
                answer: response[..m.start()].trim().to_string(),
                citations,
            };
        }

        let mut seen = BTreeSet::new();
        let citations = self
            .inline
            .captures_iter(response)
            .map(|c| c[1].to_string())
            .filter(|c| seen.insert(c.clone()))
            .collect();
        Citations {
            answer: response.trim().to_string(),
            citations,
        }
    }
}

/// Material title of a citation: the text before its first comma.
pub fn cited_title(citation: &str) -> &str {
    citation.split(',').next().unwrap_or("").trim()
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CitationScore {
    pub log_id: i64,
    pub question: String,
    pub citations_found: usize,
    pub sources_used: usize,
    pub accuracy: f64,
    pub cited_materials: Vec<String>,
    pub source_materials: Vec<String>,
}

/// |cited ∩ sources| / |sources|, or 0 when the log has no sources.
pub fn score_citations(parser: &CitationParser, log: &QueryLog) -> CitationScore {
    let answer = log.answer.as_deref().unwrap_or("");
    let citations = parser.extract(answer).citations;
    let sources = log.sources.as_deref().unwrap_or(&[]);

    let cited: BTreeSet<String> = citations
        .iter()
        .map(|c| cited_title(c).to_string())
        .collect();
    let source_titles: BTreeSet<String> = sources.iter().map(|s| s.title.clone()).collect();

    let accuracy = if source_titles.is_empty() {
        0.0
    } else {
        cited.intersection(&source_titles).count() as f64 / source_titles.len() as f64
    };

    CitationScore {
        log_id: log.id,
        question: log.question.clone(),
        citations_found: citations.len(),
        sources_used: sources.len(),
        accuracy,
        cited_materials: cited.into_iter().collect(),
        source_materials: source_titles.into_iter().collect(),
    }
}

/// Score the given logs. Ids that do not exist are skipped.
pub async fn citation_accuracy(store: &dyn Store, log_ids: &[i64]) -> Result<Vec<CitationScore>> {
    let parser = CitationParser::new()?;
    let mut scores = Vec::with_capacity(log_ids.len());
    for &id in log_ids {
        match store.get_query_log(id).await? {
            Some(log) => scores.push(score_citations(&parser, &log)),
            None => tracing::debug!(log_id = id, "query log not found, skipping"),
        }
    }
    Ok(scores)
}

/// A labelled retrieval query.
#[derive(Debug, Clone, Deserialize)]
pub struct RecallQuery {
    pub query: String,
    pub relevant_chunk_ids: Vec<String>,
}

pub fn load_recall_queries(path: &Path) -> Result<Vec<RecallQuery>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read query set: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse query set: {}", path.display()))
}

/// Fraction of `relevant` present in `retrieved`; 0 when nothing is relevant.
pub fn recall(retrieved: &[String], relevant: &[String]) -> f64 {
    let relevant: BTreeSet<&str> = relevant.iter().map(String::as_str).collect();
    if relevant.is_empty() {
        return 0.0;
    }
    let retrieved: BTreeSet<&str> = retrieved.iter().map(String::as_str).collect();
    retrieved.intersection(&relevant).count() as f64 / relevant.len() as f64
}

/// Mean recall for each K over `queries`.
pub async fn recall_at_k(
    embedder: &dyn EmbeddingProvider,
    index: &dyn VectorIndex,
    queries: &[RecallQuery],
    ks: &[usize],
) -> Result<BTreeMap<usize, f64>> {
    let mut sums: BTreeMap<usize, f64> = ks.iter().map(|&k| (k, 0.0)).collect();
    for q in queries {
        let vector = embedder.embed_text(&q.query).await?;
        for &k in ks {
            let ids: Vec<String> = index
                .search(&vector, k)
                .await?
                .into_iter()
                .map(|h| h.chunk_id)
                .collect();
            *sums.entry(k).or_default() += recall(&ids, &q.relevant_chunk_ids);
        }
    }
    let n = queries.len();
    Ok(sums
        .into_iter()
        .map(|(k, sum)| (k, if n == 0 { 0.0 } else { sum / n as f64 }))
        .collect())
}

pub async fn run_citations(services: &Services, limit: i64) -> Result<()> {
    let logs = services.store.recent_query_logs(limit).await?;
    let ids: Vec<i64> = logs.iter().map(|l| l.id).collect();
    let scores = citation_accuracy(services.store.as_ref(), &ids).await?;

    println!("Citation accuracy over {} queries", scores.len());
    for s in &scores {
        println!(
            "  log {:<5} accuracy={:.2} citations={} sources={}",
            s.log_id, s.accuracy, s.citations_found, s.sources_used
        );
    }
    let mean = if scores.is_empty() {
        0.0
    } else {
        scores.iter().map(|s| s.accuracy).sum::<f64>() / scores.len() as f64
    };
    println!("Average: {:.3}", mean);
    Ok(())
}

pub async fn run_recall(services: &Services, path: &Path, ks: &[usize]) -> Result<()> {
    let queries = load_recall_queries(path)?;
    let ks = if ks.is_empty() { DEFAULT_RECALL_KS } else { ks };
    let results = recall_at_k(
        services.embedder.as_ref(),
        services.index.as_ref(),
        &queries,
        ks,
    )
    .await?;

    println!("Recall@K over {} queries", queries.len());
    for (k, r) in &results {
        println!("  Recall@{:<3} {:.3}", k, r);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceInfo;

    fn source(title: &str) -> SourceInfo {
        SourceInfo {
            chunk_id: "c".to_string(),
            material_id: 1,
            title: title.to_string(),
            page: None,
            section: None,
            material_type: "lecture".to_string(),
            score: 0.9,
        }
    }

    fn log(answer: &str, sources: Vec<SourceInfo>) -> QueryLog {
        QueryLog {
            id: 1,
            created_at: 0,
            question: "q".to_string(),
            answer: Some(answer.to_string()),
            sources: Some(sources),
            faithfulness_score: Some(1.0),
            verification_status: "passed".to_string(),
            filters: None,
            top_k: 12,
            session_id: None,
        }
    }

    #[test]
    fn test_extract_sources_section() {
        let parser = CitationParser::new().unwrap();
        let c = parser.extract("BFS uses a queue.\n\nSources:\n- Graphs.pdf, Page 3\n* Trees.md, Section: BFS\n");
        assert_eq!(c.answer, "BFS uses a queue.");
        assert_eq!(c.citations, vec!["Graphs.pdf, Page 3", "Trees.md, Section: BFS"]);
    }

    #[test]
    fn test_extract_inline_deduplicates() {
        let parser = CitationParser::new().unwrap();
        let c = parser.extract("A [Heaps, Page 2]. B [Heaps, Page 2]. C [just a note].");
        assert_eq!(c.citations, vec!["Heaps, Page 2"]);
    }

    #[test]
    fn test_citation_accuracy() {
        let parser = CitationParser::new().unwrap();
        let answer = "x [Graphs.pdf, Page 3]";
        let s = score_citations(&parser, &log(answer, vec![source("Graphs.pdf"), source("Trees.md")]));
        assert_eq!(s.accuracy, 0.5);
        assert_eq!(s.cited_materials, vec!["Graphs.pdf"]);

        let s = score_citations(&parser, &log(answer, vec![]));
        assert_eq!(s.accuracy, 0.0);
    }

    #[test]
    fn test_recall() {
        let ids = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(recall(&ids(&["a", "b", "c"]), &ids(&["a", "d"])), 0.5);
        assert_eq!(recall(&ids(&["a"]), &[]), 0.0);
    }
}
