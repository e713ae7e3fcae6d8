//! Cross-encoder reranking.
//!
//! Reranker scores are on the model's own scale (often unbounded logits)
//! and are not comparable with cosine similarity. Once a candidate list has
//! been reranked, every downstream score reflects the reranker's scale.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::RerankerConfig;
use crate::models::RankedChunk;

#[async_trait]
pub trait Reranker: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// Re-score `candidates` against `query` and sort by descending new score.
    async fn rerank(&self, query: &str, candidates: Vec<RankedChunk>) -> Result<Vec<RankedChunk>>;
}

/// Identity reranker used when reranking is turned off.
pub struct DisabledReranker;

#[async_trait]
impl Reranker for DisabledReranker {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn rerank(&self, _query: &str, candidates: Vec<RankedChunk>) -> Result<Vec<RankedChunk>> {
        Ok(candidates)
    }
}

/// Reranker speaking the common `{model, query, documents}` HTTP protocol
/// (Cohere, Jina, TEI, vLLM and compatible gateways).
pub struct HttpReranker {
    url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpReranker {
    pub fn new(config: &RerankerConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow!("reranker.url required when reranking is enabled"))?;
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("reranker.model required when reranking is enabled"))?;
        let api_key = match &config.api_key_env {
            Some(var) => Some(
                std::env::var(var)
                    .map_err(|_| anyhow!("{} environment variable not set", var))?,
            ),
            None => None,
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            url,
            model,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn rerank(&self, query: &str, candidates: Vec<RankedChunk>) -> Result<Vec<RankedChunk>> {
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let documents: Vec<&str> = candidates.iter().map(|c| c.chunk.text.as_str()).collect();
        let body = serde_json::json!({
            "model": self.model,
            "query": query,
            "documents": documents,
        });

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Reranker error {}: {}", status, text);
        }
        let json: serde_json::Value = response.json().await?;
        let scores = parse_rerank_response(&json, candidates.len())?;

        Ok(apply_scores(candidates, &scores))
    }
}

/// Scores aligned to input positions. Documents the service omitted
/// (e.g. a `top_n` cut) are `None`.
fn parse_rerank_response(json: &serde_json::Value, doc_count: usize) -> Result<Vec<Option<f64>>> {
    let mut scores = vec![None; doc_count];
    let results = json
        .get("results")
        .or_else(|| json.get("data"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("Rerank response is missing results array"))?;

    for item in results {
        let index = item
            .get("index")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| anyhow!("Rerank result missing index"))? as usize;
        let score = item
            .get("relevance_score")
            .or_else(|| item.get("score"))
            .and_then(|v| v.as_f64())
            .ok_or_else(|| anyhow!("Rerank result missing score"))?;
        if index < scores.len() {
            scores[index] = Some(score);
        }
    }

    Ok(scores)
}

/// Replace each candidate's score and sort descending. Candidates without a
/// score are dropped; ties keep input order.
pub fn apply_scores(candidates: Vec<RankedChunk>, scores: &[Option<f64>]) -> Vec<RankedChunk> {
    let mut rescored: Vec<RankedChunk> = candidates
        .into_iter()
        .zip(scores.iter())
        .filter_map(|(mut c, s)| {
            c.score = (*s)?;
            Some(c)
        })
        .collect();
    rescored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    rescored
}

pub fn create_reranker(config: &RerankerConfig) -> Result<Box<dyn Reranker>> {
    if config.enabled {
        Ok(Box::new(HttpReranker::new(config)?))
    } else {
        Ok(Box::new(DisabledReranker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn ranked(id: &str, score: f64) -> RankedChunk {
        RankedChunk {
            chunk: Chunk {
                id: id.to_string(),
                material_id: 1,
                ordinal: 0,
                text: format!("text {}", id),
                metadata: Default::default(),
            },
            score,
        }
    }

    #[test]
    fn test_parse_aligns_scores_by_index() {
        let json = serde_json::json!({
            "results": [
                { "index": 1, "relevance_score": 0.2 },
                { "index": 0, "relevance_score": 0.9 }
            ]
        });
        assert_eq!(
            parse_rerank_response(&json, 2).unwrap(),
            vec![Some(0.9), Some(0.2)]
        );
    }

    #[test]
    fn test_parse_accepts_data_and_score_keys() {
        let json = serde_json::json!({ "data": [ { "index": 0, "score": 3.5 } ] });
        let scores = parse_rerank_response(&json, 2).unwrap();
        assert_eq!(scores, vec![Some(3.5), None]);
    }

    #[test]
    fn test_apply_scores_replaces_and_sorts() {
        let out = apply_scores(
            vec![ranked("a", 0.9), ranked("b", 0.1), ranked("c", 0.5)],
            &[Some(-2.0), Some(7.5), None],
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].chunk.id, "b");
        assert_eq!(out[0].score, 7.5);
        assert_eq!(out[1].score, -2.0);
    }

    #[tokio::test]
    async fn test_disabled_is_identity() {
        let input = vec![ranked("a", 0.1), ranked("b", 0.9)];
        let out = DisabledReranker.rerank("q", input).await.unwrap();
        assert_eq!(out[0].chunk.id, "a");
        assert_eq!(out[1].chunk.id, "b");
    }
}
