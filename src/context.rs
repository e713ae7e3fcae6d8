//! Context assembly: truncate, re-resolve, and render the generation prompt.

use anyhow::Result;

use crate::models::{ChatMessage, RankedChunk, SourceInfo};
use crate::prompts;
use crate::store::Store;

/// Everything generation and verification need from the final candidates.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    /// User prompt sent to the generator.
    pub prompt: String,
    /// Citation list, parallel to `chunks`.
    pub sources: Vec<SourceInfo>,
    /// Chunks in relevance order, as they appear in the prompt.
    pub chunks: Vec<RankedChunk>,
}

impl AssembledContext {
    pub fn texts(&self) -> Vec<String> {
        self.chunks.iter().map(|c| c.chunk.text.clone()).collect()
    }

    /// Mean source score, `0.0` when there are no sources.
    pub fn confidence(&self) -> f64 {
        mean_score(&self.sources)
    }
}

pub fn mean_score(sources: &[SourceInfo]) -> f64 {
    if sources.is_empty() {
        return 0.0;
    }
    sources.iter().map(|s| s.score).sum::<f64>() / sources.len() as f64
}

pub fn source_info(ranked: &RankedChunk) -> SourceInfo {
    let meta = &ranked.chunk.metadata;
    SourceInfo {
        chunk_id: ranked.chunk.id.clone(),
        material_id: ranked.chunk.material_id,
        title: if meta.material_title.is_empty() {
            "Unknown".to_string()
        } else {
            meta.material_title.clone()
        },
        page: meta.page,
        section: meta.section.clone(),
        material_type: if meta.material_type.is_empty() {
            "unknown".to_string()
        } else {
            meta.material_type.clone()
        },
        score: ranked.score,
    }
}

/// Keep the first `top_k` candidates, re-read each from the store (skipping
/// any that vanished since retrieval), and render the prompt.
///
/// `history` is the prior transcript with the current question's echo
/// already removed.
pub async fn assemble(
    store: &dyn Store,
    candidates: Vec<RankedChunk>,
    top_k: usize,
    question: &str,
    history: &[ChatMessage],
) -> Result<AssembledContext> {
    let mut chunks = Vec::with_capacity(top_k.min(candidates.len()));
    for candidate in candidates.into_iter().take(top_k) {
        match store.get_chunk(&candidate.chunk.id).await? {
            Some(chunk) => chunks.push(RankedChunk {
                chunk,
                score: candidate.score,
            }),
            None => {
                tracing::warn!(chunk_id = %candidate.chunk.id, "chunk vanished before assembly");
            }
        }
    }

    let context = prompts::render_context(
        chunks
            .iter()
            .map(|c| (c.chunk.text.as_str(), &c.chunk.metadata)),
    );
    let history_block = prompts::render_history(history);
    let prompt = prompts::build_prompt(question, &context, history_block.as_deref());
    let sources = chunks.iter().map(source_info).collect();

    Ok(AssembledContext {
        prompt,
        sources,
        chunks,
    })
}
