#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use prep_rag::config::Config;
use prep_rag::embedding::EmbeddingProvider;
use prep_rag::generation::Generator;
use prep_rag::index::{FlatIndex, IndexHit, VectorIndex};
use prep_rag::models::{Chunk, ChunkMetadata, NewMaterial, RankedChunk};
use prep_rag::rerank::{DisabledReranker, Reranker};
use prep_rag::services::Services;
use prep_rag::store::memory::InMemoryStore;
use prep_rag::store::Store;

pub const KEYWORDS: &[&str] = &["heap", "graph", "sort", "hash", "tree"];

/// One-hot on the first keyword a text contains; texts with none share a
/// separate "other" axis. Keeps every text it embeds.
#[derive(Default)]
pub struct KeywordEmbedder {
    pub embedded: AtomicUsize,
    pub texts: Mutex<Vec<String>>,
}

impl KeywordEmbedder {
    pub fn embedded(&self) -> usize {
        self.embedded.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }

    fn dims(&self) -> usize {
        KEYWORDS.len() + 1
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
        self.texts.lock().unwrap().extend_from_slice(texts);
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut v = vec![0.0; KEYWORDS.len() + 1];
    let slot = KEYWORDS
        .iter()
        .position(|k| lower.contains(k))
        .unwrap_or(KEYWORDS.len());
    v[slot] = 1.0;
    v
}

/// Embeds normally for the first `ok_calls` batches, then errors.
pub struct FlakyEmbedder {
    pub ok_calls: usize,
    pub calls: AtomicUsize,
}

impl FlakyEmbedder {
    pub fn failing_after(ok_calls: usize) -> Self {
        Self {
            ok_calls,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    fn model_name(&self) -> &str {
        "flaky"
    }

    fn dims(&self) -> usize {
        KEYWORDS.len() + 1
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) >= self.ok_calls {
            anyhow::bail!("Embedding API error (503): upstream unavailable");
        }
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

/// Always answers with the same text. Keeps every prompt it was given.
pub struct ScriptedGenerator {
    pub answer: String,
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str, _system_prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.answer.clone())
    }
}

pub struct FailingGenerator;

#[async_trait]
impl Generator for FailingGenerator {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn generate(&self, _prompt: &str, _system_prompt: &str) -> Result<String> {
        anyhow::bail!("Generation API error (503): upstream unavailable")
    }
}

pub struct SlowGenerator(pub Duration);

#[async_trait]
impl Generator for SlowGenerator {
    fn model_name(&self) -> &str {
        "slow"
    }

    async fn generate(&self, _prompt: &str, _system_prompt: &str) -> Result<String> {
        tokio::time::sleep(self.0).await;
        Ok("too late".to_string())
    }
}

/// Scores each candidate by how often `query`'s first word occurs in it.
pub struct CountingReranker;

#[async_trait]
impl Reranker for CountingReranker {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn rerank(&self, query: &str, candidates: Vec<RankedChunk>) -> Result<Vec<RankedChunk>> {
        let word = query
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_lowercase();
        let scores: Vec<Option<f64>> = candidates
            .iter()
            .map(|c| Some(c.chunk.text.to_lowercase().matches(&word).count() as f64 * 3.5))
            .collect();
        Ok(prep_rag::rerank::apply_scores(candidates, &scores))
    }
}

/// [`CountingReranker`] that keeps every query it was asked to rerank for.
#[derive(Default)]
pub struct RecordingReranker {
    pub queries: Mutex<Vec<String>>,
}

impl RecordingReranker {
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reranker for RecordingReranker {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn rerank(&self, query: &str, candidates: Vec<RankedChunk>) -> Result<Vec<RankedChunk>> {
        self.queries.lock().unwrap().push(query.to_string());
        CountingReranker.rerank(query, candidates).await
    }
}

/// Delegates to a [`FlatIndex`] and keeps the `k` of every search.
pub struct RecordingIndex {
    pub inner: Arc<FlatIndex>,
    pub searches: Mutex<Vec<usize>>,
}

impl RecordingIndex {
    pub fn new(inner: Arc<FlatIndex>) -> Self {
        Self {
            inner,
            searches: Mutex::new(Vec::new()),
        }
    }

    pub fn searched_k(&self) -> Vec<usize> {
        self.searches.lock().unwrap().clone()
    }
}

#[async_trait]
impl VectorIndex for RecordingIndex {
    async fn add(&self, ids: &[String], vectors: &[Vec<f32>]) -> Result<()> {
        self.inner.add(ids, vectors).await
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<IndexHit>> {
        self.searches.lock().unwrap().push(k);
        self.inner.search(query, k).await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }

    async fn replace_all(&self, ids: &[String], vectors: &[Vec<f32>]) -> Result<()> {
        self.inner.replace_all(ids, vectors).await
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    async fn persist(&self) -> Result<()> {
        self.inner.persist().await
    }
}

pub struct Harness {
    pub services: Services,
    pub store: Arc<InMemoryStore>,
    pub index: Arc<FlatIndex>,
    /// The index `services` searches through.
    pub searched: Arc<RecordingIndex>,
    pub embedder: Arc<KeywordEmbedder>,
}

pub fn harness(generator: Arc<dyn Generator>) -> Harness {
    harness_with(Config::minimal(), generator, Arc::new(DisabledReranker))
}

pub fn harness_with(
    config: Config,
    generator: Arc<dyn Generator>,
    reranker: Arc<dyn Reranker>,
) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let index = Arc::new(FlatIndex::in_memory());
    let searched = Arc::new(RecordingIndex::new(index.clone()));
    let embedder = Arc::new(KeywordEmbedder::default());
    let services = Services::new(
        config,
        store.clone(),
        searched.clone(),
        embedder.clone(),
        reranker,
        generator,
    )
    .unwrap();
    Harness {
        services,
        store,
        index,
        searched,
        embedder,
    }
}

/// Register one material holding `texts` as its chunks, and index them.
/// Returns the material id.
pub async fn seed(h: &Harness, title: &str, material_type: &str, texts: &[&str]) -> i64 {
    let material = h
        .store
        .insert_material(&NewMaterial {
            filename: title.to_string(),
            material_type: material_type.to_string(),
            course: None,
            file_path: format!("/materials/{}", title),
        })
        .await
        .unwrap();

    let chunks: Vec<Chunk> = texts
        .iter()
        .enumerate()
        .map(|(i, text)| Chunk {
            id: format!("{}-{}", title, i),
            material_id: material.id,
            ordinal: i as i64,
            text: text.to_string(),
            metadata: ChunkMetadata {
                material_title: title.to_string(),
                material_type: material_type.to_string(),
                page: Some(i as i64 + 1),
                ..Default::default()
            },
        })
        .collect();
    h.store.insert_chunks(&chunks).await.unwrap();
    h.store
        .set_material_chunk_count(material.id, chunks.len() as i64)
        .await
        .unwrap();

    let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
    let vectors: Vec<Vec<f32>> = texts.iter().map(|t| keyword_vector(t)).collect();
    h.index.add(&ids, &vectors).await.unwrap();
    material.id
}

/// Three lecture chunks, one per keyword used by the scenario answers.
pub async fn seed_algorithms(h: &Harness) -> i64 {
    seed(
        h,
        "Algorithms",
        "lecture",
        &[
            "A heap is a complete binary tree stored in an array.",
            "A graph is a set of vertices joined by edges.",
            "Merge sort divides the array and merges sorted halves.",
        ],
    )
    .await
}
