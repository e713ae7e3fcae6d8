//! Explicitly constructed collaborators shared by every request.
//!
//! The process entry point builds one [`Services`] from the config and hands
//! clones of it to the CLI commands or the HTTP router. Tests build it from
//! in-memory fakes with [`Services::new`].

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::faithfulness::FaithfulnessVerifier;
use crate::generation::{create_generator, Generator};
use crate::index::{FlatIndex, VectorIndex};
use crate::rerank::{create_reranker, Reranker};
use crate::scorer::Scorer;
use crate::store::sqlite::SqliteStore;
use crate::store::Store;

#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub index: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub reranker: Arc<dyn Reranker>,
    pub generator: Arc<dyn Generator>,
    pub verifier: Arc<FaithfulnessVerifier>,
    pub scorer: Scorer,
}

impl Services {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        reranker: Arc<dyn Reranker>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let verifier = FaithfulnessVerifier::new(
            embedder.clone(),
            &config.verification,
            config.embedding.batch_size,
        )?;
        let scorer = Scorer::new(&config.verification);
        Ok(Self {
            config: Arc::new(config),
            store,
            index,
            embedder,
            reranker,
            generator,
            verifier: Arc::new(verifier),
            scorer,
        })
    }

    /// Open the SQLite store, load the persisted index, and construct the
    /// configured providers.
    pub async fn from_config(config: Config) -> Result<Self> {
        let store = SqliteStore::open(&config.db.path).await?;
        let index = FlatIndex::load(&config.index.path)?;
        let embedder =
            create_provider(&config.embedding).context("Failed to create embedding provider")?;
        let reranker = create_reranker(&config.reranker).context("Failed to create reranker")?;
        let generator =
            create_generator(&config.generation).context("Failed to create generator")?;

        tracing::info!(
            db = %config.db.path.display(),
            index_vectors = index.len(),
            embedding = embedder.model_name(),
            generation = generator.model_name(),
            rerank = reranker.is_enabled(),
            "services ready"
        );

        Self::new(
            config,
            Arc::new(store),
            Arc::new(index),
            Arc::from(embedder),
            Arc::from(reranker),
            Arc::from(generator),
        )
    }
}
