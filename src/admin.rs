//! Index maintenance.
//!
//! The vector index is derived data: it can always be rebuilt from the
//! chunks in the store. A rebuild embeds everything first and then swaps
//! the new contents in with [`crate::index::VectorIndex::replace_all`], so concurrent
//! searches see either the old index or the new one.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::embedding::embed_in_batches;
use crate::services::Services;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReindexReport {
    pub materials: usize,
    pub chunks: usize,
    pub vectors: usize,
}

/// Re-embed every stored chunk and replace the index contents in one swap.
pub async fn reindex(services: &Services) -> Result<ReindexReport> {
    let materials = services.store.list_materials().await?.len();
    let chunks = services.store.all_chunks().await?;

    if chunks.is_empty() {
        services.index.clear().await?;
        services.index.persist().await?;
        tracing::info!("reindex: store is empty, index cleared");
        return Ok(ReindexReport {
            materials,
            chunks: 0,
            vectors: 0,
        });
    }

    let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embed_in_batches(
        services.embedder.as_ref(),
        &texts,
        services.config.embedding.batch_size,
    )
    .await
    .context("Failed to embed chunks for reindex")?;

    services.index.replace_all(&ids, &vectors).await?;
    services.index.persist().await?;

    tracing::info!(materials, chunks = ids.len(), "reindex complete");
    Ok(ReindexReport {
        materials,
        chunks: ids.len(),
        vectors: services.index.len(),
    })
}

/// Delete every material, chunk, session, message and log, and empty the
/// index.
pub async fn reset(services: &Services) -> Result<()> {
    services.store.reset().await?;
    services.index.clear().await?;
    services.index.persist().await?;
    tracing::warn!("all data reset");
    Ok(())
}

/// Delete a material and its chunks, then rebuild the index from what
/// remains. Returns `None` if the material did not exist.
pub async fn delete_material(services: &Services, material_id: i64) -> Result<Option<ReindexReport>> {
    if !services.store.delete_material(material_id).await? {
        return Ok(None);
    }
    tracing::info!(material_id, "material deleted");
    Ok(Some(reindex(services).await?))
}

pub async fn run_list_materials(services: &Services) -> Result<()> {
    let materials = services.store.list_materials().await?;
    if materials.is_empty() {
        println!("No materials. Ingest some with `prep ingest <path> --type lecture`.");
        return Ok(());
    }
    println!("{:<6} {:<12} {:>7}  FILE", "ID", "TYPE", "CHUNKS");
    for m in &materials {
        println!(
            "{:<6} {:<12} {:>7}  {}{}",
            m.id,
            m.material_type,
            m.chunk_count,
            m.filename,
            m.course
                .as_deref()
                .map(|c| format!(" ({})", c))
                .unwrap_or_default()
        );
    }
    Ok(())
}

pub async fn run_delete_material(services: &Services, material_id: i64) -> Result<()> {
    match delete_material(services, material_id).await? {
        Some(report) => {
            println!(
                "Deleted material {}. Index now holds {} vectors.",
                material_id, report.vectors
            );
            Ok(())
        }
        None => anyhow::bail!("material not found: {}", material_id),
    }
}

pub async fn run_rebuild(services: &Services) -> Result<()> {
    let report = reindex(services).await?;
    println!(
        "Rebuilt index: {} materials, {} chunks, {} vectors",
        report.materials, report.chunks, report.vectors
    );
    Ok(())
}

pub async fn run_reset(services: &Services, yes: bool) -> Result<()> {
    if !yes {
        anyhow::bail!("refusing to reset without --yes");
    }
    reset(services).await?;
    println!("All materials, chats, logs and vectors deleted.");
    Ok(())
}
