//! Ingestion pipeline orchestration.
//!
//! Coordinates the flow for one file: extraction → chunking → embedding →
//! storage → index. A material is only left behind when its chunks are
//! stored and indexed; if embedding or storage fails the material row is
//! removed again.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::chunk::Chunker;
use crate::embedding::embed_in_batches;
use crate::extract::{self, FileKind, Section};
use crate::models::{Chunk, ChunkMetadata, Material, NewMaterial};
use crate::services::Services;

/// Caller-supplied material description. Explicit values win over what is
/// inferred from the filename.
#[derive(Debug, Clone, Default)]
pub struct MaterialInput {
    pub material_type: String,
    pub title: Option<String>,
    pub course: Option<String>,
    pub lecture_number: Option<i64>,
    pub chapter: Option<String>,
    pub topic: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub material: Material,
    pub sections: usize,
    pub chunks: usize,
}

pub async fn ingest_file(
    services: &Services,
    path: &Path,
    input: &MaterialInput,
) -> Result<IngestReport> {
    if FileKind::from_path(path).is_none() {
        bail!(
            "Unsupported file type: {} (expected .txt, .md, .pdf or .docx)",
            path.display()
        );
    }
    if input.material_type.trim().is_empty() {
        bail!("material type must not be empty");
    }

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let owned = path.to_path_buf();
    let sections = tokio::task::spawn_blocking(move || extract::parse_file(&owned))
        .await
        .context("extraction task panicked")??;

    let material = services
        .store
        .insert_material(&NewMaterial {
            filename: filename.clone(),
            material_type: input.material_type.clone(),
            course: input.course.clone(),
            file_path: path.display().to_string(),
        })
        .await?;

    match store_chunks(services, &material, &filename, &sections, input).await {
        Ok(chunks) => {
            tracing::info!(
                material_id = material.id,
                file = %filename,
                sections = sections.len(),
                chunks,
                "material ingested"
            );
            let material = services
                .store
                .get_material(material.id)
                .await?
                .unwrap_or(material);
            Ok(IngestReport {
                material,
                sections: sections.len(),
                chunks,
            })
        }
        Err(e) => {
            tracing::warn!(material_id = material.id, error = %format!("{:#}", e), "ingestion failed, removing material");
            if let Err(cleanup) = services.store.delete_material(material.id).await {
                tracing::error!(material_id = material.id, error = %cleanup, "failed to remove partial material");
            }
            Err(e)
        }
    }
}

async fn store_chunks(
    services: &Services,
    material: &Material,
    filename: &str,
    sections: &[Section],
    input: &MaterialInput,
) -> Result<usize> {
    let chunks = build_chunks(services, material, filename, sections, input)?;
    if chunks.is_empty() {
        tracing::warn!(file = %filename, "no text extracted");
        return Ok(0);
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embed_in_batches(
        services.embedder.as_ref(),
        &texts,
        services.config.embedding.batch_size,
    )
    .await
    .with_context(|| format!("Failed to embed chunks of {}", filename))?;

    services.store.insert_chunks(&chunks).await?;
    let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
    services.index.add(&ids, &vectors).await?;
    services.index.persist().await?;
    services
        .store
        .set_material_chunk_count(material.id, chunks.len() as i64)
        .await?;

    Ok(chunks.len())
}

fn build_chunks(
    services: &Services,
    material: &Material,
    filename: &str,
    sections: &[Section],
    input: &MaterialInput,
) -> Result<Vec<Chunk>> {
    let chunker = Chunker::new(&services.config.chunking)?;
    let inferred = extract::metadata_from_filename(filename)?;

    let base = ChunkMetadata {
        material_title: input.title.clone().unwrap_or_else(|| filename.to_string()),
        material_type: input.material_type.clone(),
        course: input.course.clone(),
        lecture_number: input.lecture_number.or(inferred.lecture_number),
        chapter: input.chapter.clone().or(inferred.chapter),
        topic: input.topic.clone().or(inferred.topic),
        ..Default::default()
    };

    let mut chunks = Vec::new();
    for section in sections {
        for text in chunker.chunk_text(&section.text) {
            chunks.push(Chunk {
                id: uuid::Uuid::new_v4().to_string(),
                material_id: material.id,
                ordinal: chunks.len() as i64,
                text,
                metadata: ChunkMetadata {
                    page: section.page,
                    section: section.section.clone(),
                    ..base.clone()
                },
            });
        }
    }
    Ok(chunks)
}

/// Ingest every supported file under `root` whose relative path matches one
/// of `include_globs`. Failures are reported per file and do not stop the
/// walk.
pub async fn ingest_dir(
    services: &Services,
    root: &Path,
    include_globs: &[String],
    input: &MaterialInput,
) -> Result<Vec<(PathBuf, Result<IngestReport>)>> {
    let include = build_globset(include_globs)?;
    let exclude = build_globset(&["**/.git/**".to_string(), "**/.*".to_string()])?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();
        if exclude.is_match(&rel_str) || !include.is_match(&rel_str) {
            continue;
        }
        if FileKind::from_path(path).is_some() {
            paths.push(path.to_path_buf());
        }
    }
    paths.sort();

    let mut results = Vec::with_capacity(paths.len());
    for path in paths {
        let result = ingest_file(services, &path, input).await;
        results.push((path, result));
    }
    Ok(results)
}

pub fn default_include_globs() -> Vec<String> {
    ["**/*.txt", "**/*.md", "**/*.pdf", "**/*.docx"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// CLI entry point for `prep ingest`.
pub async fn run_ingest(services: &Services, path: &Path, input: &MaterialInput) -> Result<()> {
    if path.is_dir() {
        let results = ingest_dir(services, path, &default_include_globs(), input).await?;
        let mut ok = 0;
        for (file, result) in &results {
            match result {
                Ok(report) => {
                    ok += 1;
                    println!(
                        "  {} → material {} ({} chunks)",
                        file.display(),
                        report.material.id,
                        report.chunks
                    );
                }
                Err(e) => println!("  {} → failed: {:#}", file.display(), e),
            }
        }
        println!("ingested {}/{} files", ok, results.len());
        return Ok(());
    }

    let report = ingest_file(services, path, input).await?;
    println!("ingested {}", path.display());
    println!("  material id: {}", report.material.id);
    println!("  sections:    {}", report.sections);
    println!("  chunks:      {}", report.chunks);
    Ok(())
}
