//! Source chunk lookup.
//!
//! Answers cite chunks by id. These helpers resolve a cited id back to the
//! full chunk text for `prep source` and `GET /source/{chunk_id}`.

use anyhow::{bail, Result};
use serde::Serialize;

use crate::models::ChunkMetadata;
use crate::store::Store;

/// One stored chunk as shown to a reader following a citation.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceDetail {
    pub chunk_id: String,
    pub text: String,
    pub chunk_metadata: ChunkMetadata,
    pub material_id: i64,
}

pub async fn get_source(store: &dyn Store, chunk_id: &str) -> Result<Option<SourceDetail>> {
    let chunk = store.get_chunk(chunk_id).await?;
    Ok(chunk.map(|c| SourceDetail {
        chunk_id: c.id,
        text: c.text,
        chunk_metadata: c.metadata,
        material_id: c.material_id,
    }))
}

pub async fn run_show(store: &dyn Store, chunk_id: &str) -> Result<()> {
    let Some(source) = get_source(store, chunk_id).await? else {
        bail!("chunk not found: {}", chunk_id);
    };

    let meta = &source.chunk_metadata;
    println!("--- {} ---", source.chunk_id);
    println!("material:  {} (id {})", meta.material_title, source.material_id);
    println!("type:      {}", meta.material_type);
    if let Some(course) = &meta.course {
        println!("course:    {}", course);
    }
    if let Some(lecture) = meta.lecture_number {
        println!("lecture:   {}", lecture);
    }
    if let Some(page) = meta.page {
        println!("page:      {}", page);
    }
    if let Some(section) = &meta.section {
        println!("section:   {}", section);
    }
    println!();
    println!("{}", source.text);
    Ok(())
}
