//! Query log inspection.
//!
//! Every answered, refused or failed question leaves one row behind. These
//! helpers read them back for `prep logs` and `GET /logs/{id}`.

use anyhow::{bail, Result};

use crate::chat::format_ts;
use crate::models::QueryLog;
use crate::store::Store;

pub async fn get_log(store: &dyn Store, log_id: i64) -> Result<Option<QueryLog>> {
    store.get_query_log(log_id).await
}

/// The `limit` most recent logs, newest first.
pub async fn recent_logs(store: &dyn Store, limit: i64) -> Result<Vec<QueryLog>> {
    if limit < 0 {
        bail!("invalid limit: must be non-negative");
    }
    store.recent_query_logs(limit).await
}

pub async fn run_show(store: &dyn Store, log_id: i64) -> Result<()> {
    let Some(log) = get_log(store, log_id).await? else {
        bail!("query log not found: {}", log_id);
    };

    println!("--- Query log {} ---", log.id);
    println!("created_at:   {}", format_ts(log.created_at));
    println!("status:       {}", log.verification_status);
    match log.faithfulness_score {
        Some(score) => println!("faithfulness: {:.2}", score),
        None => println!("faithfulness: -"),
    }
    println!("top_k:        {}", log.top_k);
    if let Some(session) = &log.session_id {
        println!("session:      {}", session);
    }
    if let Some(filters) = &log.filters {
        println!("filters:      {}", serde_json::to_string(filters)?);
    }
    println!();
    println!("Q: {}", log.question);
    println!();
    println!("A: {}", log.answer.as_deref().unwrap_or("(no answer)"));

    if let Some(sources) = &log.sources {
        println!();
        println!("--- Sources ({}) ---", sources.len());
        for (i, s) in sources.iter().enumerate() {
            println!("{}. {} [{}] score={:.3}", i + 1, s.title, s.chunk_id, s.score);
        }
    }
    Ok(())
}

pub async fn run_recent(store: &dyn Store, limit: i64) -> Result<()> {
    let logs = recent_logs(store, limit).await?;
    if logs.is_empty() {
        println!("No query logs.");
        return Ok(());
    }
    for log in &logs {
        let score = log
            .faithfulness_score
            .map(|s| format!("{:.2}", s))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "#{:<5} {}  {:<20} {:>5}  {}",
            log.id,
            format_ts(log.created_at),
            log.verification_status,
            score,
            truncate(&log.question, 60)
        );
    }
    Ok(())
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}
