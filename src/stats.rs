//! Coverage statistics and health overview.
//!
//! Provides a quick summary of what's vectorized: total rows, distinct
//! covered events, placeholder counts, and a per-event-type breakdown. Used
//! by `evx coverage` to give confidence that backfills and embeddings are
//! working as expected.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::vector_store::{SqliteVectorStore, VectorStore};

/// Run the coverage command: query the database and print a summary.
pub async fn run_coverage(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteVectorStore::new(pool.clone());

    let stats = store.coverage_stats().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Event Vectorizer — Coverage");
    println!("===========================");
    println!();
    println!("  Database:       {}", config.db.path.display());
    println!("  Size:           {}", format_bytes(db_size));
    println!();
    println!("  Vector rows:    {}", stats.total_rows);
    println!("  Covered events: {}", stats.covered_events);
    println!(
        "  Placeholders:   {} ({}%)",
        stats.placeholder_rows,
        if stats.total_rows > 0 {
            (stats.placeholder_rows * 100) / stats.total_rows
        } else {
            0
        }
    );

    if !stats.by_event_type.is_empty() {
        println!();
        println!("  By event type:");
        println!("  {:<40} {:>8}", "EVENT TYPE", "EVENTS");
        println!("  {}", "-".repeat(50));
        for (event_type, events) in &stats.by_event_type {
            println!("  {:<40} {:>8}", event_type, events);
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_ranges() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
