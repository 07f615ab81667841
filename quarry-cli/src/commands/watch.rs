//! Watch command implementation.

use crate::commands::build::{build_once, collect_files, print_stats};
use anyhow::{Context, Result};
use quarry_engine::Engine;
use quarry_watch::{PathWatcher, WatchConfig};
use std::path::Path;
use std::time::Duration;

/// Analyze everything under `dir`, then keep the results fresh: each
/// debounced change batch invalidates affected nodes and re-requests the
/// current file set. Unchanged files confirm from cache without rerunning.
pub fn watch_files(engine: &Engine, dir: &Path, debounce: Duration, json: bool) -> Result<()> {
    let files = collect_files(&[dir.to_path_buf()])?;
    println!(
        "Watching {} ({} files, Ctrl+C to stop)...",
        dir.display(),
        files.len()
    );
    build_once(engine, &files, json);

    let (mut watcher, batches) = PathWatcher::new(WatchConfig { debounce })?;
    watcher
        .watch(dir)
        .with_context(|| format!("failed to watch {}", dir.display()))?;

    for batch in batches {
        let marked = engine.invalidate_events(&batch);
        tracing::info!(
            events = batch.len(),
            invalidated = marked,
            "change batch received"
        );

        // Re-list so created and removed files are picked up.
        let files = collect_files(&[dir.to_path_buf()])?;
        build_once(engine, &files, json);
        print_stats(engine);
    }

    Ok(())
}
