//! Build command implementation.

use crate::pipeline::{self, FileSummary};
use anyhow::{bail, Context, Result};
use quarry_engine::{Engine, ProductType};
use serde_json::json;
use std::path::PathBuf;
use walkdir::WalkDir;

/// Output options for a build run.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Emit one JSON object per file instead of text.
    pub json: bool,
    /// Print engine counters after the run.
    pub stats: bool,
}

/// Analyze the given files and directories, printing one summary per file.
pub fn run_build(engine: &Engine, paths: &[PathBuf], opts: BuildOptions) -> Result<()> {
    let files = collect_files(paths)?;
    if files.is_empty() {
        bail!("no files to analyze");
    }
    tracing::info!("Analyzing {} files", files.len());

    let failed = build_once(engine, &files, opts.json);

    if opts.stats {
        print_stats(engine);
    }
    if failed > 0 {
        bail!("{failed} of {} files failed", files.len());
    }
    Ok(())
}

/// Request a summary for every file, print results, and return the number
/// of failures. All requests are submitted up front so independent files
/// run in parallel across the worker pool.
pub(crate) fn build_once(engine: &Engine, files: &[PathBuf], json: bool) -> usize {
    let session = engine.session();
    let mut failed = 0;
    let mut prepared = Vec::with_capacity(files.len());
    let mut requests = Vec::with_capacity(files.len());
    for path in files {
        match pipeline::file_params(path) {
            Ok(params) => {
                prepared.push(path);
                requests.push((ProductType::of::<FileSummary>(), params));
            }
            Err(err) => {
                failed += 1;
                eprintln!("{}: {err}", path.display());
            }
        }
    }

    for (path, result) in prepared.into_iter().zip(session.request_all(requests)) {
        match result {
            Ok(value) => {
                let summary = value.get::<FileSummary>().expect("FileSummary root");
                print_summary(summary, json);
            }
            Err(err) => {
                failed += 1;
                if json {
                    println!(
                        "{}",
                        json!({ "path": path, "error": err.to_string() })
                    );
                } else {
                    eprintln!("{}: {err}", path.display());
                }
            }
        }
    }
    failed
}

/// Expand arguments into a sorted list of regular files. Directories are
/// walked recursively.
pub(crate) fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path) {
                let entry = entry
                    .with_context(|| format!("failed to walk {}", path.display()))?;
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
        } else {
            files.push(path.clone());
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

fn print_summary(summary: &FileSummary, json: bool) {
    if json {
        println!(
            "{}",
            json!({
                "path": summary.path,
                "digest": summary.digest,
                "lines": summary.lines,
                "words": summary.words,
                "bytes": summary.bytes,
            })
        );
    } else {
        println!(
            "{}  {}  {} lines, {} words, {} bytes",
            summary.path.display(),
            &summary.digest[..12],
            summary.lines,
            summary.words,
            summary.bytes
        );
    }
}

pub(crate) fn print_stats(engine: &Engine) {
    eprintln!("{}", engine.metrics());
    if let Some(stats) = engine.cache_stats() {
        eprintln!("{stats}");
    }
}
