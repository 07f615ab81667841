//! The built-in file analysis pipeline.
//!
//! A small, useful rule set the CLI drives: SourceFile -> FileDigest and
//! SourceFile -> FileDigest -> FileSummary. It doubles as a worked example
//! of registering products, rules, and root queries.

use quarry_engine::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A file to analyze, identified by path. Supplied as a root parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile(pub PathBuf);

/// Content digest of a source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDigest {
    pub path: PathBuf,
    pub digest: String,
}

/// Line, word, and byte counts for a source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSummary {
    pub path: PathBuf,
    pub digest: String,
    pub lines: usize,
    pub words: usize,
    pub bytes: usize,
}

fn digest_file(ctx: &TaskContext, inputs: &[Value]) -> Result<Value, RuleError> {
    let source = inputs[0].get::<SourceFile>().ok_or("missing SourceFile input")?;
    let bytes = ctx.read_file(&source.0)?;
    Ok(Value::new(FileDigest {
        path: source.0.clone(),
        digest: Digest::of_bytes(&bytes).to_hex(),
    })?)
}

fn summarize_file(ctx: &TaskContext, inputs: &[Value]) -> Result<Value, RuleError> {
    let digest = inputs[0].get::<FileDigest>().ok_or("missing FileDigest input")?;
    let text = ctx.read_to_string(&digest.path)?;
    Ok(Value::new(FileSummary {
        path: digest.path.clone(),
        digest: digest.digest.clone(),
        lines: text.lines().count(),
        words: text.split_whitespace().count(),
        bytes: text.len(),
    })?)
}

/// The registry the CLI builds its engine from.
pub fn registry() -> RuleRegistry {
    let mut registry = RuleRegistry::new();
    registry.register::<FileDigest, _>(
        "digest_file",
        vec![Selector::select::<SourceFile>()],
        digest_file,
    );
    registry.register::<FileSummary, _>(
        "summarize_file",
        vec![Selector::select::<FileDigest>()],
        summarize_file,
    );
    registry.query::<FileSummary>([ProductType::of::<SourceFile>()]);
    registry.query::<FileDigest>([ProductType::of::<SourceFile>()]);
    registry
}

/// Root params for one file.
pub fn file_params(path: &Path) -> anyhow::Result<Params> {
    Ok(Params::single(SourceFile(path.to_path_buf()))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_registry_validates() {
        let engine = Engine::new(registry()).unwrap();
        assert_eq!(engine.node_count(), 0);
    }

    #[test]
    fn test_summary_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "one two\nthree\n").unwrap();

        let engine = Engine::new(registry()).unwrap();
        let session = engine.session();
        let summary = session
            .product::<FileSummary>(file_params(&path).unwrap())
            .unwrap();

        assert_eq!(summary.lines, 2);
        assert_eq!(summary.words, 3);
        assert_eq!(summary.bytes, 14);
        assert_eq!(summary.digest, Digest::of_bytes(b"one two\nthree\n").to_hex());
    }
}
