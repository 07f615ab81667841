//! End-to-end engine tests over a small file pipeline:
//! SourceFile -> FileDigest -> Summary.

use quarry_engine::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize)]
struct SourceFile(String);

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct FileDigest(String);

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Summary(String);

fn digest_body(ctx: &TaskContext, inputs: &[Value]) -> Result<Value, RuleError> {
    let source = inputs[0].get::<SourceFile>().ok_or("missing SourceFile")?;
    let bytes = ctx.read_file(Path::new(&source.0))?;
    Ok(Value::new(FileDigest(Digest::of_bytes(&bytes).to_hex()))?)
}

fn summary_body(_: &TaskContext, inputs: &[Value]) -> Result<Value, RuleError> {
    let digest = inputs[0].get::<FileDigest>().ok_or("missing FileDigest")?;
    Ok(Value::new(Summary(format!("digest:{}", digest.0)))?)
}

fn pipeline_registry() -> RuleRegistry {
    let mut registry = RuleRegistry::new();
    registry.register::<FileDigest, _>(
        "digest_file",
        vec![Selector::select::<SourceFile>()],
        digest_body,
    );
    registry.register::<Summary, _>(
        "summarize",
        vec![Selector::select::<FileDigest>()],
        summary_body,
    );
    registry.query::<Summary>([ProductType::of::<SourceFile>()]);
    registry.query::<FileDigest>([ProductType::of::<SourceFile>()]);
    registry
}

fn pipeline_engine() -> Engine {
    Engine::with_config(
        pipeline_registry(),
        EngineConfig {
            workers: 2,
            cache_path: None,
        },
    )
    .unwrap()
}

fn source_params(path: &Path) -> Params {
    Params::single(SourceFile(path.to_string_lossy().into_owned())).unwrap()
}

fn write_source(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_pipeline_produces_summary() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(&dir, "input.txt", b"hello");

    let engine = pipeline_engine();
    let session = engine.session();
    let summary = session.product::<Summary>(source_params(&path)).unwrap();

    assert_eq!(
        summary.0,
        format!("digest:{}", Digest::of_bytes(b"hello").to_hex())
    );
    assert_eq!(engine.metrics().executions, 2);
}

#[test]
fn test_repeat_request_is_memoized() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(&dir, "input.txt", b"hello");

    let engine = pipeline_engine();
    let session = engine.session();
    let first = session.product::<Summary>(source_params(&path)).unwrap();
    let second = session.product::<Summary>(source_params(&path)).unwrap();

    assert_eq!(*first, *second);
    let metrics = engine.metrics();
    assert_eq!(metrics.executions, 2);
    assert!(metrics.hits >= 1);
    assert_eq!(engine.node_count(), 2);
}

#[test]
fn test_shared_subgraph_across_roots() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(&dir, "input.txt", b"hello");

    let engine = pipeline_engine();
    let session = engine.session();
    session.product::<Summary>(source_params(&path)).unwrap();
    // FileDigest was already computed as Summary's dependency.
    session.product::<FileDigest>(source_params(&path)).unwrap();

    assert_eq!(engine.metrics().executions, 2);
    assert_eq!(engine.node_count(), 2);
}

#[test]
fn test_concurrent_requests_share_one_computation() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(&dir, "input.txt", b"hello");

    let counter = Arc::new(AtomicUsize::new(0));
    let body_counter = Arc::clone(&counter);
    let mut registry = RuleRegistry::new();
    registry.register::<FileDigest, _>(
        "digest_file",
        vec![Selector::select::<SourceFile>()],
        move |ctx: &TaskContext, inputs: &[Value]| -> Result<Value, RuleError> {
            body_counter.fetch_add(1, Ordering::SeqCst);
            // Widen the race window.
            std::thread::sleep(Duration::from_millis(20));
            digest_body(ctx, inputs)
        },
    );
    registry.query::<FileDigest>([ProductType::of::<SourceFile>()]);
    let engine = Engine::with_config(
        registry,
        EngineConfig {
            workers: 4,
            cache_path: None,
        },
    )
    .unwrap();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let engine = &engine;
            let path = &path;
            scope.spawn(move || {
                let session = engine.session();
                session.product::<FileDigest>(source_params(path)).unwrap();
            });
        }
    });

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(engine.node_count(), 1);
}

#[test]
fn test_invalidation_recomputes_changed_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(&dir, "input.txt", b"one");

    let engine = pipeline_engine();
    let session = engine.session();
    let before = session.product::<Summary>(source_params(&path)).unwrap();

    std::fs::write(&path, b"two").unwrap();
    assert_eq!(engine.invalidate_paths([&path]), 2);

    let after = session.product::<Summary>(source_params(&path)).unwrap();
    assert_ne!(*before, *after);
    assert_eq!(
        after.0,
        format!("digest:{}", Digest::of_bytes(b"two").to_hex())
    );
    assert_eq!(engine.metrics().executions, 4);
}

#[test]
fn test_unrelated_path_does_not_invalidate() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(&dir, "input.txt", b"one");
    let other = write_source(&dir, "other.txt", b"noise");

    let engine = pipeline_engine();
    let session = engine.session();
    session.product::<Summary>(source_params(&path)).unwrap();

    assert_eq!(engine.invalidate_paths([&other]), 0);
    session.product::<Summary>(source_params(&path)).unwrap();

    assert_eq!(engine.metrics().executions, 2);
}

#[test]
fn test_noop_touch_confirms_without_rerunning() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(&dir, "input.txt", b"stable");

    let engine = pipeline_engine();
    let session = engine.session();
    session.product::<Summary>(source_params(&path)).unwrap();

    // Rewrite with identical content, then report the change.
    std::fs::write(&path, b"stable").unwrap();
    assert_eq!(engine.invalidate_paths([&path]), 2);
    session.product::<Summary>(source_params(&path)).unwrap();

    let metrics = engine.metrics();
    assert_eq!(metrics.executions, 2);
    assert!(metrics.early_cutoffs >= 1);
}

#[test]
fn test_failure_propagates_with_chain() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.txt");

    let engine = pipeline_engine();
    let session = engine.session();
    let err = session
        .request(ProductType::of::<Summary>(), source_params(&missing))
        .unwrap_err();

    match &err {
        EngineError::DependencyFailed { chain, .. } => {
            assert_eq!(chain, &["FileDigest".to_string(), "Summary".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    match err.origin() {
        EngineError::Execution { rule, message, .. } => {
            assert_eq!(rule, "digest_file");
            assert!(message.contains("failed to read"));
        }
        other => panic!("unexpected origin: {other}"),
    }
}

#[test]
fn test_failure_is_isolated_per_params() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_source(&dir, "good.txt", b"fine");
    let missing = dir.path().join("missing.txt");

    let engine = pipeline_engine();
    let session = engine.session();

    session
        .request(ProductType::of::<Summary>(), source_params(&missing))
        .unwrap_err();
    let summary = session.product::<Summary>(source_params(&good)).unwrap();
    assert_eq!(
        summary.0,
        format!("digest:{}", Digest::of_bytes(b"fine").to_hex())
    );
}

#[test]
fn test_failed_node_recovers_after_invalidation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("late.txt");

    let engine = pipeline_engine();
    let session = engine.session();
    session
        .request(ProductType::of::<Summary>(), source_params(&path))
        .unwrap_err();

    // The failure is cached until something changes.
    session
        .request(ProductType::of::<Summary>(), source_params(&path))
        .unwrap_err();

    std::fs::write(&path, b"arrived").unwrap();
    engine.invalidate_all();
    let summary = session.product::<Summary>(source_params(&path)).unwrap();
    assert_eq!(
        summary.0,
        format!("digest:{}", Digest::of_bytes(b"arrived").to_hex())
    );
}

#[test]
fn test_timeout_fails_outstanding_request() {
    let mut registry = RuleRegistry::new();
    registry.register::<Summary, _>(
        "slow_summary",
        vec![Selector::select::<SourceFile>()],
        |_: &TaskContext, _: &[Value]| -> Result<Value, RuleError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(Value::new(Summary("late".into()))?)
        },
    );
    registry.query::<Summary>([ProductType::of::<SourceFile>()]);
    let engine = Engine::new(registry).unwrap();

    let session = engine.session().with_timeout(Duration::from_millis(50));
    let err = session
        .request(
            ProductType::of::<Summary>(),
            Params::single(SourceFile("x".into())).unwrap(),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::Timeout));
}

#[test]
fn test_cancelled_session_rejects_requests() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(&dir, "input.txt", b"hello");

    let engine = pipeline_engine();
    let session = engine.session();
    session.cancel();

    let err = session
        .request(ProductType::of::<Summary>(), source_params(&path))
        .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
}

#[test]
fn test_undeclared_root_is_rejected() {
    let engine = pipeline_engine();
    let session = engine.session();

    // FileDigest roots are declared with a SourceFile param; empty params
    // match no declared query.
    let err = session
        .request(ProductType::of::<FileDigest>(), Params::new())
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownRoot { .. }));
}

#[test]
fn test_request_all_runs_roots_concurrently() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_source(&dir, "a.txt", b"alpha");
    let b = write_source(&dir, "b.txt", b"beta");
    let missing = dir.path().join("missing.txt");

    let engine = pipeline_engine();
    let session = engine.session();
    let results = session.request_all(vec![
        (ProductType::of::<Summary>(), source_params(&a)),
        (ProductType::of::<Summary>(), source_params(&b)),
        (ProductType::of::<Summary>(), source_params(&missing)),
    ]);

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(results[1].is_ok());
    assert!(results[2].is_err());
}

#[test]
fn test_persisted_cache_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(&dir, "input.txt", b"hello");
    let cache_path = dir.path().join("cache.json");

    let config = EngineConfig {
        workers: 2,
        cache_path: Some(cache_path.clone()),
    };

    let first = {
        let engine = Engine::with_config(pipeline_registry(), config.clone()).unwrap();
        let session = engine.session();
        let summary = session.product::<Summary>(source_params(&path)).unwrap();
        assert_eq!(engine.metrics().executions, 2);
        engine.flush_cache().unwrap();
        summary.0.clone()
    };
    assert!(cache_path.exists());

    let engine = Engine::with_config(pipeline_registry(), config).unwrap();
    let session = engine.session();
    let summary = session.product::<Summary>(source_params(&path)).unwrap();

    assert_eq!(summary.0, first);
    let metrics = engine.metrics();
    assert_eq!(metrics.executions, 0);
    assert_eq!(metrics.persisted_hits, 2);
}

#[test]
fn test_persisted_cache_rejects_changed_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(&dir, "input.txt", b"before");
    let cache_path = dir.path().join("cache.json");

    let config = EngineConfig {
        workers: 2,
        cache_path: Some(cache_path.clone()),
    };

    {
        let engine = Engine::with_config(pipeline_registry(), config.clone()).unwrap();
        let session = engine.session();
        session.product::<FileDigest>(source_params(&path)).unwrap();
        engine.flush_cache().unwrap();
    }

    std::fs::write(&path, b"after").unwrap();
    let engine = Engine::with_config(pipeline_registry(), config).unwrap();
    let session = engine.session();
    let digest = session.product::<FileDigest>(source_params(&path)).unwrap();

    assert_eq!(digest.0, Digest::of_bytes(b"after").to_hex());
    assert_eq!(engine.metrics().persisted_hits, 0);
    assert_eq!(engine.metrics().executions, 1);
}
