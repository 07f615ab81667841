//! Invalidation
//!
//! Converts external change reports into dirty marks on the node graph.
//! Marking is a reverse-edge walk from the nodes that read a changed path;
//! it never recomputes anything. Recomputation happens on the next demand,
//! where digest comparison separates real changes from no-op touches.

use crate::graph::{NodeGraph, NodeId};
use crate::rules::normalize_path;
use crate::scheduler::Engine;
use quarry_types::PathEvent;
use std::path::Path;
use std::sync::atomic::Ordering;

impl Engine {
    /// Mark every node whose computation read one of `paths` as dirty,
    /// along with all transitive dependents. Returns the number of nodes
    /// newly marked.
    ///
    /// Cheap relative to recomputation; callers report changes eagerly
    /// and let re-verification sort out false positives.
    pub fn invalidate_paths<I, P>(&self, paths: I) -> usize
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let inner = self.inner();
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let mut graph = inner.graph.lock();
        let seeds: Vec<NodeId> = paths
            .into_iter()
            .flat_map(|path| {
                let normalized = normalize_path(path.as_ref());
                graph.nodes_for_path(&normalized).collect::<Vec<_>>()
            })
            .collect();

        let marked = mark_dirty(&mut graph, seeds);
        inner.metrics.record_invalidated(marked as u64);
        if marked > 0 {
            tracing::debug!(generation, marked, "invalidated nodes for changed paths");
        }
        marked
    }

    /// Apply a batch of watcher events.
    pub fn invalidate_events(&self, events: &[PathEvent]) -> usize {
        self.invalidate_paths(events.iter().map(|event| event.path.as_path()))
    }

    /// Mark the entire graph dirty. Nothing is recomputed until demanded
    /// again, and unchanged results still short-circuit on digests.
    pub fn invalidate_all(&self) -> usize {
        let inner = self.inner();
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let mut graph = inner.graph.lock();
        let seeds: Vec<NodeId> = graph.ids().collect();
        let marked = mark_dirty(&mut graph, seeds);
        inner.metrics.record_invalidated(marked as u64);
        tracing::debug!(generation, marked, "invalidated entire graph");
        marked
    }
}

/// Reverse-edge dirty walk. An already-dirty node terminates its branch:
/// its dependents were marked when it was.
fn mark_dirty(graph: &mut NodeGraph, seeds: Vec<NodeId>) -> usize {
    let mut stack = seeds;
    let mut marked = 0;
    while let Some(id) = stack.pop() {
        let entry = graph.node_mut(id);
        if entry.dirty {
            continue;
        }
        entry.dirty = true;
        marked += 1;
        stack.extend(graph.node(id).dependents.iter().copied());
    }
    marked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Params;
    use crate::rules::{RuleError, RuleRegistry, TaskContext};
    use crate::scheduler::EngineConfig;
    use crate::selector::Selector;
    use crate::value::Value;
    use quarry_types::{ChangeKind, ProductType};
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeSet;

    #[derive(Serialize, Deserialize)]
    struct SourceFile(String);

    #[derive(Serialize, Deserialize)]
    struct FileDigest(String);

    fn digest_body(ctx: &TaskContext, inputs: &[Value]) -> Result<Value, RuleError> {
        let source = inputs[0].get::<SourceFile>().ok_or("missing SourceFile")?;
        let bytes = ctx.read_file(Path::new(&source.0))?;
        Ok(Value::new(FileDigest(
            quarry_types::Digest::of_bytes(&bytes).to_hex(),
        ))?)
    }

    fn file_engine() -> Engine {
        let mut registry = RuleRegistry::new();
        registry.register::<FileDigest, _>(
            "digest_file",
            vec![Selector::select::<SourceFile>()],
            digest_body,
        );
        let params: BTreeSet<_> = [ProductType::of::<SourceFile>()].into();
        registry.query::<FileDigest>(params);
        Engine::with_config(registry, EngineConfig { workers: 2, cache_path: None }).unwrap()
    }

    #[test]
    fn test_unindexed_path_marks_nothing() {
        let engine = file_engine();
        assert_eq!(engine.invalidate_paths(["/no/such/file"]), 0);
    }

    #[test]
    fn test_changed_path_marks_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.txt");
        std::fs::write(&path, b"one").unwrap();

        let engine = file_engine();
        let session = engine.session();
        let params =
            Params::single(SourceFile(path.to_string_lossy().into_owned())).unwrap();
        session
            .request(ProductType::of::<FileDigest>(), params)
            .unwrap();

        assert_eq!(engine.invalidate_paths([&path]), 1);
        // Second report in the same batch shape: branch already dirty.
        assert_eq!(engine.invalidate_paths([&path]), 0);
    }

    #[test]
    fn test_event_batch_feeds_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.txt");
        std::fs::write(&path, b"one").unwrap();

        let engine = file_engine();
        let session = engine.session();
        let params =
            Params::single(SourceFile(path.to_string_lossy().into_owned())).unwrap();
        session
            .request(ProductType::of::<FileDigest>(), params)
            .unwrap();

        let events = vec![PathEvent {
            path: path.clone(),
            kind: ChangeKind::Modified,
        }];
        assert_eq!(engine.invalidate_events(&events), 1);
    }

    #[test]
    fn test_failed_read_recovers_after_create_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.txt");

        let engine = file_engine();
        let session = engine.session();
        let params =
            Params::single(SourceFile(path.to_string_lossy().into_owned())).unwrap();
        assert!(session
            .request(ProductType::of::<FileDigest>(), params.clone())
            .is_err());

        // The failed reader is indexed under the path it could not read,
        // so the file appearing marks it dirty.
        std::fs::write(&path, b"arrived").unwrap();
        let events = vec![PathEvent {
            path: path.clone(),
            kind: ChangeKind::Created,
        }];
        assert_eq!(engine.invalidate_events(&events), 1);

        let value = session
            .request(ProductType::of::<FileDigest>(), params)
            .unwrap();
        let digest = value.get::<FileDigest>().unwrap();
        assert_eq!(digest.0, quarry_types::Digest::of_bytes(b"arrived").to_hex());
    }

    #[derive(Serialize, Deserialize)]
    struct Pointer(String);

    #[derive(Serialize, Deserialize)]
    struct Resolved(String);

    fn follow_body(ctx: &TaskContext, inputs: &[Value]) -> Result<Value, RuleError> {
        let pointer = inputs[0].get::<Pointer>().ok_or("missing Pointer")?;
        let target = ctx.read_to_string(Path::new(&pointer.0))?;
        let contents = ctx.read_to_string(Path::new(target.trim()))?;
        Ok(Value::new(Resolved(contents))?)
    }

    fn pointer_engine() -> Engine {
        let mut registry = RuleRegistry::new();
        registry.register::<Resolved, _>(
            "follow_pointer",
            vec![Selector::select::<Pointer>()],
            follow_body,
        );
        let params: BTreeSet<_> = [ProductType::of::<Pointer>()].into();
        registry.query::<Resolved>(params);
        Engine::with_config(registry, EngineConfig { workers: 2, cache_path: None }).unwrap()
    }

    #[test]
    fn test_reindex_drops_paths_no_longer_read() {
        let dir = tempfile::tempdir().unwrap();
        let pointer = dir.path().join("pointer.txt");
        let first = dir.path().join("first.txt");
        let second = dir.path().join("second.txt");
        std::fs::write(&pointer, first.to_string_lossy().as_bytes()).unwrap();
        std::fs::write(&first, b"one").unwrap();
        std::fs::write(&second, b"two").unwrap();

        let engine = pointer_engine();
        let session = engine.session();
        let params =
            Params::single(Pointer(pointer.to_string_lossy().into_owned())).unwrap();
        let resolved = session.product::<Resolved>(params.clone()).unwrap();
        assert_eq!(resolved.0, "one");

        // Retarget the pointer and recompute.
        std::fs::write(&pointer, second.to_string_lossy().as_bytes()).unwrap();
        assert_eq!(engine.invalidate_paths([&pointer]), 1);
        let resolved = session.product::<Resolved>(params).unwrap();
        assert_eq!(resolved.0, "two");

        // The recomputation stopped reading the first target, so changes
        // to it no longer mark anything.
        assert_eq!(engine.invalidate_paths([&first]), 0);
        assert_eq!(engine.invalidate_paths([&second]), 1);
    }

    #[test]
    fn test_invalidate_all_marks_every_node() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.txt");
        std::fs::write(&path, b"one").unwrap();

        let engine = file_engine();
        let session = engine.session();
        let params =
            Params::single(SourceFile(path.to_string_lossy().into_owned())).unwrap();
        session
            .request(ProductType::of::<FileDigest>(), params)
            .unwrap();

        assert_eq!(engine.invalidate_all(), engine.node_count());
    }
}
