//! Runtime node graph
//!
//! Vertices are concrete (rule, parameters) instantiations; edges record
//! "this node's computation consumed that node's result". Nodes and edges
//! are indices into arenas so reverse-edge walks and concurrent mutation
//! never contend with ownership cycles. The whole structure is owned by
//! the engine and mutated only under its graph lock.

use crate::error::EngineError;
use crate::params::Params;
use crate::rules::RuleId;
use crate::value::Value;
use quarry_types::{Digest, ProductType};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

pub(crate) type SessionId = u64;

/// Index of a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(pub(crate) u32);

/// Where one input of a node comes from, in selector order.
#[derive(Debug, Clone)]
pub(crate) enum DepSource {
    /// Taken from the node's own params.
    Param(ProductType),
    /// The finalized result of another node.
    Node(NodeId),
}

/// A finalized computation.
///
/// Immutable once stored; re-evaluation replaces the whole record.
#[derive(Debug, Clone)]
pub(crate) struct Finished {
    pub(crate) result: Result<Value, EngineError>,
    /// Digest of the produced value. `None` for failures.
    pub(crate) output_digest: Option<Digest>,
    /// Digests of the inputs consumed, in selector order.
    pub(crate) input_digests: Vec<Digest>,
    /// Files the body read, with the content digests observed.
    pub(crate) file_reads: BTreeMap<PathBuf, Digest>,
}

#[derive(Debug)]
pub(crate) enum NodeState {
    /// Blocked on `remaining` unfinalized dependencies.
    Waiting { remaining: usize },
    /// Runnable but parked: no live session currently wants it.
    Ready,
    /// Enqueued for a worker.
    Queued,
    /// A worker is executing the body.
    Running,
    /// Finalized; trusted until the dirty flag says otherwise.
    Done(Finished),
}

#[derive(Debug)]
pub(crate) struct NodeEntry {
    pub(crate) product: ProductType,
    pub(crate) rule: RuleId,
    pub(crate) params: Params,
    pub(crate) identity: Digest,
    /// Inputs in selector order. Fixed at creation; the rule graph is
    /// static, so a node's dependency shape never changes.
    pub(crate) deps: Vec<DepSource>,
    /// Reverse edges, built incrementally as dependents expand.
    pub(crate) dependents: Vec<NodeId>,
    /// Sessions that transitively requested this node.
    pub(crate) interest: HashSet<SessionId>,
    /// Root waiters to wake on finalization.
    pub(crate) waiters: Vec<Sender<()>>,
    /// Set by invalidation; a dirty result is retained but not trusted.
    pub(crate) dirty: bool,
    /// Retained prior result while the node is being re-evaluated, so an
    /// unchanged recomputation can be recognized and short-circuited.
    pub(crate) prev: Option<Finished>,
    pub(crate) state: NodeState,
}

impl NodeEntry {
    /// A node is final when it holds a finalized result that is still
    /// trusted. Dirty results require re-verification before use.
    pub(crate) fn is_final(&self) -> bool {
        matches!(self.state, NodeState::Done(_)) && !self.dirty
    }

    pub(crate) fn finished(&self) -> Option<&Finished> {
        match &self.state {
            NodeState::Done(finished) => Some(finished),
            _ => None,
        }
    }
}

/// Arena-backed node table with identity and path indexes.
#[derive(Debug, Default)]
pub(crate) struct NodeGraph {
    nodes: Vec<NodeEntry>,
    by_identity: HashMap<Digest, NodeId>,
    /// File path -> nodes whose computation read that path.
    path_index: HashMap<PathBuf, HashSet<NodeId>>,
}

impl NodeGraph {
    pub(crate) fn new() -> Self {
        NodeGraph::default()
    }

    pub(crate) fn lookup(&self, identity: &Digest) -> Option<NodeId> {
        self.by_identity.get(identity).copied()
    }

    pub(crate) fn insert(&mut self, entry: NodeEntry) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.by_identity.insert(entry.identity, id);
        self.nodes.push(entry);
        id
    }

    pub(crate) fn node(&self, id: NodeId) -> &NodeEntry {
        &self.nodes[id.0 as usize]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut NodeEntry {
        &mut self.nodes[id.0 as usize]
    }

    /// Record the reverse edge dep -> dependent.
    pub(crate) fn add_dependent(&mut self, dep: NodeId, dependent: NodeId) {
        let dependents = &mut self.node_mut(dep).dependents;
        if !dependents.contains(&dependent) {
            dependents.push(dependent);
        }
    }

    /// Swap a node's recorded file reads in the path index.
    pub(crate) fn reindex_paths(
        &mut self,
        id: NodeId,
        old: &BTreeMap<PathBuf, Digest>,
        new: &BTreeMap<PathBuf, Digest>,
    ) {
        for path in old.keys() {
            if !new.contains_key(path) {
                if let Some(set) = self.path_index.get_mut(path) {
                    set.remove(&id);
                    if set.is_empty() {
                        self.path_index.remove(path);
                    }
                }
            }
        }
        for path in new.keys() {
            self.path_index.entry(path.clone()).or_default().insert(id);
        }
    }

    pub(crate) fn nodes_for_path(&self, path: &Path) -> impl Iterator<Item = NodeId> + '_ {
        self.path_index
            .get(path)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_types::ProductType;

    fn entry(identity: Digest) -> NodeEntry {
        NodeEntry {
            product: ProductType::of::<String>(),
            rule: RuleId(0),
            params: Params::new(),
            identity,
            deps: Vec::new(),
            dependents: Vec::new(),
            interest: HashSet::new(),
            waiters: Vec::new(),
            dirty: false,
            prev: None,
            state: NodeState::Ready,
        }
    }

    #[test]
    fn test_identity_lookup() {
        let mut graph = NodeGraph::new();
        let identity = Digest::of_bytes(b"node-a");

        assert!(graph.lookup(&identity).is_none());
        let id = graph.insert(entry(identity));
        assert_eq!(graph.lookup(&identity), Some(id));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_dependents_dedup() {
        let mut graph = NodeGraph::new();
        let a = graph.insert(entry(Digest::of_bytes(b"a")));
        let b = graph.insert(entry(Digest::of_bytes(b"b")));

        graph.add_dependent(a, b);
        graph.add_dependent(a, b);

        assert_eq!(graph.node(a).dependents, vec![b]);
    }

    #[test]
    fn test_path_reindex() {
        let mut graph = NodeGraph::new();
        let id = graph.insert(entry(Digest::of_bytes(b"a")));

        let old = BTreeMap::new();
        let mut new = BTreeMap::new();
        new.insert(PathBuf::from("/tmp/a.txt"), Digest::of_bytes(b"x"));
        graph.reindex_paths(id, &old, &new);

        let hits: Vec<_> = graph.nodes_for_path(Path::new("/tmp/a.txt")).collect();
        assert_eq!(hits, vec![id]);

        // Dropping the read removes the index entry.
        graph.reindex_paths(id, &new, &BTreeMap::new());
        assert_eq!(graph.nodes_for_path(Path::new("/tmp/a.txt")).count(), 0);
    }
}
