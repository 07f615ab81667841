//! Scheduler and executor
//!
//! Drives node graph evaluation: demand-driven expansion against the
//! static rule graph, memoization keyed by node identity, at most one
//! in-flight computation per node, and a bounded worker pool executing
//! runnable rule bodies. The node table is mutated only under a single
//! graph lock; rule bodies run outside it.

use crate::cache::{CacheError, CacheStats, ContentCache, PersistedEntry};
use crate::error::{EngineError, RuleGraphError};
use crate::graph::{DepSource, Finished, NodeEntry, NodeGraph, NodeId, NodeState, SessionId};
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::params::{format_type_set, Params};
use crate::rule_graph::{DepResolution, EntryKey, Resolution, RootMatch, RuleGraph};
use crate::rules::{RuleRegistry, TaskContext, MISSING_READ};
use crate::session::{Session, SessionShared};
use crate::value::Value;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use quarry_types::{Digest, DigestBuilder, ProductType};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// Engine construction options.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker pool size. Defaults to the available parallelism.
    pub workers: usize,

    /// Where to load and persist the content cache. `None` disables
    /// persistence.
    pub cache_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            cache_path: None,
        }
    }
}

/// Queue of runnable nodes feeding the worker pool.
pub(crate) struct WorkQueue {
    jobs: Mutex<VecDeque<NodeId>>,
    ready: Condvar,
    shutdown: AtomicBool,
}

impl WorkQueue {
    fn new() -> Self {
        WorkQueue {
            jobs: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    pub(crate) fn push(&self, id: NodeId) {
        self.jobs.lock().push_back(id);
        self.ready.notify_one();
    }

    fn pop(&self) -> Option<NodeId> {
        let mut jobs = self.jobs.lock();
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }
            if let Some(id) = jobs.pop_front() {
                return Some(id);
            }
            self.ready.wait(&mut jobs);
        }
    }

    fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.ready.notify_all();
    }
}

/// The engine: compiled rule graph, shared node cache, and worker pool.
///
/// All state is owned here; [`Session`]s hold only a reference. Dropping
/// the engine stops the workers after their current bodies finish.
pub struct Engine {
    inner: Arc<EngineInner>,
    workers: Vec<JoinHandle<()>>,
}

pub(crate) struct EngineInner {
    pub(crate) registry: RuleRegistry,
    pub(crate) rule_graph: RuleGraph,
    pub(crate) graph: Mutex<NodeGraph>,
    pub(crate) queue: WorkQueue,
    /// Bumped once per invalidation batch.
    pub(crate) generation: AtomicU64,
    pub(crate) sessions: DashMap<SessionId, Arc<SessionShared>>,
    next_session: AtomicU64,
    pub(crate) metrics: EngineMetrics,
    cache: Option<ContentCache>,
    cache_path: Option<PathBuf>,
}

/// How a root request resolves before any waiting happens.
pub(crate) enum RootDemand {
    /// The product was itself a supplied parameter.
    Immediate(Value),
    /// A node to wait on.
    Node(NodeId),
}

struct Job {
    id: NodeId,
    rule: crate::rules::RuleId,
    identity: Digest,
    inputs: Vec<Value>,
    input_digests: Vec<Digest>,
    prev: Option<Finished>,
}

impl Engine {
    /// Build an engine with default configuration. Fails if the rule set
    /// does not validate; no partial engine is usable.
    pub fn new(registry: RuleRegistry) -> Result<Self, RuleGraphError> {
        Engine::with_config(registry, EngineConfig::default())
    }

    /// Build an engine with explicit configuration.
    pub fn with_config(
        registry: RuleRegistry,
        config: EngineConfig,
    ) -> Result<Self, RuleGraphError> {
        let rule_graph = RuleGraph::build(&registry)?;
        Ok(Engine::from_parts(registry, rule_graph, config))
    }

    fn from_parts(registry: RuleRegistry, rule_graph: RuleGraph, config: EngineConfig) -> Self {
        let cache = config.cache_path.as_ref().map(|path| {
            ContentCache::load_or_empty(path).unwrap_or_else(|err| {
                tracing::warn!(%err, "ignoring unreadable persisted cache");
                ContentCache::new()
            })
        });

        let inner = Arc::new(EngineInner {
            registry,
            rule_graph,
            graph: Mutex::new(NodeGraph::new()),
            queue: WorkQueue::new(),
            generation: AtomicU64::new(1),
            sessions: DashMap::new(),
            next_session: AtomicU64::new(1),
            metrics: EngineMetrics::new(),
            cache,
            cache_path: config.cache_path,
        });

        let workers = (0..config.workers.max(1))
            .map(|i| {
                let inner = Arc::clone(&inner);
                std::thread::Builder::new()
                    .name(format!("quarry-worker-{i}"))
                    .spawn(move || worker_loop(inner))
                    .expect("failed to spawn quarry worker thread")
            })
            .collect();

        Engine { inner, workers }
    }

    /// Open a new request scope.
    pub fn session(&self) -> Session<'_> {
        let id = self.inner.next_session.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::new(SessionShared::new());
        self.inner.sessions.insert(id, Arc::clone(&shared));
        Session::new(self, id, shared)
    }

    /// Snapshot of scheduler and cache-effectiveness counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Statistics for the persisted cache, if one is configured.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.inner.cache.as_ref().map(ContentCache::stats)
    }

    /// Write the persisted cache back to disk, if configured.
    pub fn flush_cache(&self) -> Result<(), CacheError> {
        if let (Some(cache), Some(path)) = (&self.inner.cache, &self.inner.cache_path) {
            cache.save(path)?;
        }
        Ok(())
    }

    /// Number of nodes currently materialized in the runtime graph.
    pub fn node_count(&self) -> usize {
        self.inner.graph.lock().len()
    }

    pub(crate) fn inner(&self) -> &EngineInner {
        &self.inner
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.inner.queue.stop();
        for handle in std::mem::take(&mut self.workers) {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("rules", &self.inner.registry.len())
            .field("workers", &self.workers.len())
            .finish()
    }
}

fn worker_loop(inner: Arc<EngineInner>) {
    while let Some(id) = inner.queue.pop() {
        inner.evaluate(id);
    }
}

impl EngineInner {
    pub(crate) fn session_live(&self, id: SessionId) -> bool {
        self.sessions
            .get(&id)
            .map(|s| !s.is_cancelled())
            .unwrap_or(false)
    }

    /// Resolve a root request into either an immediate param value or a
    /// node to await, expanding the node graph as needed.
    pub(crate) fn demand_root(
        &self,
        session: SessionId,
        product: ProductType,
        params: &Params,
    ) -> Result<RootDemand, EngineError> {
        let provided = params.type_set();
        let root_key = match self.rule_graph.root_for(product, &provided) {
            RootMatch::One(key) => key.clone(),
            RootMatch::None => {
                return Err(EngineError::UnknownRoot {
                    product: product.name().to_string(),
                    params: format_type_set(&provided),
                })
            }
            RootMatch::Ambiguous(candidates) => {
                return Err(EngineError::AmbiguousRoot {
                    product: product.name().to_string(),
                    params: format_type_set(&provided),
                    candidates: candidates
                        .iter()
                        .map(|key| format!("[{}]", format_type_set(&key.params)))
                        .collect(),
                })
            }
        };

        match self.rule_graph.resolution(&root_key) {
            Some(Resolution::Param(t)) => {
                let value = params.get(*t).cloned().ok_or_else(|| EngineError::MissingParam {
                    product: t.name().to_string(),
                })?;
                Ok(RootDemand::Immediate(value))
            }
            Some(Resolution::Rule(_)) => {
                let mut graph = self.graph.lock();
                let mut path = Vec::new();
                let mut visited = HashSet::new();
                let id =
                    self.demand_entry(&mut graph, &root_key, params, session, &mut path, &mut visited)?;
                Ok(RootDemand::Node(id))
            }
            None => Err(EngineError::UnknownRoot {
                product: product.name().to_string(),
                params: format_type_set(&provided),
            }),
        }
    }

    /// Demand the node for an entry key, creating it (and its dependency
    /// subgraph) on first request. `scope` carries the parameter values
    /// available at this point in the graph; node identity is computed
    /// over the subset the resolved plan actually consumes, so requests
    /// differing only in unconsumed parameters share nodes.
    fn demand_entry(
        &self,
        graph: &mut NodeGraph,
        key: &EntryKey,
        scope: &Params,
        session: SessionId,
        path: &mut Vec<(Digest, ProductType)>,
        visited: &mut HashSet<NodeId>,
    ) -> Result<NodeId, EngineError> {
        let resolution = match self.rule_graph.resolution(key) {
            Some(Resolution::Rule(rr)) => rr.clone(),
            _ => {
                // Param resolutions are satisfied inline by callers; a
                // missing resolution means the key was never validated.
                return Err(EngineError::UnknownRoot {
                    product: key.product.name().to_string(),
                    params: format_type_set(&key.params),
                });
            }
        };

        let rule = self.registry.rule(resolution.rule);
        let params = scope.restrict(&resolution.consumed);
        let identity = DigestBuilder::new()
            .update(rule.fingerprint().as_bytes())
            .update(params.digest().as_bytes())
            .finish();

        if let Some(pos) = path.iter().position(|(d, _)| *d == identity) {
            let mut chain: Vec<String> =
                path[pos..].iter().map(|(_, p)| p.name().to_string()).collect();
            chain.push(key.product.name().to_string());
            return Err(EngineError::RuntimeCycle { chain });
        }

        if let Some(id) = graph.lookup(&identity) {
            let entry = graph.node(id);
            if entry.is_final() {
                self.metrics.record_hit();
            } else if matches!(entry.state, NodeState::Done(_)) {
                // Dirty result: revalidation counts as a miss.
                self.metrics.record_miss();
            }
            self.revive(graph, id, &[session], visited);
            return Ok(id);
        }

        path.push((identity, key.product));
        let mut deps = Vec::with_capacity(resolution.deps.len());
        let mut remaining = 0;
        for dep in &resolution.deps {
            match dep {
                DepResolution::Param(t) => deps.push(DepSource::Param(*t)),
                DepResolution::Entry(subkey) => {
                    let child =
                        self.demand_entry(graph, subkey, &params, session, path, visited)?;
                    if !graph.node(child).is_final() {
                        remaining += 1;
                    }
                    deps.push(DepSource::Node(child));
                }
            }
        }
        path.pop();

        let runnable = remaining == 0;
        let id = graph.insert(NodeEntry {
            product: key.product,
            rule: resolution.rule,
            params,
            identity,
            deps: deps.clone(),
            dependents: Vec::new(),
            interest: HashSet::from([session]),
            waiters: Vec::new(),
            dirty: false,
            prev: None,
            state: if runnable {
                NodeState::Queued
            } else {
                NodeState::Waiting { remaining }
            },
        });
        for dep in &deps {
            if let DepSource::Node(d) = dep {
                graph.add_dependent(*d, id);
            }
        }
        visited.insert(id);
        if runnable {
            self.queue.push(id);
        }
        self.metrics.record_miss();
        tracing::trace!(node = id.0, product = %key.product, runnable, "node created");
        Ok(id)
    }

    /// Re-demand an existing node: extend interest, restart re-evaluation
    /// of dirty results, and unpark `Ready` nodes. Returns whether the
    /// node is final right now.
    pub(crate) fn revive(
        &self,
        graph: &mut NodeGraph,
        id: NodeId,
        sessions: &[SessionId],
        visited: &mut HashSet<NodeId>,
    ) -> bool {
        if !visited.insert(id) {
            return graph.node(id).is_final();
        }

        graph
            .node_mut(id)
            .interest
            .extend(sessions.iter().copied());

        enum Step {
            Final,
            InFlight,
            Requeue,
            Reverify(Vec<NodeId>),
            WaitOn(Vec<NodeId>),
        }

        let step = {
            let entry = graph.node(id);
            match &entry.state {
                NodeState::Done(_) if !entry.dirty => Step::Final,
                NodeState::Done(_) => Step::Reverify(node_deps(entry)),
                NodeState::Waiting { .. } => Step::WaitOn(node_deps(entry)),
                NodeState::Ready => Step::Requeue,
                NodeState::Queued | NodeState::Running => Step::InFlight,
            }
        };

        match step {
            Step::Final => true,
            Step::InFlight => false,
            Step::Requeue => {
                let entry = graph.node_mut(id);
                entry.state = NodeState::Queued;
                entry.dirty = false;
                self.queue.push(id);
                false
            }
            Step::Reverify(dep_ids) => {
                {
                    let entry = graph.node_mut(id);
                    if let NodeState::Done(finished) =
                        std::mem::replace(&mut entry.state, NodeState::Waiting { remaining: 0 })
                    {
                        entry.prev = Some(finished);
                    }
                    entry.dirty = false;
                }
                tracing::trace!(node = id.0, "re-verifying dirty node");
                self.settle(graph, id, dep_ids, sessions, visited);
                false
            }
            Step::WaitOn(dep_ids) => {
                self.settle(graph, id, dep_ids, sessions, visited);
                false
            }
        }
    }

    /// Revive a node's dependencies and re-derive its waiting count,
    /// queueing it if everything below is already final.
    fn settle(
        &self,
        graph: &mut NodeGraph,
        id: NodeId,
        dep_ids: Vec<NodeId>,
        sessions: &[SessionId],
        visited: &mut HashSet<NodeId>,
    ) {
        let mut remaining = 0;
        for dep in dep_ids {
            if !self.revive(graph, dep, sessions, visited) {
                remaining += 1;
            }
        }
        let entry = graph.node_mut(id);
        if let NodeState::Waiting { .. } = entry.state {
            if remaining == 0 {
                entry.state = NodeState::Queued;
                self.queue.push(id);
            } else {
                entry.state = NodeState::Waiting { remaining };
            }
        }
    }

    /// Execute one queued node: gather inputs, then either reuse a
    /// digest-stable prior result, restore a validated persisted result,
    /// or run the rule body.
    fn evaluate(&self, id: NodeId) {
        let job = {
            let mut graph = self.graph.lock();
            if !matches!(graph.node(id).state, NodeState::Queued) {
                return;
            }

            // Cancellation: park work nobody live wants. Nodes shared
            // with still-live sessions keep going.
            let live = graph
                .node(id)
                .interest
                .iter()
                .any(|s| self.session_live(*s));
            if !live {
                graph.node_mut(id).state = NodeState::Ready;
                tracing::trace!(node = id.0, "parked: no live interested session");
                return;
            }

            let (deps, params, product) = {
                let entry = graph.node(id);
                (entry.deps.clone(), entry.params.clone(), entry.product)
            };

            let mut inputs = Vec::with_capacity(deps.len());
            let mut input_digests = Vec::with_capacity(deps.len());
            let mut failure: Option<EngineError> = None;
            let mut untrusted_deps: Vec<NodeId> = Vec::new();

            for dep in &deps {
                match dep {
                    DepSource::Param(t) => match params.get(*t) {
                        Some(value) => {
                            input_digests.push(value.digest());
                            inputs.push(value.clone());
                        }
                        None => {
                            failure = Some(EngineError::MissingParam {
                                product: t.name().to_string(),
                            });
                            break;
                        }
                    },
                    DepSource::Node(d) => {
                        let dep_entry = graph.node(*d);
                        match dep_entry.finished() {
                            Some(finished) if !dep_entry.dirty => match &finished.result {
                                Ok(value) => {
                                    input_digests.push(value.digest());
                                    inputs.push(value.clone());
                                }
                                Err(err) => {
                                    failure = Some(err.clone().for_dependent(
                                        product.name(),
                                        dep_entry.product.name(),
                                    ));
                                    break;
                                }
                            },
                            // Invalidated (or otherwise unsettled) since
                            // this node was queued.
                            _ => untrusted_deps.push(*d),
                        }
                    }
                }
            }

            if let Some(err) = failure {
                self.finalize(
                    &mut graph,
                    id,
                    Finished {
                        result: Err(err),
                        output_digest: None,
                        input_digests: Vec::new(),
                        file_reads: BTreeMap::new(),
                    },
                );
                return;
            }

            if !untrusted_deps.is_empty() {
                let sessions: Vec<SessionId> =
                    graph.node(id).interest.iter().copied().collect();
                graph.node_mut(id).state = NodeState::Waiting { remaining: 0 };
                let mut visited = HashSet::new();
                self.settle(&mut graph, id, untrusted_deps, &sessions, &mut visited);
                return;
            }

            let entry = graph.node_mut(id);
            entry.state = NodeState::Running;
            entry.dirty = false;
            // Left on the entry so finalize can reindex away paths the
            // new computation no longer reads.
            Job {
                id,
                rule: entry.rule,
                identity: entry.identity,
                inputs,
                input_digests,
                prev: entry.prev.clone(),
            }
        };

        let finished = self.compute(job);
        let mut graph = self.graph.lock();
        self.finalize(&mut graph, id, finished);
    }

    /// Run outside the graph lock: digest checks, persisted-cache
    /// validation, and the rule body itself.
    fn compute(&self, job: Job) -> Finished {
        let rule = self.registry.rule(job.rule);

        // Digest-stable recomputation avoidance: if everything the prior
        // computation consumed is unchanged, confirm and keep it.
        if let Some(prev) = &job.prev {
            if prev.result.is_ok()
                && prev.input_digests == job.input_digests
                && file_reads_unchanged(&prev.file_reads)
            {
                self.metrics.record_early_cutoff();
                tracing::debug!(rule = rule.name(), "early cutoff: inputs unchanged");
                return Finished {
                    result: prev.result.clone(),
                    output_digest: prev.output_digest,
                    input_digests: job.input_digests,
                    file_reads: prev.file_reads.clone(),
                };
            }
        }

        if job.prev.is_none() {
            if let Some(cache) = &self.cache {
                if let Some(entry) = cache.get(&job.identity) {
                    if entry.matches_inputs(&job.input_digests)
                        && file_reads_unchanged(&entry.file_reads)
                    {
                        if let Ok(value) = rule.decode(entry.value_json.as_bytes()) {
                            if value.digest() == entry.output_digest {
                                self.metrics.record_persisted_hit();
                                tracing::debug!(rule = rule.name(), "restored from persisted cache");
                                return Finished {
                                    result: Ok(value),
                                    output_digest: Some(entry.output_digest),
                                    input_digests: job.input_digests,
                                    file_reads: entry.file_reads,
                                };
                            }
                        }
                    }
                }
            }
        }

        let ctx = TaskContext::new();
        let start = Instant::now();
        let outcome = rule.body().run(&ctx, &job.inputs);
        self.metrics.record_execution(start.elapsed());
        let file_reads = ctx.into_reads();

        let result = match outcome {
            Ok(value) if value.product() == rule.output() => Ok(value),
            Ok(value) => Err(EngineError::Execution {
                rule: rule.name().to_string(),
                product: rule.output().name().to_string(),
                message: format!(
                    "rule returned {} instead of {}",
                    value.product(),
                    rule.output()
                ),
            }),
            Err(err) => Err(EngineError::Execution {
                rule: rule.name().to_string(),
                product: rule.output().name().to_string(),
                message: err.0,
            }),
        };

        if let Err(err) = &result {
            tracing::debug!(rule = rule.name(), %err, "rule body failed");
        }

        let output_digest = result.as_ref().ok().map(Value::digest);
        if let (Some(cache), Ok(value)) = (&self.cache, &result) {
            cache.put(
                job.identity,
                PersistedEntry {
                    value_json: String::from_utf8_lossy(value.bytes()).into_owned(),
                    output_digest: value.digest(),
                    input_digests: job.input_digests.clone(),
                    file_reads: file_reads.clone(),
                },
            );
        }

        Finished {
            result,
            output_digest,
            input_digests: job.input_digests,
            file_reads,
        }
    }

    /// Store a finalized result, wake waiters, and make dependents
    /// runnable. Must hold the graph lock.
    pub(crate) fn finalize(&self, graph: &mut NodeGraph, id: NodeId, finished: Finished) {
        let old_reads = graph
            .node_mut(id)
            .prev
            .take()
            .map(|p| p.file_reads)
            .unwrap_or_default();
        graph.reindex_paths(id, &old_reads, &finished.file_reads);

        let dependents = {
            let entry = graph.node_mut(id);
            let ok = finished.result.is_ok();
            entry.state = NodeState::Done(finished);
            for waiter in entry.waiters.drain(..) {
                let _ = waiter.send(());
            }
            tracing::trace!(node = id.0, ok, dirty = entry.dirty, "node finalized");
            entry.dependents.clone()
        };

        for dep_id in dependents {
            let dep = graph.node_mut(dep_id);
            if let NodeState::Waiting { remaining } = &mut dep.state {
                *remaining = remaining.saturating_sub(1);
                if *remaining == 0 {
                    dep.state = NodeState::Queued;
                    self.queue.push(dep_id);
                }
            }
        }
    }
}

fn node_deps(entry: &NodeEntry) -> Vec<NodeId> {
    entry
        .deps
        .iter()
        .filter_map(|dep| match dep {
            DepSource::Node(id) => Some(*id),
            DepSource::Param(_) => None,
        })
        .collect()
}

/// Re-digest recorded file reads; true when every path still has the
/// digest the computation observed (a touch with identical content counts
/// as unchanged). A path recorded as [`MISSING_READ`] is unchanged only
/// while it stays unreadable.
fn file_reads_unchanged(reads: &BTreeMap<PathBuf, Digest>) -> bool {
    reads.iter().all(|(path, digest)| match Digest::of_file(path) {
        Ok(d) => d == *digest,
        Err(_) => *digest == MISSING_READ,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleError;
    use crate::selector::Selector;
    use serde::{Deserialize, Serialize};
    use std::collections::{BTreeSet, HashMap};

    #[derive(Serialize, Deserialize)]
    struct Alpha(u32);

    #[derive(Serialize, Deserialize)]
    struct Beta(u32);

    fn alpha_body(_: &TaskContext, _: &[Value]) -> Result<Value, RuleError> {
        Ok(Value::new(Alpha(0))?)
    }

    fn beta_body(_: &TaskContext, _: &[Value]) -> Result<Value, RuleError> {
        Ok(Value::new(Beta(0))?)
    }

    /// A hand-built cyclic rule graph. Construction would normally reject
    /// this shape, so the runtime detector is exercised directly.
    fn cyclic_engine() -> Engine {
        let mut registry = RuleRegistry::new();
        let rule_a = registry.register::<Alpha, _>(
            "alpha_from_beta",
            vec![Selector::select::<Beta>()],
            alpha_body,
        );
        let rule_b = registry.register::<Beta, _>(
            "beta_from_alpha",
            vec![Selector::select::<Alpha>()],
            beta_body,
        );

        let key_a = EntryKey::new(ProductType::of::<Alpha>(), BTreeSet::new());
        let key_b = EntryKey::new(ProductType::of::<Beta>(), BTreeSet::new());

        let mut resolutions = HashMap::new();
        resolutions.insert(
            key_a.clone(),
            Resolution::Rule(crate::rule_graph::RuleResolution {
                rule: rule_a,
                deps: vec![DepResolution::Entry(key_b.clone())],
                consumed: BTreeSet::new(),
            }),
        );
        resolutions.insert(
            key_b,
            Resolution::Rule(crate::rule_graph::RuleResolution {
                rule: rule_b,
                deps: vec![DepResolution::Entry(key_a.clone())],
                consumed: BTreeSet::new(),
            }),
        );

        let rule_graph = RuleGraph::from_parts(resolutions, vec![key_a]);
        Engine::from_parts(registry, rule_graph, EngineConfig::default())
    }

    #[test]
    fn test_runtime_cycle_fails_instead_of_hanging() {
        let engine = cyclic_engine();
        let session = engine.session();

        let err = session
            .request(ProductType::of::<Alpha>(), Params::new())
            .unwrap_err();
        match err {
            EngineError::RuntimeCycle { chain } => {
                assert_eq!(chain, vec!["Alpha", "Beta", "Alpha"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_work_queue_shutdown_unblocks_pop() {
        let queue = WorkQueue::new();
        queue.push(NodeId(7));

        assert_eq!(queue.pop(), Some(NodeId(7)));
        queue.stop();
        assert_eq!(queue.pop(), None);
    }
}
