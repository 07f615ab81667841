//! Rule registry
//!
//! Collaborators register rules before the engine is built: an output
//! product type, an ordered list of input selectors, and a deterministic
//! body. The registry is immutable once the engine compiles its rule
//! graph; installing a different rule set means constructing a new engine,
//! which drops every cached node.

use crate::selector::Selector;
use crate::value::{Product, Value, ValueError};
use parking_lot::Mutex;
use quarry_types::{Digest, DigestBuilder, ProductType};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// A rule body's own failure, carried verbatim into the engine's
/// `Execution` error for the node that ran it.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct RuleError(pub String);

impl From<String> for RuleError {
    fn from(message: String) -> Self {
        RuleError(message)
    }
}

impl From<&str> for RuleError {
    fn from(message: &str) -> Self {
        RuleError(message.to_string())
    }
}

impl From<std::io::Error> for RuleError {
    fn from(err: std::io::Error) -> Self {
        RuleError(err.to_string())
    }
}

impl From<ValueError> for RuleError {
    fn from(err: ValueError) -> Self {
        RuleError(err.to_string())
    }
}

/// Execution context handed to a rule body.
///
/// Bodies must perform file reads through [`TaskContext::read_file`] (or
/// [`TaskContext::read_to_string`]) so the engine learns which paths the
/// node consumed and at which digests. Those recordings drive both
/// invalidation and no-op change detection.
#[derive(Debug, Default)]
pub struct TaskContext {
    reads: Mutex<BTreeMap<PathBuf, Digest>>,
}

impl TaskContext {
    pub(crate) fn new() -> Self {
        TaskContext::default()
    }

    /// Read a file's bytes, recording (path, content digest) on the node.
    ///
    /// A failed read is recorded too, under [`MISSING_READ`]: the node's
    /// outcome depended on the path being unreadable, and a later change
    /// to that path must invalidate it.
    pub fn read_file(&self, path: &Path) -> Result<Vec<u8>, RuleError> {
        match std::fs::read(path) {
            Ok(bytes) => {
                let digest = Digest::of_bytes(&bytes);
                self.reads.lock().insert(normalize_path(path), digest);
                Ok(bytes)
            }
            Err(e) => {
                self.reads.lock().insert(normalize_path(path), MISSING_READ);
                Err(RuleError(format!("failed to read {}: {e}", path.display())))
            }
        }
    }

    /// Read a file as UTF-8, recording the read.
    pub fn read_to_string(&self, path: &Path) -> Result<String, RuleError> {
        let bytes = self.read_file(path)?;
        String::from_utf8(bytes)
            .map_err(|e| RuleError(format!("{} is not valid UTF-8: {e}", path.display())))
    }

    pub(crate) fn into_reads(self) -> BTreeMap<PathBuf, Digest> {
        self.reads.into_inner()
    }
}

/// Recorded digest for a path a rule tried and failed to read. Keeps the
/// node in the path index so creating the file later marks it dirty, and
/// lets freshness checks treat still-unreadable as unchanged.
pub(crate) const MISSING_READ: Digest = Digest([0; 32]);

/// Paths are indexed in absolute form so that watcher events and rule
/// reads agree on identity regardless of how either spelled the path.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// The computation body of a rule.
pub trait RuleBody: Send + Sync {
    fn run(&self, ctx: &TaskContext, inputs: &[Value]) -> Result<Value, RuleError>;
}

impl<F> RuleBody for F
where
    F: Fn(&TaskContext, &[Value]) -> Result<Value, RuleError> + Send + Sync,
{
    fn run(&self, ctx: &TaskContext, inputs: &[Value]) -> Result<Value, RuleError> {
        self(ctx, inputs)
    }
}

/// Index of a rule in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleId(pub(crate) usize);

/// A registered rule.
pub struct Rule {
    name: String,
    output: ProductType,
    selectors: Vec<Selector>,
    body: Arc<dyn RuleBody>,
    decode: Arc<dyn Fn(&[u8]) -> Result<Value, ValueError> + Send + Sync>,
    fingerprint: Digest,
}

impl Rule {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output(&self) -> ProductType {
        self.output
    }

    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    pub(crate) fn body(&self) -> &Arc<dyn RuleBody> {
        &self.body
    }

    /// Decode a persisted value of this rule's output type.
    pub(crate) fn decode(&self, bytes: &[u8]) -> Result<Value, ValueError> {
        (self.decode)(bytes)
    }

    /// Stable identity of the rule: name, output, and selector shape.
    ///
    /// Part of every node identity, so renaming a rule or changing its
    /// inputs naturally invalidates persisted results.
    pub fn fingerprint(&self) -> Digest {
        self.fingerprint
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("output", &self.output.name())
            .field("selectors", &self.selectors)
            .finish()
    }
}

/// A declared root entry point: a product type requestable with a given
/// set of root parameter types. Only declared roots are resolvable at
/// runtime; everything else fails rule-graph validation up front.
#[derive(Debug, Clone)]
pub struct RootQuery {
    pub product: ProductType,
    pub param_types: BTreeSet<ProductType>,
}

/// The full set of rules and root queries the engine is built from.
#[derive(Default)]
pub struct RuleRegistry {
    rules: Vec<Rule>,
    by_output: HashMap<ProductType, Vec<RuleId>>,
    queries: Vec<RootQuery>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        RuleRegistry::default()
    }

    /// Register a rule producing `T` from the given selectors.
    ///
    /// The body receives input values resolved in selector order.
    pub fn register<T, B>(&mut self, name: impl Into<String>, selectors: Vec<Selector>, body: B) -> RuleId
    where
        T: Product + DeserializeOwned,
        B: Fn(&TaskContext, &[Value]) -> Result<Value, RuleError> + Send + Sync + 'static,
    {
        let name = name.into();
        let output = ProductType::of::<T>();

        let mut builder = DigestBuilder::new()
            .update(&name)
            .update(output.full_name());
        for selector in &selectors {
            let tag: &[u8] = match selector {
                Selector::Select(_) => b"select",
                Selector::Param(_) => b"param",
            };
            builder = builder.update(tag).update(selector.product().full_name());
        }
        let fingerprint = builder.finish();

        let id = RuleId(self.rules.len());
        self.rules.push(Rule {
            name,
            output,
            selectors,
            body: Arc::new(body),
            decode: Arc::new(|bytes| Value::from_bytes::<T>(bytes)),
            fingerprint,
        });
        self.by_output.entry(output).or_default().push(id);
        id
    }

    /// Declare that product `T` may be requested at the root with the
    /// given parameter types.
    pub fn query<T: Product>(&mut self, param_types: impl IntoIterator<Item = ProductType>) {
        self.queries.push(RootQuery {
            product: ProductType::of::<T>(),
            param_types: param_types.into_iter().collect(),
        });
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id.0]
    }

    pub fn rules_for(&self, output: ProductType) -> &[RuleId] {
        self.by_output
            .get(&output)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn queries(&self) -> &[RootQuery] {
        &self.queries
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("rules", &self.rules.len())
            .field("queries", &self.queries.len())
            .finish()
    }
}
