//! Quarry Rule Execution Engine
//!
//! A memoized, demand-driven execution engine over a statically validated
//! rule graph. Callers register rules (output product type, input
//! selectors, deterministic body) and declared root queries; the engine
//! compiles them into a rule graph, rejecting ambiguity, unreachable
//! products, and unterminated cycles before anything runs.
//!
//! # Architecture
//!
//! Execution is organized around **nodes** - concrete (rule, parameters)
//! instantiations in a runtime graph. A root request expands the subgraph
//! it needs, reuses any node already computed, and runs the rest on a
//! bounded worker pool with at most one in-flight computation per node.
//!
//! ## Incremental recomputation
//!
//! File changes are reported through invalidation, which marks transitive
//! dependents dirty without recomputing anything. On the next demand,
//! dirty nodes re-verify bottom-up: if every consumed digest (dependency
//! outputs and file contents) is unchanged, the prior result is confirmed
//! without running the body.
//!
//! ## Key Features
//!
//! - **Static validation**: rule ambiguity and unreachability fail at
//!   engine construction, never mid-build
//! - **Memoization**: identical (rule, params) demands share one node
//! - **Early Cutoff**: digest-stable recomputations stop propagating
//! - **Failure Propagation**: a failed dependency fails its dependents
//!   with the path from root to origin
//! - **Persisted Caching**: results survive restarts, validated by digest
//!
//! # Example
//!
//! ```rust,ignore
//! use quarry_engine::{Engine, Params, RuleRegistry, Selector, Value};
//!
//! let mut registry = RuleRegistry::new();
//! registry.register::<FileDigest, _>(
//!     "digest_file",
//!     vec![Selector::select::<SourceFile>()],
//!     digest_file_body,
//! );
//! registry.query::<FileDigest>([ProductType::of::<SourceFile>()]);
//!
//! let engine = Engine::new(registry)?;
//! let session = engine.session();
//! let digest = session.product::<FileDigest>(Params::single(source)?)?;
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cache;
pub mod error;
pub mod metrics;
pub mod params;
pub mod rules;
pub mod selector;
pub mod session;
pub mod value;

mod graph;
mod invalidation;
mod rule_graph;
mod scheduler;

// Re-export main types
pub use cache::{CacheError, CacheStats, ContentCache};
pub use error::{EngineError, RuleGraphError};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use params::Params;
pub use quarry_types::{ChangeKind, Digest, PathEvent, ProductType};
pub use rule_graph::RuleGraph;
pub use rules::{RootQuery, RuleBody, RuleError, RuleId, RuleRegistry, TaskContext};
pub use scheduler::{Engine, EngineConfig};
pub use selector::Selector;
pub use session::Session;
pub use value::{Product, Value, ValueError};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{EngineError, RuleGraphError};
    pub use crate::params::Params;
    pub use crate::rules::{RuleError, RuleRegistry, TaskContext};
    pub use crate::scheduler::{Engine, EngineConfig};
    pub use crate::selector::Selector;
    pub use crate::session::Session;
    pub use crate::value::Value;
    pub use quarry_types::{ChangeKind, Digest, PathEvent, ProductType};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registry_builds() {
        let engine = Engine::new(RuleRegistry::new()).unwrap();
        assert_eq!(engine.node_count(), 0);
    }
}
