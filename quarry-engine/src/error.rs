//! Engine error taxonomy
//!
//! Rule graph construction errors are fatal at startup: no partially-usable
//! engine exists if the rule set does not validate. Execution errors are
//! terminal results for the requests that reach them and never trigger an
//! automatic retry inside the engine.

use thiserror::Error;

/// Errors raised while compiling the static rule graph.
#[derive(Debug, Clone, Error)]
pub enum RuleGraphError {
    /// More than one equally-specific rule can produce a product and no
    /// declared preference breaks the tie.
    #[error("ambiguous rules for {product} given params [{params}]: candidates {}", candidates.join(", "))]
    AmbiguousRule {
        product: String,
        params: String,
        candidates: Vec<String>,
    },

    /// No rule path can produce the product from the declared params.
    #[error("no installed rule can produce {product} given params [{params}]{}",
            if trail.is_empty() { String::new() } else { format!("; attempted: {}", trail.join(", ")) })]
    UnreachableProduct {
        product: String,
        params: String,
        trail: Vec<String>,
    },

    /// The rule graph itself contains a dependency cycle with no
    /// terminating alternative.
    #[error("rule dependency cycle with no terminating path: {}", chain.join(" -> "))]
    CyclicRuleDependency { chain: Vec<String> },
}

/// Errors produced while executing the runtime node graph.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// A rule body failed. Carried verbatim with the node that produced it.
    #[error("rule '{rule}' failed while producing {product}: {message}")]
    Execution {
        rule: String,
        product: String,
        message: String,
    },

    /// A transitive dependency failed. The chain records the product types
    /// that depended on the originating failure, deepest first.
    #[error("dependency failed while producing {}: {source}", chain.join(" <- "))]
    DependencyFailed {
        chain: Vec<String>,
        #[source]
        source: Box<EngineError>,
    },

    /// Expanding the node graph re-entered a node already on the current
    /// expansion path.
    #[error("dependency cycle detected at runtime: {}", chain.join(" -> "))]
    RuntimeCycle { chain: Vec<String> },

    /// The session's deadline expired before the request completed.
    #[error("request deadline exceeded")]
    Timeout,

    /// The session was cancelled.
    #[error("request cancelled")]
    Cancelled,

    /// A resolved plan expected a parameter that was not supplied.
    #[error("no parameter of type {product} supplied")]
    MissingParam { product: String },

    /// The requested product was never declared as a root query, so the
    /// rule graph holds no resolution for it.
    #[error("product {product} was not declared as a root query for params [{params}]")]
    UnknownRoot { product: String, params: String },

    /// More than one declared root query matches the supplied params with
    /// equal specificity.
    #[error("ambiguous root for {product} given params [{params}]: candidates {}", candidates.join(", "))]
    AmbiguousRoot {
        product: String,
        params: String,
        candidates: Vec<String>,
    },

    /// A value of an unexpected concrete type came back for a request.
    #[error("requested {expected} but the resolved value has a different type")]
    WrongType { expected: String },
}

impl EngineError {
    /// Wrap a dependency's failure for a dependent producing `product`,
    /// preserving the originating error and extending the product chain.
    pub fn for_dependent(self, product: &str, dep_product: &str) -> EngineError {
        match self {
            EngineError::DependencyFailed { mut chain, source } => {
                chain.push(product.to_string());
                EngineError::DependencyFailed { chain, source }
            }
            original => EngineError::DependencyFailed {
                chain: vec![dep_product.to_string(), product.to_string()],
                source: Box::new(original),
            },
        }
    }

    /// The deepest originating error, unwrapping `DependencyFailed` layers.
    pub fn origin(&self) -> &EngineError {
        match self {
            EngineError::DependencyFailed { source, .. } => source.origin(),
            other => other,
        }
    }
}
