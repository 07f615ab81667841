//! Type-keyed request parameters
//!
//! A [`Params`] set holds at most one value per product type. Parameters
//! are pure data supplied at the root of a request; the rule graph decides,
//! per selector, whether a parameter satisfies it directly or a rule must
//! derive the value.

use crate::value::{Product, Value, ValueError};
use quarry_types::{Digest, DigestBuilder, ProductType};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// An ordered, type-keyed set of parameter values.
#[derive(Debug, Clone, Default)]
pub struct Params {
    entries: BTreeMap<ProductType, Value>,
}

impl Params {
    pub fn new() -> Self {
        Params {
            entries: BTreeMap::new(),
        }
    }

    /// Build a params set from product instances.
    pub fn of(values: impl IntoIterator<Item = Value>) -> Self {
        let mut params = Params::new();
        for value in values {
            params.insert(value);
        }
        params
    }

    /// Convenience for a single-parameter set.
    pub fn single<T: Product>(value: T) -> Result<Self, ValueError> {
        Ok(Params::of([Value::new(value)?]))
    }

    /// Insert a value, replacing any existing value of the same product
    /// type. Returns the replaced value if there was one.
    pub fn insert(&mut self, value: Value) -> Option<Value> {
        self.entries.insert(value.product(), value)
    }

    /// Look up the parameter of the given product type.
    pub fn get(&self, product: ProductType) -> Option<&Value> {
        self.entries.get(&product)
    }

    /// The set of product types present.
    pub fn type_set(&self) -> BTreeSet<ProductType> {
        self.entries.keys().copied().collect()
    }

    /// A copy containing only the given product types.
    ///
    /// Node identity is computed over restricted params so that two
    /// requests differing only in parameters a node never consumes still
    /// share that node.
    pub fn restrict(&self, keep: &BTreeSet<ProductType>) -> Params {
        Params {
            entries: self
                .entries
                .iter()
                .filter(|(t, _)| keep.contains(t))
                .map(|(t, v)| (*t, v.clone()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deterministic digest over the ordered (type, value digest) pairs.
    pub fn digest(&self) -> Digest {
        let mut builder = DigestBuilder::new();
        for (product, value) in &self.entries {
            builder = builder
                .update(product.full_name())
                .update(value.digest().as_bytes());
        }
        builder.finish()
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.entries.keys().map(|t| t.name()).collect();
        write!(f, "{}", names.join(", "))
    }
}

/// Render a set of product types for error messages.
pub(crate) fn format_type_set(types: &BTreeSet<ProductType>) -> String {
    types
        .iter()
        .map(|t| t.name())
        .collect::<Vec<_>>()
        .join(", ")
}
