//! Rule input selectors
//!
//! A selector is the pure-data query a rule issues for one of its inputs.
//! The variant set is closed: resolution against the registry happens once
//! at rule-graph build time, never by runtime dispatch.

use crate::value::Product;
use quarry_types::ProductType;
use std::fmt;

/// What a rule needs for one of its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    /// A value of this product type, derivable from the current params:
    /// either a parameter of the type or the output of an in-scope rule.
    Select(ProductType),

    /// A value of this product type taken directly from the explicitly
    /// supplied parameters, never derived by a rule.
    Param(ProductType),
}

impl Selector {
    /// Select a derivable value of type `T`.
    pub fn select<T: Product>() -> Self {
        Selector::Select(ProductType::of::<T>())
    }

    /// Require an explicitly supplied parameter of type `T`.
    pub fn param<T: Product>() -> Self {
        Selector::Param(ProductType::of::<T>())
    }

    /// The product type this selector asks for.
    pub fn product(&self) -> ProductType {
        match self {
            Selector::Select(t) | Selector::Param(t) => *t,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Select(t) => write!(f, "Select({t})"),
            Selector::Param(t) => write!(f, "Param({t})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct SourceFile(String);

    #[test]
    fn test_selector_product() {
        let select = Selector::select::<SourceFile>();
        let param = Selector::param::<SourceFile>();

        assert_eq!(select.product(), ProductType::of::<SourceFile>());
        assert_eq!(select.product(), param.product());
        assert_ne!(select, param);
    }
}
