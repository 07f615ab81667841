//! Type-erased product values
//!
//! Rule bodies exchange [`Value`]s: a shared, immutable product instance
//! together with the digest of its serialized form. The digest doubles as
//! the engine's equality test, which is what makes early cutoff possible:
//! a recomputed value with an unchanged digest stops invalidation from
//! spreading further downstream.

use quarry_types::{Digest, DigestBuilder, ProductType};
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Marker trait for types that can flow through the engine as products.
///
/// Blanket-implemented: anything `'static + Send + Sync + Serialize`
/// qualifies. Serialization is required so values can be digested and
/// persisted in the content cache.
pub trait Product: Any + Send + Sync + Serialize {}

impl<T: Any + Send + Sync + Serialize> Product for T {}

/// Failed to construct a [`Value`] from a product instance.
#[derive(Debug, Error)]
pub enum ValueError {
    #[error("failed to serialize {product}: {source}")]
    Serialize {
        product: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to deserialize {product}: {source}")]
    Deserialize {
        product: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// A type-erased, digested product value.
///
/// Cloning is cheap: the instance and its serialized bytes are shared.
#[derive(Clone)]
pub struct Value {
    inner: Arc<dyn Any + Send + Sync>,
    product: ProductType,
    bytes: Arc<[u8]>,
    digest: Digest,
}

impl Value {
    /// Wrap a product instance, serializing and digesting it.
    pub fn new<T: Product>(value: T) -> Result<Self, ValueError> {
        let product = ProductType::of::<T>();
        let bytes = serde_json::to_vec(&value).map_err(|source| ValueError::Serialize {
            product: product.full_name(),
            source,
        })?;
        let digest = DigestBuilder::new()
            .update(product.full_name())
            .update(&bytes)
            .finish();

        Ok(Value {
            inner: Arc::new(value),
            product,
            bytes: bytes.into(),
            digest,
        })
    }

    /// Reconstruct a value from serialized bytes, as stored in the
    /// persisted cache.
    pub(crate) fn from_bytes<T: Product + serde::de::DeserializeOwned>(
        bytes: &[u8],
    ) -> Result<Self, ValueError> {
        let product = ProductType::of::<T>();
        let value: T = serde_json::from_slice(bytes).map_err(|source| ValueError::Deserialize {
            product: product.full_name(),
            source,
        })?;
        Value::new(value)
    }

    /// The product type this value carries.
    pub fn product(&self) -> ProductType {
        self.product
    }

    /// Digest of (product type, serialized form).
    pub fn digest(&self) -> Digest {
        self.digest
    }

    /// Serialized JSON bytes of the underlying product.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Borrow the underlying product if it is a `T`.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Take a shared handle to the underlying product if it is a `T`.
    pub fn into_arc<T: Any + Send + Sync>(self) -> Option<Arc<T>> {
        self.inner.downcast::<T>().ok()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({}, {:?})", self.product, self.digest)
    }
}
