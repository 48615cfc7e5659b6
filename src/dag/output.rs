// src/dag/output.rs

//! Opaque node results.
//!
//! A handler may return any serializable value. Consumers never need the
//! producer's concrete type: they decode the value into whatever type they
//! expect through a JSON round trip. The encoded bytes are computed once and
//! cached, and the cache is shared by every clone of the output.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::errors::Result;

/// Type-erased value that knows how to encode itself.
trait OutputValue: Any + Send + Sync {
    fn encode(&self) -> serde_json::Result<Vec<u8>>;
    fn as_any(&self) -> &dyn Any;
}

impl<T> OutputValue for T
where
    T: Serialize + Send + Sync + 'static,
{
    fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Result produced by a successful handler.
///
/// Cloning is cheap: the value and the encoding cache are reference counted.
#[derive(Clone, Default)]
pub struct NodeOutput {
    value: Option<Arc<dyn OutputValue>>,
    encoded: Arc<OnceLock<Vec<u8>>>,
}

impl NodeOutput {
    /// Wrap a concrete value.
    pub fn new<T>(value: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        Self {
            value: Some(Arc::new(value)),
            encoded: Arc::new(OnceLock::new()),
        }
    }

    /// An output carrying no value. Receiving from it is a no-op.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    /// Borrow the value as its concrete type, if the caller knows it.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.as_deref()?.as_any().downcast_ref::<T>()
    }

    /// Whether the encoding has been computed and cached already.
    pub fn is_encoded(&self) -> bool {
        self.encoded.get().is_some()
    }

    /// JSON encoding of the value, computed on first use and cached.
    ///
    /// Returns `Ok(None)` for an empty output.
    pub fn encoded(&self) -> Result<Option<&[u8]>> {
        let Some(value) = self.value.as_deref() else {
            return Ok(None);
        };

        if let Some(bytes) = self.encoded.get() {
            return Ok(Some(bytes.as_slice()));
        }

        let bytes = value.encode()?;
        // A concurrent reader may have won the race; both encodings are equal.
        Ok(Some(self.encoded.get_or_init(|| bytes).as_slice()))
    }

    /// Decode into a fresh value of the requested type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.encoded()? {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes)?)),
            None => Ok(None),
        }
    }

    /// Decode into `out`, leaving it untouched when the output is empty.
    pub fn decode_into<T: DeserializeOwned>(&self, out: &mut T) -> Result<()> {
        if let Some(value) = self.decode()? {
            *out = value;
        }
        Ok(())
    }
}

impl fmt::Debug for NodeOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeOutput")
            .field("empty", &self.is_empty())
            .field("encoded_len", &self.encoded.get().map(Vec::len))
            .finish()
    }
}
