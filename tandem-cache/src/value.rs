//! The value side of the boundary this crate doesn't own: converting a
//! caller's type into the bytes the disk tier actually persists.
//!
//! Serialization of arbitrary values is explicitly out of scope for the
//! core engine (the staging log and disk tier only ever see
//! [`bytes::Bytes`]); [`CacheValue`] is the pluggable seam the outer
//! [`crate::Cache`](crate::cache::Cache) uses to cross it.

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use std::error::Error as StdError;

/// Failure converting a value to or from its byte representation.
#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("serialize failed")]
    Serialize {
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("deserialize failed")]
    Deserialize {
        source: Box<dyn StdError + Send + Sync>,
    },
}

/// A value that can live in the cache.
///
/// Implement this directly for a type you want encoded some other way
/// than JSON; wrap it in [`Json`] to get the default codec for free.
/// [`Bytes`] and `Vec<u8>` pass through untouched — no codec involved —
/// matching the "byte payloads pass through unchanged" rule.
pub trait CacheValue: Clone + Send + Sync + 'static {
    fn to_bytes(&self) -> Result<Vec<u8>, CodecError>;
    fn from_bytes(bytes: Vec<u8>) -> Result<Self, CodecError>
    where
        Self: Sized;

    /// Cost contribution to the memory tier's LRU eviction accounting.
    /// Raw byte values cost their own length; everything else costs 0.
    fn cache_cost(&self) -> u64 {
        0
    }
}

impl CacheValue for Bytes {
    fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(self.to_vec())
    }

    fn from_bytes(bytes: Vec<u8>) -> Result<Self, CodecError> {
        Ok(Bytes::from(bytes))
    }

    fn cache_cost(&self) -> u64 {
        self.len() as u64
    }
}

impl CacheValue for Vec<u8> {
    fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(self.clone())
    }

    fn from_bytes(bytes: Vec<u8>) -> Result<Self, CodecError> {
        Ok(bytes)
    }

    fn cache_cost(&self) -> u64 {
        self.len() as u64
    }
}

/// Wraps any `serde`-compatible type so it can live in the cache via the
/// default textual codec (JSON).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T> CacheValue for Json<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(&self.0).map_err(|e| CodecError::Serialize { source: Box::new(e) })
    }

    fn from_bytes(bytes: Vec<u8>) -> Result<Self, CodecError> {
        serde_json::from_slice(&bytes)
            .map(Json)
            .map_err(|e| CodecError::Deserialize { source: Box::new(e) })
    }
}
