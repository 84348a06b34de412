use crate::value::CodecError;
use std::io;

/// Error surface for the fallible half of the [`Cache`](crate::cache::Cache)
/// operations. Absence of a value is never an error — it is always
/// `Ok(None)`.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("no backing directory could be resolved for this cache")]
    PathUnavailable,

    #[error("value codec failed: {source}")]
    Codec {
        #[from]
        source: CodecError,
    },
}

pub type Result<T> = std::result::Result<T, CacheError>;
