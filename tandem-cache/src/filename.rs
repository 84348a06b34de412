//! Key-to-filename derivation: a configuration-supplied pure function,
//! with a default for keys that have a textual projection: SHA-1 of the
//! UTF-8 projection, hex, lowercase. Anything collision-resistant would
//! do — the on-disk format is entirely determined by whatever
//! `filename(key)` returns.

use sha1::{Digest, Sha1};

/// The default filename function for keys with a textual projection.
/// An empty projection yields `None`, and the caller skips that key's
/// disk half entirely.
pub fn sha1_filename(text: &str) -> Option<String> {
    if text.is_empty() {
        return None;
    }

    let mut hasher = Sha1::new();
    hasher.update(text.as_bytes());
    Some(hex::encode(hasher.finalize()))
}
