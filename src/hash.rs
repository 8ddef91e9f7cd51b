//! Canonical configuration hashing.
//!
//! Two streams built from semantically identical options produce the same
//! hash regardless of the order params or headers were added in, so an
//! external sharing layer can deduplicate stream/shape pairs by this key.
//! Resolver-valued params cannot be hashed by value; they contribute their
//! name plus a resolver marker, which keeps two configs with the same
//! resolver slot equal and distinguishes them from literal-valued configs.

use sha2::{Digest, Sha256};

use crate::dynamic::DynamicValue;
use crate::models::ShapeStreamOptions;

fn feed_sorted_map(
    hasher: &mut Sha256,
    section: &str,
    map: &std::collections::HashMap<String, DynamicValue>,
) {
    let mut entries: Vec<(&String, &DynamicValue)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    hasher.update(section.as_bytes());
    hasher.update(b"{");
    for (name, value) in entries {
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        match value.as_literal() {
            Some(literal) => hasher.update(literal.as_bytes()),
            None => hasher.update(b"<resolver>"),
        }
        hasher.update(b";");
    }
    hasher.update(b"}");
}

/// Hex-encoded SHA-256 over a canonical serialization of the options.
pub fn canonical_options_hash(options: &ShapeStreamOptions) -> String {
    let mut hasher = Sha256::new();

    hasher.update(b"url=");
    hasher.update(options.url.as_bytes());
    hasher.update(b";");

    feed_sorted_map(&mut hasher, "params", &options.params);
    feed_sorted_map(&mut hasher, "headers", &options.headers);

    hasher.update(b"replica=");
    hasher.update(options.replica.as_str().as_bytes());
    hasher.update(b";");

    if let Some(offset) = &options.offset {
        hasher.update(b"offset=");
        hasher.update(offset.as_str().as_bytes());
        hasher.update(b";");
    }
    if let Some(handle) = &options.handle {
        hasher.update(b"handle=");
        hasher.update(handle.as_bytes());
        hasher.update(b";");
    }

    hex::encode(hasher.finalize())
}
