//! Group-key hashing: a pure function from a canonicalized dictionary to an
//! opaque group key string.
//!
//! `GroupBy` is the only caller. The contract (§6 of the design doc) is:
//! deterministic, collision-resistant enough for grouping, and independent of
//! the insertion order of the grouping property names -- satisfied here by
//! hashing a canonical JSON encoding of `Item::sub_dict`, whose backing
//! `serde_json::Map` is BTreeMap-ordered regardless of how the caller listed
//! the property names.

use crate::value::Item;
use sha2::{Digest, Sha256};

/// Derive an opaque group key from the grouping sub-dictionary.
///
/// `names` only needs to describe which properties were used to build
/// `grouping_subdict` for documentation/debugging purposes; the hash itself
/// is computed purely from the (already order-independent) sub-dictionary.
#[must_use]
pub fn hash_grouping_key(grouping_subdict: &Item, _names: &[String]) -> String {
    let canonical = serde_json::to_string(grouping_subdict.as_map())
        .expect("Item serializes to JSON infallibly");
    let digest = Sha256::digest(canonical.as_bytes());
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}
