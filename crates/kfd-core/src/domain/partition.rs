//! Groups key-load requests into KMM-sized batches.
//!
//! # How partitioning works (for beginners)
//!
//! One `ModifyKeyCommand` can only carry keys that share an algorithm, a key
//! length, a KEK/TEK role and a target keyset.  The input list is therefore
//! split in a fixed order:
//!
//! 1. by algorithm id (keys of one algorithm must all be the same length),
//! 2. by KEK vs TEK,
//! 3. by "use active keyset" vs an explicit keyset, the explicit branch split
//!    again by keyset id,
//!
//! and each resulting group is chunked so that no KMM exceeds
//! [`MAX_KMM_BYTES`].  Every level keeps first-appearance order so the output
//! is deterministic.

use thiserror::Error;

use super::key_item::CmdKeyItem;

/// Largest KMM the engine will build.
pub const MAX_KMM_BYTES: usize = 512;

/// Fixed per-message overhead counted against [`MAX_KMM_BYTES`].
pub const KMM_OVERHEAD: usize = 27;

/// Per-key overhead inside a `ModifyKeyCommand` (format, SLN, key id).
pub const KEY_ITEM_OVERHEAD: usize = 5;

/// Errors raised while partitioning.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PartitionError {
    /// Two keys with the same algorithm id have different lengths.
    #[error("algorithm 0x{algorithm_id:02X} has mixed key lengths ({first} and {other} bytes)")]
    MixedKeyLengths {
        algorithm_id: u8,
        first: usize,
        other: usize,
    },

    /// A single key does not fit in one KMM.
    #[error("key of {key_length} bytes does not fit in a {MAX_KMM_BYTES}-byte KMM")]
    KeyTooLarge { key_length: usize },
}

/// A homogeneous group of keys that fits in one `ModifyKeyCommand`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBatch {
    pub algorithm_id: u8,
    pub key_length: usize,
    pub is_kek: bool,
    pub use_active_keyset: bool,
    /// Explicit keyset; `None` when the batch targets the active keyset.
    pub keyset_id: Option<u8>,
    pub items: Vec<CmdKeyItem>,
}

/// Maximum number of keys of `key_length` bytes that fit in one KMM.
///
/// ```rust
/// use kfd_core::domain::partition::max_keys_per_batch;
///
/// assert_eq!(max_keys_per_batch(32), 13);
/// assert_eq!(max_keys_per_batch(481), 0);
/// ```
pub fn max_keys_per_batch(key_length: usize) -> usize {
    (MAX_KMM_BYTES - KMM_OVERHEAD) / (KEY_ITEM_OVERHEAD + key_length)
}

/// Splits `keys` into batches; see the module docs for the ordering rules.
///
/// # Errors
///
/// - [`PartitionError::MixedKeyLengths`] when one algorithm id carries keys
///   of different lengths.
/// - [`PartitionError::KeyTooLarge`] when a key cannot fit in any KMM.
pub fn partition_keys(keys: &[CmdKeyItem]) -> Result<Vec<KeyBatch>, PartitionError> {
    let mut batches = Vec::new();

    for (algorithm_id, alg_items) in group_stable(keys.iter(), |k| k.algorithm_id()) {
        let key_length = uniform_length(algorithm_id, &alg_items)?;
        let capacity = max_keys_per_batch(key_length);
        if capacity == 0 {
            return Err(PartitionError::KeyTooLarge { key_length });
        }

        for (is_kek, role_items) in group_stable(alg_items.into_iter(), |k| k.is_kek()) {
            let by_target = group_stable(role_items.into_iter(), |k| {
                if k.use_active_keyset() {
                    None
                } else {
                    Some(k.keyset_id())
                }
            });

            for (keyset_id, items) in by_target {
                for chunk in items.chunks(capacity) {
                    batches.push(KeyBatch {
                        algorithm_id,
                        key_length,
                        is_kek,
                        use_active_keyset: keyset_id.is_none(),
                        keyset_id,
                        items: chunk.iter().map(|k| (*k).clone()).collect(),
                    });
                }
            }
        }
    }

    Ok(batches)
}

fn uniform_length(algorithm_id: u8, items: &[&CmdKeyItem]) -> Result<usize, PartitionError> {
    let first = items.first().map(|k| k.key().len()).unwrap_or(0);
    match items.iter().find(|k| k.key().len() != first) {
        Some(other) => Err(PartitionError::MixedKeyLengths {
            algorithm_id,
            first,
            other: other.key().len(),
        }),
        None => Ok(first),
    }
}

/// Groups items by key, ordering groups by first appearance.
fn group_stable<'a, K, I, F>(items: I, key_of: F) -> Vec<(K, Vec<&'a CmdKeyItem>)>
where
    K: PartialEq,
    I: Iterator<Item = &'a CmdKeyItem>,
    F: Fn(&CmdKeyItem) -> K,
{
    let mut groups: Vec<(K, Vec<&'a CmdKeyItem>)> = Vec::new();
    for item in items {
        let key = key_of(item);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(item),
            None => groups.push((key, vec![item])),
        }
    }
    groups
}
