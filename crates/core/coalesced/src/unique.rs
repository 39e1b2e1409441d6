use std::hash::Hash;

use indexmap::IndexSet;

/// Distinct keys of a batch together with where each input landed.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Deduplicated<K> {
    /// Keys in first-occurrence order
    pub keys: Vec<K>,
    /// For each input key, its index into `keys`
    pub positions: Vec<usize>,
}

/// Remove duplicate keys, keeping the first occurrence of each.
pub fn unique<K: Hash + Eq + Clone>(keys: &[K]) -> Vec<K> {
    unique_by(keys, K::clone).keys
}

/// Remove keys whose projection was already seen, keeping the first occurrence.
pub fn unique_by<K, C, F>(keys: &[K], key_fn: F) -> Deduplicated<K>
where
    K: Clone,
    C: Hash + Eq,
    F: Fn(&K) -> C,
{
    let mut seen = IndexSet::with_capacity(keys.len());
    let mut distinct = Vec::new();

    let positions = keys
        .iter()
        .map(|key| {
            let (index, inserted) = seen.insert_full(key_fn(key));
            if inserted {
                distinct.push(key.clone());
            }

            index
        })
        .collect();

    Deduplicated {
        keys: distinct,
        positions,
    }
}
