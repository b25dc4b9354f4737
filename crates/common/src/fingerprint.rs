//! Fingerprint rule for matching materials across two runs
//!
//! Two materials are the same logical item iff their file types are equal
//! and their metadata are equal once the ignored keys are removed.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{IgnoreMetadataKeys, Material, SortKeys};

/// Canonical matching key of a material
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of a material with `ignore` subtracted from its metadata.
    ///
    /// Metadata is a sorted map, so its JSON rendering is already canonical.
    pub fn of(material: &Material, ignore: &IgnoreMetadataKeys) -> Self {
        let metadata = material.metadata.without(ignore);
        let rendered = serde_json::to_string(&metadata).unwrap_or_else(|_| metadata.to_string());
        Self(format!("{}|{}", material.file_type, rendered))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Two materials matched by fingerprint. One side is absent when the other
/// set holds no counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialPair {
    pub fingerprint: Fingerprint,
    pub left: Option<Material>,
    pub right: Option<Material>,
}

impl MaterialPair {
    pub fn is_matched(&self) -> bool {
        self.left.is_some() && self.right.is_some()
    }

    /// Metadata used for presentation order: the left side if present
    fn sort_metadata(&self) -> Option<&crate::types::Metadata> {
        self.left
            .as_ref()
            .or(self.right.as_ref())
            .map(|m| &m.metadata)
    }
}

/// Pair up two material sets by fingerprint.
///
/// No material is dropped: unmatched ones become one-sided pairs. When a
/// fingerprint occurs several times on a side, occurrences pair in order.
/// The result is ordered by `sort_keys`, then by fingerprint.
pub fn pair_materials(
    left: &[Material],
    right: &[Material],
    ignore: &IgnoreMetadataKeys,
    sort_keys: &SortKeys,
) -> Vec<MaterialPair> {
    let mut pending: HashMap<Fingerprint, VecDeque<&Material>> = HashMap::new();
    for m in right {
        pending.entry(Fingerprint::of(m, ignore)).or_default().push_back(m);
    }

    let mut pairs: Vec<MaterialPair> = left
        .iter()
        .map(|l| {
            let fingerprint = Fingerprint::of(l, ignore);
            let right = pending
                .get_mut(&fingerprint)
                .and_then(|queue| queue.pop_front())
                .cloned();
            MaterialPair {
                fingerprint,
                left: Some(l.clone()),
                right,
            }
        })
        .collect();

    // Right-side leftovers, in input order
    for m in right {
        let fingerprint = Fingerprint::of(m, ignore);
        if let Some(queue) = pending.get_mut(&fingerprint) {
            if queue.front().map(|q| q.id == m.id && q.metadata == m.metadata).unwrap_or(false) {
                queue.pop_front();
                pairs.push(MaterialPair {
                    fingerprint,
                    left: None,
                    right: Some(m.clone()),
                });
            }
        }
    }

    pairs.sort_by(|a, b| match (a.sort_metadata(), b.sort_metadata()) {
        (Some(x), Some(y)) => sort_keys
            .compare(x, y)
            .then_with(|| a.fingerprint.cmp(&b.fingerprint)),
        _ => a.fingerprint.cmp(&b.fingerprint),
    });
    pairs
}
