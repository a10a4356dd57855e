//! User-controlled precedence between ingestion tags.
//!
//! The ranking is persisted on its own (it survives rebuilding the store) and is reconciled with
//! the store's live tag set by [`TagPriority::merge`], so its contents always equal the set of
//! tags the store actually holds.

use crate::err::{StoreError, StoreResult};
use crate::model::{IngestionTag, Tagged};

use log::debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default file name of the persisted ranking inside a store directory.
pub const PRIORITY_FILE: &str = "tag_priority.json";

/// An immutable view of the ranking, cheap to clone and compare.
///
/// Enrichment runs record the snapshot they resolved under, which lets a consumer tell whether
/// a finished run is stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PrioritySnapshot(Arc<[String]>);

impl PrioritySnapshot {
    pub fn new(order: impl Into<Arc<[String]>>) -> Self {
        PrioritySnapshot(order.into())
    }

    pub fn tags(&self) -> &[String] {
        &self.0
    }

    pub fn rank(&self, tag: &str) -> Option<usize> {
        self.0.iter().position(|t| t == tag)
    }

    /// The candidate whose tag ranks earliest.
    ///
    /// Among candidates with the same rank the first one (store order) wins. If no candidate's tag
    /// is ranked at all, the first candidate is returned rather than nothing.
    pub fn pick_by_priority<'a, T: Tagged + ?Sized>(&self, candidates: &[&'a T]) -> Option<&'a T> {
        candidates
            .iter()
            .enumerate()
            .filter_map(|(i, c)| self.rank(c.tag()).map(|rank| (rank, i)))
            .min()
            .map(|(_, i)| candidates[i])
            .or_else(|| candidates.first().copied())
    }
}

/// Reconcile a ranking with the tags that exist.
///
/// Existing entries whose tag still exists keep their relative order, tags missing from the
/// ranking are appended in `available` order, and entries for vanished tags are dropped.
/// Idempotent: `merge(merge(p, a), a) == merge(p, a)`.
pub fn merge(existing: &[String], available: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(available.len());
    for tag in existing {
        if available.contains(tag) && !merged.contains(tag) {
            merged.push(tag.clone());
        }
    }
    for tag in available {
        if !merged.contains(tag) {
            merged.push(tag.clone());
        }
    }
    merged
}

#[derive(Debug, Clone, Default)]
pub struct TagPriority {
    order: Vec<String>,
    snapshot: PrioritySnapshot,
    path: Option<PathBuf>,
}

impl TagPriority {
    pub fn new(order: Vec<String>) -> Self {
        TagPriority {
            snapshot: PrioritySnapshot::new(order.clone()),
            order,
            path: None,
        }
    }

    /// Load the ranking persisted at `path`. A missing file is an empty ranking.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let order: Vec<String> = match std::fs::read(path) {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|source| StoreError::InvalidRecord {
                    path: path.to_path_buf(),
                    line: 1,
                    source,
                })?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => {
                return Err(StoreError::Io {
                    action: "reading",
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let mut priority = TagPriority::new(order);
        priority.path = Some(path.to_path_buf());
        Ok(priority)
    }

    /// Write the ranking back to the file it was loaded from. No-op for an in-memory ranking.
    pub fn save(&self) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(&self.order).map_err(|source| {
            StoreError::Serialize {
                what: "tag priority",
                source,
            }
        })?;
        std::fs::write(path, json).map_err(|source| StoreError::Io {
            action: "writing",
            path: path.clone(),
            source,
        })
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn snapshot(&self) -> PrioritySnapshot {
        self.snapshot.clone()
    }

    /// Tags with their zero-based rank.
    pub fn ranked_tags(&self) -> Vec<IngestionTag> {
        self.order
            .iter()
            .enumerate()
            .map(|(rank, name)| IngestionTag {
                name: name.clone(),
                rank,
            })
            .collect()
    }

    pub fn pick_by_priority<'a, T: Tagged + ?Sized>(&self, candidates: &[&'a T]) -> Option<&'a T> {
        self.snapshot.pick_by_priority(candidates)
    }

    /// Reconcile with the store's tag set. Returns whether the ranking changed.
    pub fn merge(&mut self, available: &[String]) -> bool {
        let merged = merge(&self.order, available);
        self.replace(merged)
    }

    /// Adopt a user-supplied order, then reconcile it with `available`.
    pub fn set_order(&mut self, order: Vec<String>, available: &[String]) -> bool {
        self.replace(merge(&order, available))
    }

    /// Swap `tag` with its predecessor. Returns whether anything moved.
    pub fn move_up(&mut self, tag: &str) -> bool {
        match self.order.iter().position(|t| t == tag) {
            Some(i) if i > 0 => {
                let mut order = self.order.clone();
                order.swap(i - 1, i);
                self.replace(order)
            }
            _ => false,
        }
    }

    /// Swap `tag` with its successor. Returns whether anything moved.
    pub fn move_down(&mut self, tag: &str) -> bool {
        match self.order.iter().position(|t| t == tag) {
            Some(i) if i + 1 < self.order.len() => {
                let mut order = self.order.clone();
                order.swap(i, i + 1);
                self.replace(order)
            }
            _ => false,
        }
    }

    fn replace(&mut self, order: Vec<String>) -> bool {
        if order == self.order {
            return false;
        }
        debug!("tag priority changed: {:?} -> {:?}", self.order, order);
        self.snapshot = PrioritySnapshot::new(order.clone());
        self.order = order;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ValueName;
    use pretty_assertions::assert_eq;

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn named(tag: &str) -> ValueName {
        ValueName {
            provider_name: "P".to_string(),
            value: 1,
            name: tag.to_uppercase(),
            tag: tag.to_string(),
        }
    }

    #[test]
    fn merge_keeps_order_appends_new_and_drops_missing() {
        let merged = merge(&tags(&["c", "gone", "a"]), &tags(&["a", "b", "c"]));
        assert_eq!(merged, tags(&["c", "a", "b"]));
    }

    #[test]
    fn merge_is_idempotent() {
        let cases = [
            (tags(&[]), tags(&["a", "b"])),
            (tags(&["x", "b", "a"]), tags(&["a", "b", "c"])),
            (tags(&["a", "a", "b"]), tags(&["b", "a"])),
            (tags(&["q"]), tags(&[])),
        ];
        for (p, a) in cases {
            let once = merge(&p, &a);
            assert_eq!(merge(&once, &a), once);
        }
    }

    #[test]
    fn pick_prefers_earliest_rank_and_falls_back_to_first() {
        let priority = TagPriority::new(tags(&["b", "a"]));
        let a = named("a");
        let b = named("b");
        let z = named("z");

        assert_eq!(priority.pick_by_priority(&[&a, &b]).unwrap().tag, "b");
        assert_eq!(priority.pick_by_priority(&[&z, &a]).unwrap().tag, "a");
        assert_eq!(priority.pick_by_priority(&[&z]).unwrap().tag, "z");
        assert!(priority.pick_by_priority::<ValueName>(&[]).is_none());
    }

    #[test]
    fn reordering_changes_the_snapshot() {
        let mut priority = TagPriority::new(tags(&["a", "b"]));
        let before = priority.snapshot();

        assert!(priority.move_down("a"));
        assert_eq!(priority.order(), &tags(&["b", "a"])[..]);
        assert_ne!(priority.snapshot(), before);

        assert!(!priority.move_up("b"));
        assert!(!priority.set_order(tags(&["b", "a", "zzz"]), &tags(&["a", "b"])));
    }

    #[test]
    fn persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PRIORITY_FILE);

        let mut priority = TagPriority::load(&path).unwrap();
        assert!(priority.order().is_empty());
        priority.merge(&tags(&["x", "y"]));
        priority.save().unwrap();

        assert_eq!(TagPriority::load(&path).unwrap().order(), &tags(&["x", "y"])[..]);
    }
}
