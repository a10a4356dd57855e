//! Memoized store lookups for one enrichment session.
//!
//! Every map is keyed by the full resolution key and stores the picked winner, or `None` when the
//! store had nothing for that key, so a genuinely unmapped id costs one store query per session
//! rather than one per record. Winners depend on the tag ranking, so the whole cache is dropped
//! whenever the ranking it was filled under is replaced.

use crate::err::StoreResult;
use crate::model::{MessageTemplate, ProviderEvent, ValueKind, ValueName, short_id};
use crate::priority::PrioritySnapshot;
use crate::store::TemplateLookup;

use hashbrown::HashMap as FastMap;
use hashbrown::hash_map::Entry;
use log::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MessageKey {
    provider: String,
    raw_id: u32,
    log_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EventKey {
    provider: String,
    id: u32,
    version: u8,
    log_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ValueKey {
    kind: ValueKind,
    provider: String,
    value: u64,
}

#[derive(Debug, Default)]
pub struct DescriptionResolutionCache {
    snapshot: PrioritySnapshot,
    messages: FastMap<MessageKey, Option<MessageTemplate>, ahash::RandomState>,
    events: FastMap<EventKey, Option<ProviderEvent>, ahash::RandomState>,
    values: FastMap<ValueKey, Option<ValueName>, ahash::RandomState>,
}

impl DescriptionResolutionCache {
    pub fn new(snapshot: PrioritySnapshot) -> Self {
        DescriptionResolutionCache {
            snapshot,
            ..Default::default()
        }
    }

    /// The ranking the cached winners were picked under.
    pub fn snapshot(&self) -> &PrioritySnapshot {
        &self.snapshot
    }

    /// Adopt `snapshot`, discarding every cached entry if it differs from the current one.
    /// Returns whether the cache was cleared.
    pub fn sync_priority(&mut self, snapshot: &PrioritySnapshot) -> bool {
        if &self.snapshot == snapshot {
            return false;
        }
        debug!(
            "tag priority changed, dropping {} cached resolutions",
            self.len()
        );
        self.clear();
        self.snapshot = snapshot.clone();
        true
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.events.clear();
        self.values.clear();
    }

    /// Number of memoized keys, negative results included.
    pub fn len(&self) -> usize {
        self.messages.len() + self.events.len() + self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve a legacy message by raw id, falling back to the truncated short id when the raw id
    /// has no candidates at all.
    ///
    /// When `log_name` is given, candidates bound to a different log are ignored unless that
    /// would leave none.
    pub fn message<S: TemplateLookup + ?Sized>(
        &mut self,
        store: &S,
        provider: &str,
        raw_id: u32,
        log_name: Option<&str>,
    ) -> StoreResult<Option<&MessageTemplate>> {
        let key = MessageKey {
            provider: provider.to_string(),
            raw_id,
            log_name: log_name.map(str::to_string),
        };

        let snapshot = &self.snapshot;
        let slot = match self.messages.entry(key) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let mut candidates = store.messages_by_raw_id(provider, raw_id)?;
                if candidates.is_empty() {
                    candidates = store.messages_by_short_id(provider, short_id(raw_id))?;
                }
                if let Some(log_name) = log_name {
                    retain_for_log(&mut candidates, log_name);
                }
                trace!(
                    "message {}/{:#x}: {} candidates",
                    provider,
                    raw_id,
                    candidates.len()
                );
                e.insert(snapshot.pick_by_priority(&candidates).cloned())
            }
        };
        Ok(slot.as_ref())
    }

    pub fn event<S: TemplateLookup + ?Sized>(
        &mut self,
        store: &S,
        provider: &str,
        id: u32,
        version: u8,
        log_name: &str,
    ) -> StoreResult<Option<&ProviderEvent>> {
        let key = EventKey {
            provider: provider.to_string(),
            id,
            version,
            log_name: log_name.to_string(),
        };

        let snapshot = &self.snapshot;
        let slot = match self.events.entry(key) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let candidates = store.events(provider, id, version, log_name)?;
                e.insert(snapshot.pick_by_priority(&candidates).cloned())
            }
        };
        Ok(slot.as_ref())
    }

    pub fn value_name<S: TemplateLookup + ?Sized>(
        &mut self,
        store: &S,
        kind: ValueKind,
        provider: &str,
        value: u64,
    ) -> StoreResult<Option<&ValueName>> {
        let key = ValueKey {
            kind,
            provider: provider.to_string(),
            value,
        };

        let snapshot = &self.snapshot;
        let slot = match self.values.entry(key) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let candidates = store.value_names(kind, provider, value)?;
                e.insert(snapshot.pick_by_priority(&candidates).cloned())
            }
        };
        Ok(slot.as_ref())
    }
}

/// Messages without a log name always qualify.
fn retain_for_log(candidates: &mut Vec<&MessageTemplate>, log_name: &str) {
    let qualifies = |m: &&MessageTemplate| {
        m.log_name
            .as_deref()
            .is_none_or(|l| l.eq_ignore_ascii_case(log_name))
    };
    if candidates.iter().any(qualifies) {
        candidates.retain(qualifies);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priority::TagPriority;
    use crate::store::{RecordBatch, TemplateStore};
    use pretty_assertions::assert_eq;
    use std::cell::Cell;

    /// Counts every store query that reaches the underlying store.
    struct CountingStore {
        inner: TemplateStore,
        calls: Cell<usize>,
    }

    impl TemplateLookup for CountingStore {
        fn messages_by_raw_id(
            &self,
            provider: &str,
            raw_id: u32,
        ) -> StoreResult<Vec<&MessageTemplate>> {
            self.calls.set(self.calls.get() + 1);
            self.inner.messages_by_raw_id(provider, raw_id)
        }

        fn messages_by_short_id(
            &self,
            provider: &str,
            short_id: u16,
        ) -> StoreResult<Vec<&MessageTemplate>> {
            self.calls.set(self.calls.get() + 1);
            self.inner.messages_by_short_id(provider, short_id)
        }

        fn events(
            &self,
            provider: &str,
            id: u32,
            version: u8,
            log_name: &str,
        ) -> StoreResult<Vec<&ProviderEvent>> {
            self.calls.set(self.calls.get() + 1);
            self.inner.events(provider, id, version, log_name)
        }

        fn value_names(
            &self,
            kind: ValueKind,
            provider: &str,
            value: u64,
        ) -> StoreResult<Vec<&ValueName>> {
            self.calls.set(self.calls.get() + 1);
            self.inner.value_names(kind, provider, value)
        }
    }

    fn store_with(messages: Vec<MessageTemplate>) -> CountingStore {
        let mut inner = TemplateStore::in_memory();
        for m in messages {
            inner.bulk_insert(RecordBatch::Messages(vec![m])).unwrap();
        }
        CountingStore {
            inner,
            calls: Cell::new(0),
        }
    }

    fn message(raw_id: u32, text: &str, tag: &str) -> MessageTemplate {
        MessageTemplate::new("PROVIDER", raw_id, text.to_string(), tag)
    }

    #[test]
    fn repeated_lookups_hit_the_cache_until_priority_changes() {
        let store = store_with(vec![message(7, "a", "t1"), message(7, "b", "t2")]);
        let mut priority = TagPriority::new(vec!["t1".to_string(), "t2".to_string()]);
        let mut cache = DescriptionResolutionCache::new(priority.snapshot());

        let first = cache.message(&store, "PROVIDER", 7, None).unwrap().cloned();
        assert_eq!(first.unwrap().text, "a");
        assert_eq!(store.calls.get(), 1);

        cache.message(&store, "PROVIDER", 7, None).unwrap();
        assert_eq!(store.calls.get(), 1);

        priority.move_up("t2");
        assert!(cache.sync_priority(&priority.snapshot()));
        let after = cache.message(&store, "PROVIDER", 7, None).unwrap().cloned();
        assert_eq!(after.unwrap().text, "b");
        assert_eq!(store.calls.get(), 2);
    }

    #[test]
    fn misses_are_memoized() {
        let store = store_with(vec![]);
        let mut cache = DescriptionResolutionCache::default();

        for _ in 0..3 {
            assert!(cache.event(&store, "PROVIDER", 1, 0, "System").unwrap().is_none());
            assert!(
                cache
                    .value_name(&store, ValueKind::Task, "PROVIDER", 1)
                    .unwrap()
                    .is_none()
            );
        }
        assert_eq!(store.calls.get(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn falls_back_to_short_id() {
        let store = store_with(vec![message(200_000 % 65_536, "short", "t")]);
        let mut cache = DescriptionResolutionCache::default();

        let found = cache.message(&store, "PROVIDER", 200_000, None).unwrap();
        assert_eq!(found.map(|m| m.text.as_str()), Some("short"));
    }

    #[test]
    fn prefers_messages_for_the_records_log() {
        let mut system = message(5, "system", "t1");
        system.log_name = Some("System".to_string());
        let mut app = message(5, "application", "t1");
        app.log_name = Some("Application".to_string());
        let store = store_with(vec![system, app]);
        let mut cache = DescriptionResolutionCache::default();

        let text = |m: Option<&MessageTemplate>| m.map(|m| m.text.clone());
        assert_eq!(
            text(cache.message(&store, "PROVIDER", 5, Some("Application")).unwrap()),
            Some("application".to_string())
        );
        // No candidate matches, so every candidate stays eligible.
        assert_eq!(
            text(cache.message(&store, "PROVIDER", 5, Some("Security")).unwrap()),
            Some("system".to_string())
        );
    }
}
