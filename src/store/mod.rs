//! Tag-partitioned storage for provider metadata.
//!
//! Records are append-only. The same key defined under several tags is normal; lookups return
//! every candidate and leave picking a winner to [`TagPriority`](crate::priority::TagPriority).
//!
//! A store opened on a directory persists one NDJSON file per record kind plus `tags.json`, the
//! ordered list of tags in the order they were added.

pub mod ndjson;

use crate::err::{StoreError, StoreResult};
use crate::model::{
    BundleCounts, MessageTemplate, MetadataBundle, ProviderEvent, RecordKind, Tagged, ValueKind,
    ValueName, normalize_provider_name,
};

use hashbrown::HashMap;
use log::{debug, info};
use serde::Serialize;
use std::path::{Path, PathBuf};

const TAGS_FILE: &str = "tags.json";

/// A homogeneous batch of records, all under one tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordBatch {
    Messages(Vec<MessageTemplate>),
    Events(Vec<ProviderEvent>),
    Keywords(Vec<ValueName>),
    Opcodes(Vec<ValueName>),
    Tasks(Vec<ValueName>),
}

impl RecordBatch {
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordBatch::Messages(_) => RecordKind::Message,
            RecordBatch::Events(_) => RecordKind::Event,
            RecordBatch::Keywords(_) => RecordKind::Keyword,
            RecordBatch::Opcodes(_) => RecordKind::Opcode,
            RecordBatch::Tasks(_) => RecordKind::Task,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RecordBatch::Messages(r) => r.len(),
            RecordBatch::Events(r) => r.len(),
            RecordBatch::Keywords(r) | RecordBatch::Opcodes(r) | RecordBatch::Tasks(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split a bundle into one batch per kind, skipping empty kinds.
    pub fn from_bundle(bundle: MetadataBundle) -> Vec<RecordBatch> {
        [
            RecordBatch::Messages(bundle.messages),
            RecordBatch::Events(bundle.events),
            RecordBatch::Keywords(bundle.keywords),
            RecordBatch::Opcodes(bundle.opcodes),
            RecordBatch::Tasks(bundle.tasks),
        ]
        .into_iter()
        .filter(|b| !b.is_empty())
        .collect()
    }

    fn tag(&self) -> StoreResult<Option<&str>> {
        match self {
            RecordBatch::Messages(r) => single_tag(r),
            RecordBatch::Events(r) => single_tag(r),
            RecordBatch::Keywords(r) | RecordBatch::Opcodes(r) | RecordBatch::Tasks(r) => {
                single_tag(r)
            }
        }
    }
}

fn single_tag<T: Tagged>(records: &[T]) -> StoreResult<Option<&str>> {
    let Some(first) = records.first() else {
        return Ok(None);
    };
    if let Some(other) = records.iter().find(|r| r.tag() != first.tag()) {
        return Err(StoreError::MixedTags {
            first: first.tag().to_string(),
            other: other.tag().to_string(),
        });
    }
    Ok(Some(first.tag()))
}

/// Read side of the store, as seen by the resolution cache.
pub trait TemplateLookup {
    fn messages_by_raw_id(&self, provider: &str, raw_id: u32) -> StoreResult<Vec<&MessageTemplate>>;

    fn messages_by_short_id(
        &self,
        provider: &str,
        short_id: u16,
    ) -> StoreResult<Vec<&MessageTemplate>>;

    fn events(
        &self,
        provider: &str,
        id: u32,
        version: u8,
        log_name: &str,
    ) -> StoreResult<Vec<&ProviderEvent>>;

    fn value_names(&self, kind: ValueKind, provider: &str, value: u64)
    -> StoreResult<Vec<&ValueName>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EventKey {
    provider: String,
    id: u32,
    version: u8,
    log_name: String,
}

/// Records of one kind plus a composite-key index into them.
struct Table<T, K> {
    records: Vec<T>,
    index: HashMap<K, Vec<usize>>,
    key: fn(&T) -> K,
}

impl<T: Tagged, K: std::hash::Hash + Eq> Table<T, K> {
    fn new(key: fn(&T) -> K) -> Self {
        Table {
            records: Vec::new(),
            index: HashMap::new(),
            key,
        }
    }

    fn extend(&mut self, records: impl IntoIterator<Item = T>) {
        for record in records {
            let position = self.records.len();
            self.index
                .entry((self.key)(&record))
                .or_default()
                .push(position);
            self.records.push(record);
        }
    }

    fn get(&self, key: &K) -> Vec<&T> {
        self.index
            .get(key)
            .map(|positions| positions.iter().map(|&p| &self.records[p]).collect())
            .unwrap_or_default()
    }

    /// Drop every record under `tag`. Returns whether anything was removed.
    fn remove_tag(&mut self, tag: &str) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.tag() != tag);
        if self.records.len() == before {
            return false;
        }

        self.index.clear();
        for (position, record) in self.records.iter().enumerate() {
            self.index
                .entry((self.key)(record))
                .or_default()
                .push(position);
        }
        true
    }

    fn with_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a T> + 'a {
        self.records.iter().filter(move |r| r.tag() == tag)
    }
}

pub struct TemplateStore {
    dir: Option<PathBuf>,
    tags: Vec<String>,
    messages_by_raw_id: Table<MessageTemplate, (String, u32)>,
    /// Positions into `messages_by_raw_id.records`.
    short_ids: HashMap<(String, u16), Vec<usize>>,
    events: Table<ProviderEvent, EventKey>,
    keywords: Table<ValueName, (String, u64)>,
    opcodes: Table<ValueName, (String, u64)>,
    tasks: Table<ValueName, (String, u64)>,
}

fn message_key(m: &MessageTemplate) -> (String, u32) {
    (m.provider_name.clone(), m.raw_id)
}

fn event_key(e: &ProviderEvent) -> EventKey {
    EventKey {
        provider: e.provider_name.clone(),
        id: e.id,
        version: e.version,
        log_name: log_name_key(&e.log_name),
    }
}

/// Log names compare case-insensitively, as channel names do.
fn log_name_key(log_name: &str) -> String {
    log_name.to_uppercase()
}

fn value_key(v: &ValueName) -> (String, u64) {
    (v.provider_name.clone(), v.value)
}

impl std::fmt::Debug for TemplateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateStore")
            .field("dir", &self.dir)
            .field("tags", &self.tags)
            .field("messages", &self.messages_by_raw_id.records.len())
            .field("events", &self.events.records.len())
            .finish_non_exhaustive()
    }
}

impl TemplateStore {
    /// A store that lives only as long as this value.
    pub fn in_memory() -> Self {
        TemplateStore {
            dir: None,
            tags: Vec::new(),
            messages_by_raw_id: Table::new(message_key),
            short_ids: HashMap::new(),
            events: Table::new(event_key),
            keywords: Table::new(value_key),
            opcodes: Table::new(value_key),
            tasks: Table::new(value_key),
        }
    }

    /// Open (or create) a store persisted under `dir`.
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            action: "creating",
            path: dir.to_path_buf(),
            source,
        })?;

        let mut store = TemplateStore::in_memory();
        store.tags = read_tags(&dir.join(TAGS_FILE))?;

        store.insert_messages(ndjson::read_table(&table_path(dir, RecordKind::Message))?);
        store
            .events
            .extend(ndjson::read_table(&table_path(dir, RecordKind::Event))?);
        store
            .keywords
            .extend(ndjson::read_table(&table_path(dir, RecordKind::Keyword))?);
        store
            .opcodes
            .extend(ndjson::read_table(&table_path(dir, RecordKind::Opcode))?);
        store
            .tasks
            .extend(ndjson::read_table(&table_path(dir, RecordKind::Task))?);

        store.dir = Some(dir.to_path_buf());
        info!(
            "opened template store `{}` with {} tags",
            dir.display(),
            store.tags.len()
        );
        Ok(store)
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Tags in store order (the order they were first added).
    pub fn list_tags(&self) -> &[String] {
        &self.tags
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|t| t == name)
    }

    /// Register a new tag. A name that already exists is rejected before anything is written.
    pub fn add_tag(&mut self, name: &str) -> StoreResult<()> {
        if name.is_empty() {
            return Err(StoreError::EmptyTag);
        }
        if self.has_tag(name) {
            return Err(StoreError::TagAlreadyExists {
                tag: name.to_string(),
            });
        }
        self.tags.push(name.to_string());
        self.persist_tags()
    }

    /// Remove a tag and every record bearing it, across all five tables.
    pub fn delete_tag(&mut self, name: &str) -> StoreResult<()> {
        let Some(position) = self.tags.iter().position(|t| t == name) else {
            return Err(StoreError::UnknownTag {
                tag: name.to_string(),
            });
        };

        if self.messages_by_raw_id.remove_tag(name) {
            self.rebuild_short_ids();
            self.persist_table(RecordKind::Message)?;
        }
        if self.events.remove_tag(name) {
            self.persist_table(RecordKind::Event)?;
        }
        for kind in [ValueKind::Keyword, ValueKind::Opcode, ValueKind::Task] {
            if self.values_mut(kind).remove_tag(name) {
                self.persist_table(kind.into())?;
            }
        }

        self.tags.remove(position);
        self.persist_tags()?;
        info!("deleted tag `{}`", name);
        Ok(())
    }

    /// Append a batch of records. The batch's tag is registered if it is new.
    ///
    /// Provider names are normalized on the way in, so every lookup is case-insensitive.
    pub fn bulk_insert(&mut self, batch: RecordBatch) -> StoreResult<usize> {
        let Some(tag) = batch.tag()?.map(str::to_string) else {
            return Ok(0);
        };
        if tag.is_empty() {
            return Err(StoreError::EmptyTag);
        }

        let kind = batch.kind();
        let count = batch.len();

        match batch {
            RecordBatch::Messages(mut records) => {
                for r in &mut records {
                    r.provider_name = normalize_provider_name(&r.provider_name);
                }
                self.persist_append(kind, &records)?;
                self.insert_messages(records);
            }
            RecordBatch::Events(mut records) => {
                for r in &mut records {
                    r.provider_name = normalize_provider_name(&r.provider_name);
                }
                self.persist_append(kind, &records)?;
                self.events.extend(records);
            }
            RecordBatch::Keywords(records) => self.insert_values(ValueKind::Keyword, records)?,
            RecordBatch::Opcodes(records) => self.insert_values(ValueKind::Opcode, records)?,
            RecordBatch::Tasks(records) => self.insert_values(ValueKind::Task, records)?,
        }

        if !self.has_tag(&tag) {
            self.add_tag(&tag)?;
        }

        debug!("inserted {} {} records under tag `{}`", count, kind, tag);
        Ok(count)
    }

    /// Every record stored under `tag`.
    pub fn export_tag(&self, tag: &str) -> StoreResult<MetadataBundle> {
        if !self.has_tag(tag) {
            return Err(StoreError::UnknownTag {
                tag: tag.to_string(),
            });
        }

        Ok(MetadataBundle {
            messages: self.messages_by_raw_id.with_tag(tag).cloned().collect(),
            events: self.events.with_tag(tag).cloned().collect(),
            keywords: self.keywords.with_tag(tag).cloned().collect(),
            opcodes: self.opcodes.with_tag(tag).cloned().collect(),
            tasks: self.tasks.with_tag(tag).cloned().collect(),
        })
    }

    pub fn tag_counts(&self, tag: &str) -> BundleCounts {
        BundleCounts {
            messages: self.messages_by_raw_id.with_tag(tag).count(),
            events: self.events.with_tag(tag).count(),
            keywords: self.keywords.with_tag(tag).count(),
            opcodes: self.opcodes.with_tag(tag).count(),
            tasks: self.tasks.with_tag(tag).count(),
        }
    }

    fn insert_values(&mut self, kind: ValueKind, mut records: Vec<ValueName>) -> StoreResult<()> {
        for r in &mut records {
            r.provider_name = normalize_provider_name(&r.provider_name);
        }
        self.persist_append(kind.into(), &records)?;
        self.values_mut(kind).extend(records);
        Ok(())
    }

    fn insert_messages(&mut self, records: Vec<MessageTemplate>) {
        let start = self.messages_by_raw_id.records.len();
        for (offset, r) in records.iter().enumerate() {
            self.short_ids
                .entry((r.provider_name.clone(), r.short_id))
                .or_default()
                .push(start + offset);
        }
        self.messages_by_raw_id.extend(records);
    }

    fn rebuild_short_ids(&mut self) {
        self.short_ids.clear();
        for (position, r) in self.messages_by_raw_id.records.iter().enumerate() {
            self.short_ids
                .entry((r.provider_name.clone(), r.short_id))
                .or_default()
                .push(position);
        }
    }

    fn values(&self, kind: ValueKind) -> &Table<ValueName, (String, u64)> {
        match kind {
            ValueKind::Keyword => &self.keywords,
            ValueKind::Opcode => &self.opcodes,
            ValueKind::Task => &self.tasks,
        }
    }

    fn values_mut(&mut self, kind: ValueKind) -> &mut Table<ValueName, (String, u64)> {
        match kind {
            ValueKind::Keyword => &mut self.keywords,
            ValueKind::Opcode => &mut self.opcodes,
            ValueKind::Task => &mut self.tasks,
        }
    }

    fn persist_append<T: Serialize>(&self, kind: RecordKind, records: &[T]) -> StoreResult<()> {
        match &self.dir {
            Some(dir) => ndjson::append_table(&table_path(dir, kind), records),
            None => Ok(()),
        }
    }

    fn persist_table(&self, kind: RecordKind) -> StoreResult<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let path = table_path(dir, kind);
        match kind {
            RecordKind::Message => ndjson::rewrite_table(&path, &self.messages_by_raw_id.records),
            RecordKind::Event => ndjson::rewrite_table(&path, &self.events.records),
            RecordKind::Keyword => ndjson::rewrite_table(&path, &self.keywords.records),
            RecordKind::Opcode => ndjson::rewrite_table(&path, &self.opcodes.records),
            RecordKind::Task => ndjson::rewrite_table(&path, &self.tasks.records),
        }
    }

    fn persist_tags(&self) -> StoreResult<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let path = dir.join(TAGS_FILE);
        let json = serde_json::to_vec_pretty(&self.tags).map_err(|source| {
            StoreError::Serialize {
                what: "tag list",
                source,
            }
        })?;
        std::fs::write(&path, json).map_err(|source| StoreError::Io {
            action: "writing",
            path,
            source,
        })
    }
}

impl TemplateLookup for TemplateStore {
    fn messages_by_raw_id(&self, provider: &str, raw_id: u32) -> StoreResult<Vec<&MessageTemplate>> {
        Ok(self
            .messages_by_raw_id
            .get(&(normalize_provider_name(provider), raw_id)))
    }

    fn messages_by_short_id(
        &self,
        provider: &str,
        short_id: u16,
    ) -> StoreResult<Vec<&MessageTemplate>> {
        let records = &self.messages_by_raw_id.records;
        Ok(self
            .short_ids
            .get(&(normalize_provider_name(provider), short_id))
            .map(|positions| positions.iter().map(|&p| &records[p]).collect())
            .unwrap_or_default())
    }

    fn events(
        &self,
        provider: &str,
        id: u32,
        version: u8,
        log_name: &str,
    ) -> StoreResult<Vec<&ProviderEvent>> {
        Ok(self.events.get(&EventKey {
            provider: normalize_provider_name(provider),
            id,
            version,
            log_name: log_name_key(log_name),
        }))
    }

    fn value_names(
        &self,
        kind: ValueKind,
        provider: &str,
        value: u64,
    ) -> StoreResult<Vec<&ValueName>> {
        Ok(self
            .values(kind)
            .get(&(normalize_provider_name(provider), value)))
    }
}

fn table_path(dir: &Path, kind: RecordKind) -> PathBuf {
    dir.join(format!("{}s.ndjson", kind.as_str()))
}

fn read_tags(path: &Path) -> StoreResult<Vec<String>> {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::InvalidRecord {
            path: path.to_path_buf(),
            line: 1,
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(source) => Err(StoreError::Io {
            action: "reading",
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn message(provider: &str, raw_id: u32, text: &str, tag: &str) -> MessageTemplate {
        MessageTemplate::new(provider, raw_id, text.to_string(), tag)
    }

    fn value(provider: &str, value: u64, name: &str, tag: &str) -> ValueName {
        ValueName {
            provider_name: provider.to_string(),
            value,
            name: name.to_string(),
            tag: tag.to_string(),
        }
    }

    #[test]
    fn lookups_return_every_candidate_case_insensitively() {
        let mut store = TemplateStore::in_memory();
        store
            .bulk_insert(RecordBatch::Messages(vec![message("Svc", 7, "a", "t1")]))
            .unwrap();
        store
            .bulk_insert(RecordBatch::Messages(vec![message("SVC", 7, "b", "t2")]))
            .unwrap();

        let texts: Vec<&str> = store
            .messages_by_raw_id("svc", 7)
            .unwrap()
            .iter()
            .map(|m| m.text.as_str())
            .collect();
        assert_eq!(texts, vec!["a", "b"]);
        assert_eq!(store.list_tags(), &["t1".to_string(), "t2".to_string()]);
    }

    #[test]
    fn short_id_namespace_is_separate_from_raw_id() {
        let mut store = TemplateStore::in_memory();
        store
            .bulk_insert(RecordBatch::Messages(vec![message("P", 0x4000_0005, "x", "t")]))
            .unwrap();

        assert!(store.messages_by_raw_id("P", 5).unwrap().is_empty());
        assert_eq!(store.messages_by_short_id("P", 5).unwrap().len(), 1);
    }

    #[test]
    fn add_tag_rejects_duplicates() {
        let mut store = TemplateStore::in_memory();
        store.add_tag("a").unwrap();
        assert!(matches!(
            store.add_tag("a"),
            Err(StoreError::TagAlreadyExists { .. })
        ));
        assert!(matches!(store.add_tag(""), Err(StoreError::EmptyTag)));
    }

    #[test]
    fn mixed_tag_batches_are_rejected() {
        let mut store = TemplateStore::in_memory();
        let err = store
            .bulk_insert(RecordBatch::Tasks(vec![
                value("P", 1, "a", "t1"),
                value("P", 2, "b", "t2"),
            ]))
            .unwrap_err();
        assert!(matches!(err, StoreError::MixedTags { .. }));
        assert!(store.list_tags().is_empty());
    }

    #[test]
    fn event_log_names_match_case_insensitively() {
        let mut store = TemplateStore::in_memory();
        store
            .bulk_insert(RecordBatch::Events(vec![ProviderEvent {
                provider_name: "P".to_string(),
                id: 4,
                version: 1,
                log_name: "Microsoft-Windows-DNS-Client/Operational".to_string(),
                description: "d".to_string(),
                template: None,
                tag: "t".to_string(),
            }]))
            .unwrap();

        let found = store
            .events("p", 4, 1, "microsoft-windows-dns-client/operational")
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].log_name, "Microsoft-Windows-DNS-Client/Operational");
        assert!(store.events("P", 4, 1, "System").unwrap().is_empty());
    }

    #[test]
    fn delete_tag_cascades_over_every_table() {
        let mut store = TemplateStore::in_memory();
        for tag in ["keep", "drop"] {
            let bundle = MetadataBundle {
                messages: vec![message("P", 1, "m", tag)],
                events: vec![ProviderEvent {
                    provider_name: "P".to_string(),
                    id: 1,
                    version: 0,
                    log_name: "System".to_string(),
                    description: "d".to_string(),
                    template: None,
                    tag: tag.to_string(),
                }],
                keywords: vec![value("P", 1, "k", tag)],
                opcodes: vec![value("P", 1, "o", tag)],
                tasks: vec![value("P", 1, "t", tag)],
            };
            for batch in RecordBatch::from_bundle(bundle) {
                store.bulk_insert(batch).unwrap();
            }
        }

        store.delete_tag("drop").unwrap();

        assert_eq!(store.list_tags(), &["keep".to_string()]);
        assert_eq!(store.tag_counts("drop"), BundleCounts::default());
        assert_eq!(store.messages_by_raw_id("P", 1).unwrap().len(), 1);
        assert_eq!(store.messages_by_short_id("P", 1).unwrap().len(), 1);
        assert_eq!(store.events("P", 1, 0, "System").unwrap().len(), 1);
        for kind in [ValueKind::Keyword, ValueKind::Opcode, ValueKind::Task] {
            let names = store.value_names(kind, "P", 1).unwrap();
            assert_eq!(names.len(), 1);
            assert_eq!(names[0].tag, "keep");
        }
    }

    #[test]
    fn persisted_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = TemplateStore::open(dir.path()).unwrap();
            store
                .bulk_insert(RecordBatch::Keywords(vec![value("P", 0x8000, "Audit", "a")]))
                .unwrap();
            store
                .bulk_insert(RecordBatch::Keywords(vec![value("P", 0x8000, "Other", "b")]))
                .unwrap();
            store.delete_tag("a").unwrap();
        }

        let store = TemplateStore::open(dir.path()).unwrap();
        assert_eq!(store.list_tags(), &["b".to_string()]);
        let names = store.value_names(ValueKind::Keyword, "p", 0x8000).unwrap();
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].name, "Other");
    }
}
