
use fixtures::*;

use eventlog_expert::ingest::{export_tag, import_export, reorder_tags};
use eventlog_expert::provider_metadata::ProviderRegistry;
use eventlog_expert::{
    ProviderMetadataExtractor, RegistrySnapshot, StoreError, TagPriority, TemplateLookup,
    TemplateStore, ValueKind,
};
use pretty_assertions::assert_eq;
use std::io::Cursor;
use std::path::Path;
use tempfile::tempdir;

fn ingest_machine(store: &mut TemplateStore, priority: &mut TagPriority, tag: &str, text: &str) {
    let machine = machine_fixture(text);
    let registry = RegistrySnapshot::load(&machine.registry)
        .unwrap()
        .with_module_root(&machine.module_root);
    let extractor = ProviderMetadataExtractor::new(registry);
    let providers = extractor.registry().provider_names();
    eventlog_expert::ingest_providers(&extractor, store, priority, &providers, None, tag, |_| {})
        .unwrap();
}

#[test]
fn test_persisted_store_survives_reopening() {
    ensure_env_logger_initialized();
    let dir = tempdir().unwrap();
    let priority_path = dir.path().join("tag_priority.json");

    {
        let mut store = TemplateStore::open(dir.path().join("store")).unwrap();
        let mut priority = TagPriority::load(&priority_path).unwrap();
        ingest_machine(&mut store, &mut priority, "host1", "one %1");
        ingest_machine(&mut store, &mut priority, "host2", "two %1");
        reorder_tags(&store, &mut priority, &["host2".to_string()]).unwrap();
    }

    let store = TemplateStore::open(dir.path().join("store")).unwrap();
    let priority = TagPriority::load(&priority_path).unwrap();

    assert_eq!(store.list_tags(), ["host1".to_string(), "host2".to_string()]);
    assert_eq!(priority.order(), ["host2".to_string(), "host1".to_string()]);

    let candidates = store.messages_by_raw_id(APPLICATION_ERROR, 1000).unwrap();
    assert_eq!(candidates.len(), 2);
    let chosen = priority.pick_by_priority(&candidates).unwrap();
    assert_eq!(chosen.text, "two %1");

    let keywords = store
        .value_names(ValueKind::Keyword, DNS_CLIENT, DNS_CLIENT_KEYWORD)
        .unwrap();
    assert_eq!(keywords.len(), 2);
}

#[test]
fn test_deleting_a_persisted_tag_rewrites_the_tables() {
    ensure_env_logger_initialized();
    let dir = tempdir().unwrap();
    let store_dir = dir.path().join("store");

    {
        let mut store = TemplateStore::open(&store_dir).unwrap();
        let mut priority = TagPriority::default();
        ingest_machine(&mut store, &mut priority, "host1", "one %1");
        ingest_machine(&mut store, &mut priority, "host2", "two %1");
        eventlog_expert::ingest::delete_tag(&mut store, &mut priority, "host1").unwrap();
        assert_eq!(priority.order(), ["host2".to_string()]);
    }

    let store = TemplateStore::open(&store_dir).unwrap();
    assert_eq!(store.list_tags(), ["host2".to_string()]);
    let texts: Vec<&str> = store
        .messages_by_raw_id(APPLICATION_ERROR, 1000)
        .unwrap()
        .into_iter()
        .map(|m| m.text.as_str())
        .collect();
    assert_eq!(texts, vec!["two %1"]);
    assert!(matches!(
        TemplateStore::open(&store_dir).unwrap().delete_tag("host1"),
        Err(StoreError::UnknownTag { .. })
    ));
}

#[test]
fn test_export_then_import_into_another_store() {
    ensure_env_logger_initialized();
    let mut source = TemplateStore::in_memory();
    let mut source_priority = TagPriority::default();
    ingest_machine(&mut source, &mut source_priority, "host1", "one %1");

    let mut exported = Vec::new();
    let written = export_tag(&source, "host1", &mut exported).unwrap();
    let counts = source.tag_counts("host1");
    assert_eq!(
        written,
        counts.messages + counts.events + counts.keywords + counts.opcodes + counts.tasks
    );

    let mut target = TemplateStore::in_memory();
    let mut target_priority = TagPriority::default();
    let imported = import_export(
        &mut target,
        &mut target_priority,
        Cursor::new(exported),
        Path::new("host1.ndjson"),
    )
    .unwrap();

    assert_eq!(imported, vec![("host1".to_string(), counts)]);
    assert_eq!(target_priority.order(), ["host1".to_string()]);
    assert_eq!(
        target.export_tag("host1").unwrap(),
        source.export_tag("host1").unwrap()
    );
}

#[test]
fn test_import_replaces_an_existing_tag() {
    ensure_env_logger_initialized();
    let mut source = TemplateStore::in_memory();
    ingest_machine(&mut source, &mut TagPriority::default(), "host1", "new %1");
    let mut exported = Vec::new();
    export_tag(&source, "host1", &mut exported).unwrap();

    let mut target = TemplateStore::in_memory();
    let mut priority = TagPriority::default();
    ingest_machine(&mut target, &mut priority, "host1", "old %1");
    let before = target.tag_counts("host1");

    import_export(
        &mut target,
        &mut priority,
        Cursor::new(exported),
        Path::new("host1.ndjson"),
    )
    .unwrap();

    assert_eq!(target.tag_counts("host1"), before);
    let texts: Vec<&str> = target
        .messages_by_raw_id(APPLICATION_ERROR, 1000)
        .unwrap()
        .into_iter()
        .map(|m| m.text.as_str())
        .collect();
    assert_eq!(texts, vec!["new %1"]);
}

#[test]
fn test_malformed_import_leaves_the_store_untouched() {
    ensure_env_logger_initialized();
    let mut store = TemplateStore::in_memory();
    let mut priority = TagPriority::default();
    ingest_machine(&mut store, &mut priority, "host1", "one %1");
    let before = store.export_tag("host1").unwrap();

    let mut exported = Vec::new();
    export_tag(&store, "host1", &mut exported).unwrap();
    exported.extend_from_slice(b"{\"kind\":\"message\",\"oops\":true}\n");

    let result = import_export(
        &mut store,
        &mut priority,
        Cursor::new(exported),
        Path::new("broken.ndjson"),
    );

    assert!(matches!(result, Err(StoreError::InvalidRecord { .. })));
    assert_eq!(store.export_tag("host1").unwrap(), before);
}

#[test]
fn test_reordering_rejects_unknown_tags() {
    ensure_env_logger_initialized();
    let mut store = TemplateStore::in_memory();
    let mut priority = TagPriority::default();
    ingest_machine(&mut store, &mut priority, "host1", "one %1");

    let result = reorder_tags(&store, &mut priority, &["nope".to_string()]);
    assert!(matches!(result, Err(StoreError::UnknownTag { tag }) if tag == "nope"));
    assert_eq!(priority.order(), ["host1".to_string()]);
}
