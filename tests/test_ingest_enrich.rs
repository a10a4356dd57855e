
use fixtures::*;

use eventlog_expert::provider_metadata::ProviderRegistry;
use eventlog_expert::{
    BundleCounts, CollectingSink, EnrichedEventRecord, EventEnrichmentPipeline, JsonlRecordReader,
    PipelineSettings, ProviderMetadataExtractor, RawRecord, RegistrySnapshot, TagPriority,
    TemplateStore, VecRecordReader,
};
use pretty_assertions::assert_eq;
use std::io::Cursor;

fn extractor(machine: &MachineFixture) -> ProviderMetadataExtractor<RegistrySnapshot> {
    let registry = RegistrySnapshot::load(&machine.registry)
        .unwrap()
        .with_module_root(&machine.module_root);
    ProviderMetadataExtractor::new(registry)
}

fn ingest(
    machine: &MachineFixture,
    store: &mut TemplateStore,
    priority: &mut TagPriority,
    tag: &str,
) -> eventlog_expert::IngestSummary {
    let extractor = extractor(machine);
    let providers = extractor.registry().provider_names();
    eventlog_expert::ingest_providers(
        &extractor,
        store,
        priority,
        &providers,
        Some("HOST1"),
        tag,
        |_| {},
    )
    .unwrap()
}

fn records(values: &[serde_json::Value]) -> Vec<RawRecord> {
    values
        .iter()
        .map(|v| serde_json::from_value(v.clone()).unwrap())
        .collect()
}

fn enrich_all(
    store: &TemplateStore,
    priority: &TagPriority,
    values: &[serde_json::Value],
) -> Vec<EnrichedEventRecord> {
    let mut pipeline = EventEnrichmentPipeline::new(PipelineSettings::default());
    let mut sink = CollectingSink::default();
    pipeline
        .load(
            VecRecordReader::new(records(values)),
            store,
            &priority.snapshot(),
            &mut sink,
        )
        .unwrap();
    sink.into_ordered()
}

#[test]
fn test_ingest_reads_legacy_and_modern_modules() {
    ensure_env_logger_initialized();
    let machine = machine_fixture("Faulting application %1, version %2");
    let mut store = TemplateStore::in_memory();
    let mut priority = TagPriority::default();

    let summary = ingest(&machine, &mut store, &mut priority, "host1");

    assert_eq!(summary.providers, 2);
    assert_eq!(summary.providers_without_metadata, 0);
    assert!(!summary.replaced);
    assert_eq!(
        summary.counts,
        BundleCounts {
            // Two legacy strings, plus one task and two events in message shape.
            messages: 5,
            events: 2,
            keywords: 1,
            opcodes: 1,
            tasks: 1,
        }
    );
    assert_eq!(store.list_tags(), ["host1".to_string()]);
    assert_eq!(priority.order(), ["host1".to_string()]);

    let bundle = store.export_tag("host1").unwrap();
    let mut log_names: Vec<&str> = bundle.events.iter().map(|e| e.log_name.as_str()).collect();
    log_names.sort();
    assert_eq!(
        log_names,
        vec!["Microsoft-Windows-DNS-Client/Operational", "System"]
    );
    assert_eq!(bundle.keywords[0].name, "DNS Client Events");
    assert_eq!(bundle.opcodes[0].value, 10);
    assert_eq!(bundle.opcodes[0].name, "Suspend");
    assert_eq!(bundle.tasks[0].name, "Query");
}

#[test]
fn test_ingesting_the_same_tag_twice_replaces_it() {
    ensure_env_logger_initialized();
    let machine = machine_fixture("Faulting application %1");
    let mut store = TemplateStore::in_memory();
    let mut priority = TagPriority::default();

    let first = ingest(&machine, &mut store, &mut priority, "host1");
    let second = ingest(&machine, &mut store, &mut priority, "host1");

    assert!(second.replaced);
    assert_eq!(store.tag_counts("host1"), first.counts);
    assert_eq!(store.list_tags().len(), 1);
}

#[test]
fn test_reingesting_without_metadata_keeps_the_tag() {
    ensure_env_logger_initialized();
    let machine = machine_fixture("Faulting application %1");
    let mut store = TemplateStore::in_memory();
    let mut priority = TagPriority::default();
    let first = ingest(&machine, &mut store, &mut priority, "host1");

    let extractor = extractor(&machine);
    let summary = eventlog_expert::ingest_providers(
        &extractor,
        &mut store,
        &mut priority,
        &["Nobody"],
        Some("HOST1"),
        "host1",
        |_| {},
    )
    .unwrap();

    assert!(!summary.replaced);
    assert_eq!(summary.counts, BundleCounts::default());
    assert_eq!(summary.providers_without_metadata, 1);
    assert_eq!(store.list_tags(), ["host1".to_string()]);
    assert_eq!(priority.order(), ["host1".to_string()]);
    assert_eq!(store.tag_counts("host1"), first.counts);
}

#[test]
fn test_modern_record_is_fully_described() {
    ensure_env_logger_initialized();
    let machine = machine_fixture("Faulting application %1, version %2");
    let mut store = TemplateStore::in_memory();
    let mut priority = TagPriority::default();
    ingest(&machine, &mut store, &mut priority, "host1");

    let enriched = enrich_all(&store, &priority, &[dns_timeout_record(7)]);
    let record = &enriched[0];

    assert_eq!(
        record.description,
        "Name resolution for the name example.com timed out after none of the configured DNS servers responded."
    );
    assert_eq!(record.level_name, "Warning");
    assert_eq!(record.task_name, "Query");
    assert_eq!(record.opcode_name, "Suspend");
    assert_eq!(record.keyword_names, "DNS Client Events, Classic");
    assert_eq!(record.time_created_display, "2021-06-01 10:00:00");
    assert_eq!(record.raw.record_id, 7);
}

#[test]
fn test_legacy_record_is_described_from_the_message_table() {
    ensure_env_logger_initialized();
    let machine = machine_fixture("Faulting application %1, version %2");
    let mut store = TemplateStore::in_memory();
    let mut priority = TagPriority::default();
    ingest(&machine, &mut store, &mut priority, "host1");

    let enriched = enrich_all(&store, &priority, &[application_error_record(1)]);
    let record = &enriched[0];

    assert_eq!(record.description, "Faulting application app.exe, version 1.0.0.0");
    assert_eq!(record.level_name, "Error");
    assert_eq!(record.task_name, "Application Crashing Events");
    assert_eq!(record.opcode_name, "");
    // Keywords are only named when a modern event matched.
    assert_eq!(record.keyword_names, "");
}

#[test]
fn test_unknown_provider_lists_its_properties() {
    ensure_env_logger_initialized();
    let store = TemplateStore::in_memory();
    let priority = TagPriority::default();

    let mut record = application_error_record(1);
    record["providerName"] = "Nobody".into();
    let enriched = enrich_all(&store, &priority, &[record]);

    assert_eq!(
        enriched[0].description,
        format!(
            "{}app.exe\n1.0.0.0",
            eventlog_expert::format::DESCRIPTION_NOT_FOUND
        )
    );
    assert_eq!(enriched[0].task_name, "");
}

#[test]
fn test_priority_decides_between_machines_and_reresolution_follows_it() {
    ensure_env_logger_initialized();
    let machine_a = machine_fixture("A: %1 crashed");
    let machine_b = machine_fixture("B: %1 crashed");
    let mut store = TemplateStore::in_memory();
    let mut priority = TagPriority::default();
    ingest(&machine_a, &mut store, &mut priority, "machine-a");
    ingest(&machine_b, &mut store, &mut priority, "machine-b");
    assert_eq!(
        priority.order(),
        ["machine-a".to_string(), "machine-b".to_string()]
    );

    let mut pipeline = EventEnrichmentPipeline::new(PipelineSettings::default());
    let mut sink = CollectingSink::default();
    let input = [application_error_record(1), application_error_record(2)]
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join("\n");
    let reader = JsonlRecordReader::new(Cursor::new(input), "records.jsonl");
    let loaded = pipeline
        .load(reader, &store, &priority.snapshot(), &mut sink)
        .unwrap()
        .unwrap();
    assert!(sink.records.iter().all(|r| r.description == "A: app.exe crashed"));

    eventlog_expert::ingest::reorder_tags(&store, &mut priority, &["machine-b".to_string()])
        .unwrap();
    assert!(loaded.is_stale(&priority.snapshot()));

    let completion = pipeline
        .reresolve_now(&store, &priority.snapshot(), &mut sink)
        .unwrap()
        .unwrap();
    assert!(!completion.is_stale(&priority.snapshot()));
    assert_eq!(completion.records, 2);
    assert_eq!(sink.records.len(), 2);
    assert!(sink.records.iter().all(|r| r.description == "B: app.exe crashed"));
}

#[test]
fn test_deleting_a_tag_removes_its_descriptions() {
    ensure_env_logger_initialized();
    let machine = machine_fixture("Faulting application %1, version %2");
    let mut store = TemplateStore::in_memory();
    let mut priority = TagPriority::default();
    ingest(&machine, &mut store, &mut priority, "host1");

    eventlog_expert::ingest::delete_tag(&mut store, &mut priority, "host1").unwrap();
    assert!(store.list_tags().is_empty());
    assert!(priority.order().is_empty());

    let enriched = enrich_all(&store, &priority, &[dns_timeout_record(1)]);
    // A single property describes the record on its own.
    assert_eq!(enriched[0].description, "example.com");
    // The task equals the event id, so it is shown as a number.
    assert_eq!(enriched[0].task_name, "(1014)");
    assert_eq!(enriched[0].keyword_names, "");
}
