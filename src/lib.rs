#![deny(unused_must_use)]
#![forbid(unsafe_code)]
// Don't allow dbg! prints in release.
#![cfg_attr(not(debug_assertions), deny(clippy::dbg_macro))]
//! Offline description resolution for Windows event logs.
//!
//! Provider metadata (legacy message tables and modern manifests) is extracted once per machine,
//! stored under a tag, and later used to enrich raw event records anywhere, with a user-ordered
//! tag priority deciding between machines that disagree.

pub use err::{
    ManifestError, MessageTableError, PipelineError, PipelineResult, ProviderMetadataError,
    ReaderError, RecordValidationError, RegistryError, ResourceError, StoreError, StoreResult,
};
pub use ingest::{IngestSummary, import_file, ingest_providers};
pub use model::{
    BundleCounts, IngestionTag, MessageTemplate, MetadataBundle, ProviderEvent, RecordKind,
    ValueKind, ValueName,
};
pub use pipeline::{
    CollectingSink, Completion, CompletionKind, EnrichmentSink, EventEnrichmentPipeline,
    ReresolutionHandle, ReresolutionTicket,
};
pub use priority::{PrioritySnapshot, TagPriority};
pub use provider_metadata::{
    ExtractProgress, LegacyMessageTableParser, ModernProviderMetadataParser,
    ProviderMetadataExtractor, ProviderRegistry, RegistrySnapshot,
};
pub use reader::{Batch, Batches, JsonlRecordReader, RecordReader, VecRecordReader};
pub use record::{EnrichedEventRecord, Keywords, RawRecord};
pub use resolution_cache::DescriptionResolutionCache;
pub use settings::{ExtractorSettings, PipelineSettings};
pub use store::{RecordBatch, TemplateLookup, TemplateStore};

pub mod err;
pub mod format;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod priority;
pub mod provider_metadata;
pub mod reader;
pub mod record;
pub mod resolution_cache;
pub mod settings;
pub mod store;
pub mod utils;
