//! Streaming enrichment of raw records into display-ready records.
//!
//! A pipeline instance is one session: it owns the resolution cache and keeps every raw record it
//! loaded, so a change of tag priority can be re-applied without reading the source again.

use crate::err::{PipelineError, PipelineResult, StoreResult};
use crate::format::{describe, level_name, set_bits, standard_keyword_name};
use crate::model::{ValueKind, normalize_provider_name};
use crate::priority::PrioritySnapshot;
use crate::reader::RecordReader;
use crate::record::{EnrichedEventRecord, Keywords, RawRecord};
use crate::resolution_cache::DescriptionResolutionCache;
use crate::settings::PipelineSettings;
use crate::store::TemplateLookup;
use crate::utils::format_in_zone;

use log::{debug, info, warn};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    /// Records were read from a source.
    Load,
    /// Buffered records were resolved again under a new priority.
    Reresolution,
}

/// Signalled once a run has emitted all of its records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// The source delivered oldest first; reverse once to get the newest-first view.
    pub reverse_order: bool,
    /// The ranking every record of the run was resolved under.
    pub priority: PrioritySnapshot,
    pub records: usize,
    pub kind: CompletionKind,
}

impl Completion {
    /// Whether the run's records were resolved under a ranking other than `current`.
    pub fn is_stale(&self, current: &PrioritySnapshot) -> bool {
        &self.priority != current
    }
}

/// Receives the output of a pipeline run.
pub trait EnrichmentSink {
    /// Called once per batch, in read order. Returning `Break` abandons the run before the next
    /// batch is requested.
    fn on_batch(&mut self, batch: Vec<EnrichedEventRecord>) -> ControlFlow<()>;

    /// Called when a re-resolution starts; previously emitted records are about to be re-sent.
    fn on_restart(&mut self) {}

    fn on_complete(&mut self, completion: Completion);

    /// Called with the error that terminates a run. Batches already emitted remain valid.
    fn on_error(&mut self, _error: &PipelineError) {}
}

/// Collects everything a run emits.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub records: Vec<EnrichedEventRecord>,
    pub batches: usize,
    pub completion: Option<Completion>,
}

impl CollectingSink {
    /// Records newest first, reversing once if the completed run asked for it.
    pub fn into_ordered(self) -> Vec<EnrichedEventRecord> {
        let mut records = self.records;
        if self.completion.is_some_and(|c| c.reverse_order) {
            records.reverse();
        }
        records
    }
}

impl EnrichmentSink for CollectingSink {
    fn on_batch(&mut self, batch: Vec<EnrichedEventRecord>) -> ControlFlow<()> {
        self.batches += 1;
        self.records.extend(batch);
        ControlFlow::Continue(())
    }

    fn on_restart(&mut self) {
        self.records.clear();
        self.batches = 0;
        self.completion = None;
    }

    fn on_complete(&mut self, completion: Completion) {
        self.completion = Some(completion);
    }
}

/// A request to re-resolve, valid until a newer one is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReresolutionTicket(u64);

/// Issues re-resolution tickets. Clones share one generation counter and may be moved to other
/// threads, so a newer request can supersede a pass that is still running.
#[derive(Debug, Clone, Default)]
pub struct ReresolutionHandle {
    generation: Arc<AtomicU64>,
}

impl ReresolutionHandle {
    pub fn request(&self) -> ReresolutionTicket {
        ReresolutionTicket(self.generation.fetch_add(1, Ordering::AcqRel) + 1)
    }

    pub fn is_current(&self, ticket: ReresolutionTicket) -> bool {
        self.generation.load(Ordering::Acquire) == ticket.0
    }
}

pub struct EventEnrichmentPipeline {
    settings: PipelineSettings,
    cache: DescriptionResolutionCache,
    buffer: Vec<Arc<RawRecord>>,
    reverse_order: bool,
    reresolution: ReresolutionHandle,
}

impl Default for EventEnrichmentPipeline {
    fn default() -> Self {
        EventEnrichmentPipeline::new(PipelineSettings::default())
    }
}

impl EventEnrichmentPipeline {
    pub fn new(settings: PipelineSettings) -> Self {
        EventEnrichmentPipeline {
            settings,
            cache: DescriptionResolutionCache::default(),
            buffer: Vec::new(),
            reverse_order: false,
            reresolution: ReresolutionHandle::default(),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Replace the settings. Already emitted records keep their old display time until they are
    /// re-resolved.
    pub fn set_settings(&mut self, settings: PipelineSettings) {
        self.settings = settings;
    }

    /// Raw records of the last load, in read order.
    pub fn buffered(&self) -> &[Arc<RawRecord>] {
        &self.buffer
    }

    pub fn cache(&self) -> &DescriptionResolutionCache {
        &self.cache
    }

    pub fn reresolution_handle(&self) -> ReresolutionHandle {
        self.reresolution.clone()
    }

    /// Drop the buffered records and every cached resolution.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.cache.clear();
        self.reverse_order = false;
    }

    /// Read `reader` to the end, emitting one enriched batch per raw batch.
    ///
    /// Returns `None` when the sink abandoned the run. A reader failure is passed to the sink and
    /// returned; batches emitted before it stay valid.
    pub fn load<R, S>(
        &mut self,
        reader: R,
        store: &S,
        priority: &PrioritySnapshot,
        sink: &mut dyn EnrichmentSink,
    ) -> PipelineResult<Option<Completion>>
    where
        R: RecordReader,
        S: TemplateLookup + ?Sized,
    {
        self.clear();
        self.cache.sync_priority(priority);
        self.reverse_order = reader.delivers_oldest_first() || self.settings.is_source_oldest_first();

        let mut emitted = 0;
        for batch in reader.batches() {
            let records = match batch {
                Ok(records) => records,
                Err(source) => {
                    let err = PipelineError::Reader { emitted, source };
                    warn!("enrichment run terminated: {}", err);
                    sink.on_error(&err);
                    return Err(err);
                }
            };

            let start = self.buffer.len();
            self.buffer.extend(records.into_iter().map(Arc::new));
            let enriched = match self.enrich_range(start, self.buffer.len(), store) {
                Ok(enriched) => enriched,
                Err(e) => return Err(fail(sink, e)),
            };

            emitted += enriched.len();
            if sink.on_batch(enriched).is_break() {
                info!("enrichment run abandoned after {} records", emitted);
                return Ok(None);
            }
        }

        let completion = Completion {
            reverse_order: self.reverse_order,
            priority: priority.clone(),
            records: emitted,
            kind: CompletionKind::Load,
        };
        debug!("loaded {} records", emitted);
        sink.on_complete(completion.clone());
        Ok(Some(completion))
    }

    /// Resolve the buffered records again under `priority`, one chunk at a time.
    ///
    /// Between chunks the pass yields the thread and gives up (returning `None`) as soon as a newer
    /// ticket has been issued, so only the latest request runs to completion.
    pub fn reresolve<S: TemplateLookup + ?Sized>(
        &mut self,
        ticket: ReresolutionTicket,
        store: &S,
        priority: &PrioritySnapshot,
        sink: &mut dyn EnrichmentSink,
    ) -> PipelineResult<Option<Completion>> {
        if !self.reresolution.is_current(ticket) {
            debug!("re-resolution {:?} superseded before it started", ticket);
            return Ok(None);
        }

        self.cache.sync_priority(priority);
        sink.on_restart();

        let chunk_size = self.settings.get_reresolution_chunk_size();
        let total = self.buffer.len();
        let mut start = 0;
        while start < total {
            if !self.reresolution.is_current(ticket) {
                debug!(
                    "re-resolution {:?} superseded after {} of {} records",
                    ticket, start, total
                );
                return Ok(None);
            }

            let end = (start + chunk_size).min(total);
            let enriched = match self.enrich_range(start, end, store) {
                Ok(enriched) => enriched,
                Err(e) => return Err(fail(sink, e)),
            };
            if sink.on_batch(enriched).is_break() {
                return Ok(None);
            }

            start = end;
            std::thread::yield_now();
        }

        let completion = Completion {
            reverse_order: self.reverse_order,
            priority: priority.clone(),
            records: total,
            kind: CompletionKind::Reresolution,
        };
        sink.on_complete(completion.clone());
        Ok(Some(completion))
    }

    /// Issue a fresh ticket and re-resolve with it.
    pub fn reresolve_now<S: TemplateLookup + ?Sized>(
        &mut self,
        store: &S,
        priority: &PrioritySnapshot,
        sink: &mut dyn EnrichmentSink,
    ) -> PipelineResult<Option<Completion>> {
        let ticket = self.reresolution.request();
        self.reresolve(ticket, store, priority, sink)
    }

    /// Enrich one record under the cache's current priority.
    pub fn enrich<S: TemplateLookup + ?Sized>(
        &mut self,
        raw: Arc<RawRecord>,
        store: &S,
    ) -> StoreResult<EnrichedEventRecord> {
        enrich_record(&mut self.cache, &self.settings, store, raw)
    }

    fn enrich_range<S: TemplateLookup + ?Sized>(
        &mut self,
        start: usize,
        end: usize,
        store: &S,
    ) -> StoreResult<Vec<EnrichedEventRecord>> {
        let EventEnrichmentPipeline {
            settings,
            cache,
            buffer,
            ..
        } = self;
        buffer[start..end]
            .iter()
            .map(|raw| enrich_record(cache, settings, store, Arc::clone(raw)))
            .collect()
    }
}

fn fail(sink: &mut dyn EnrichmentSink, err: crate::err::StoreError) -> PipelineError {
    let err = PipelineError::from(err);
    warn!("enrichment run terminated: {}", err);
    sink.on_error(&err);
    err
}

fn enrich_record<S: TemplateLookup + ?Sized>(
    cache: &mut DescriptionResolutionCache,
    settings: &PipelineSettings,
    store: &S,
    raw: Arc<RawRecord>,
) -> StoreResult<EnrichedEventRecord> {
    let provider = normalize_provider_name(&raw.provider_name);

    let event = match raw.modern_key() {
        Some((version, log_name)) => cache
            .event(store, &provider, raw.id, version, log_name)?
            .map(|e| e.description.clone()),
        None => None,
    };

    let (description, task_name, opcode_name, keyword_names) = match event {
        Some(format) => {
            let task = value_name(cache, store, ValueKind::Task, &provider, raw.task.into())?;
            let opcode = value_name(cache, store, ValueKind::Opcode, &provider, raw.opcode.into())?;
            let keywords = keyword_names(cache, store, &provider, &raw.keywords)?;
            (describe(Some(&format), &raw.properties), task, opcode, keywords)
        }
        None => {
            let log_name = (!raw.log_name.is_empty()).then_some(raw.log_name.as_str());
            let format = message_text(cache, store, &provider, raw.message_id(), log_name)?;
            let task = match raw.task {
                0 => "None".to_string(),
                task if task == raw.id => format!("({})", task),
                task => message_text(cache, store, &provider, task, None)?.unwrap_or_default(),
            };
            let opcode = match raw.opcode {
                0 => String::new(),
                opcode => message_text(cache, store, &provider, opcode, None)?.unwrap_or_default(),
            };
            // Keywords are only named for modern events.
            (describe(format.as_deref(), &raw.properties), task, opcode, String::new())
        }
    };

    Ok(EnrichedEventRecord {
        level_name: level_name(raw.level).to_string(),
        description,
        task_name,
        opcode_name,
        keyword_names,
        time_created_display: format_in_zone(
            raw.time_created,
            settings.get_time_zone(),
            settings.get_time_format(),
        ),
        raw,
    })
}

fn message_text<S: TemplateLookup + ?Sized>(
    cache: &mut DescriptionResolutionCache,
    store: &S,
    provider: &str,
    raw_id: u32,
    log_name: Option<&str>,
) -> StoreResult<Option<String>> {
    Ok(cache
        .message(store, provider, raw_id, log_name)?
        .map(|m| m.text.clone()))
}

fn value_name<S: TemplateLookup + ?Sized>(
    cache: &mut DescriptionResolutionCache,
    store: &S,
    kind: ValueKind,
    provider: &str,
    value: u64,
) -> StoreResult<String> {
    Ok(cache
        .value_name(store, kind, provider, value)?
        .map(|v| v.name.clone())
        .unwrap_or_default())
}

/// Names of every set bit, resolved independently, comma-joined. Bits the provider does not name
/// fall back to the reserved keyword names; bits nobody names are skipped.
fn keyword_names<S: TemplateLookup + ?Sized>(
    cache: &mut DescriptionResolutionCache,
    store: &S,
    provider: &str,
    keywords: &Keywords,
) -> StoreResult<String> {
    let mut names: Vec<String> = Vec::new();
    for &mask in keywords.masks() {
        for bit in set_bits(mask) {
            let name = match cache.value_name(store, ValueKind::Keyword, provider, bit)? {
                Some(v) => Some(v.name.clone()),
                None => standard_keyword_name(bit).map(str::to_string),
            };
            if let Some(name) = name {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
    }
    Ok(names.join(", "))
}
