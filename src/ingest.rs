//! Entry points that change which tags the store holds: ingestion, import, deletion and
//! reordering. Each one leaves the tag priority merged with the store's tag set.

use crate::err::{StoreError, StoreResult};
use crate::model::BundleCounts;
use crate::priority::TagPriority;
use crate::provider_metadata::{ExtractProgress, ProviderMetadataExtractor, ProviderRegistry};
use crate::store::ndjson::{read_export, write_bundle};
use crate::store::{RecordBatch, TemplateStore};

use log::{info, warn};
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub tag: String,
    pub providers: usize,
    /// Providers that produced no record at all, whether they have no metadata or failed to load.
    pub providers_without_metadata: usize,
    pub counts: BundleCounts,
    /// A tag of the same name existed and was replaced.
    pub replaced: bool,
}

/// Extract `providers` and store the results under `tag`.
///
/// A tag that already exists is deleted first, so ingesting under the same name twice leaves one
/// copy. A run that finds nothing at all neither creates the tag nor replaces an existing one.
pub fn ingest_providers<R, S>(
    extractor: &ProviderMetadataExtractor<R>,
    store: &mut TemplateStore,
    priority: &mut TagPriority,
    providers: &[S],
    target_machine: Option<&str>,
    tag: &str,
    mut on_progress: impl FnMut(ExtractProgress<'_>),
) -> StoreResult<IngestSummary>
where
    R: ProviderRegistry,
    S: AsRef<str>,
{
    if tag.is_empty() {
        return Err(StoreError::EmptyTag);
    }

    let mut providers_without_metadata = 0;
    let bundle = extractor.extract_many(providers, target_machine, tag, |progress| {
        if progress.counts == BundleCounts::default() {
            providers_without_metadata += 1;
        }
        on_progress(progress);
    });

    let counts = bundle.counts();
    if bundle.is_empty() {
        warn!("no provider metadata found for tag `{}`", tag);
        if store.has_tag(tag) {
            info!("keeping existing tag `{}`", tag);
            return Ok(IngestSummary {
                tag: tag.to_string(),
                providers: providers.len(),
                providers_without_metadata,
                counts,
                replaced: false,
            });
        }
    }

    let replaced = store.has_tag(tag);
    if replaced {
        info!("replacing existing tag `{}`", tag);
        store.delete_tag(tag)?;
    }
    for batch in RecordBatch::from_bundle(bundle) {
        store.bulk_insert(batch)?;
    }

    sync_priority(store, priority)?;

    Ok(IngestSummary {
        tag: tag.to_string(),
        providers: providers.len(),
        providers_without_metadata,
        counts,
        replaced,
    })
}

/// Write every record of `tag` as an export. Returns the number of lines written.
pub fn export_tag<W: Write>(store: &TemplateStore, tag: &str, writer: W) -> StoreResult<usize> {
    let bundle = store.export_tag(tag)?;
    let written = write_bundle(writer, &bundle)?;
    info!("exported {} records of tag `{}`", written, tag);
    Ok(written)
}

/// Import an export file. See [`import_export`].
pub fn import_file(
    store: &mut TemplateStore,
    priority: &mut TagPriority,
    path: impl AsRef<Path>,
) -> StoreResult<Vec<(String, BundleCounts)>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| StoreError::Io {
        action: "opening",
        path: path.to_path_buf(),
        source,
    })?;
    import_export(store, priority, BufReader::new(file), path)
}

/// Insert every tag found in an export, replacing tags that already exist.
///
/// The whole export is parsed before anything is written, so a malformed line leaves the store
/// untouched. Returns the imported tags with their record counts.
pub fn import_export<B: BufRead>(
    store: &mut TemplateStore,
    priority: &mut TagPriority,
    reader: B,
    source: &Path,
) -> StoreResult<Vec<(String, BundleCounts)>> {
    let bundles = read_export(reader, source)?;

    let mut imported = Vec::with_capacity(bundles.len());
    for (tag, bundle) in bundles {
        if store.has_tag(&tag) {
            info!("import replaces existing tag `{}`", tag);
            store.delete_tag(&tag)?;
        }
        let counts = bundle.counts();
        for batch in RecordBatch::from_bundle(bundle) {
            store.bulk_insert(batch)?;
        }
        imported.push((tag, counts));
    }

    sync_priority(store, priority)?;
    info!("imported {} tags from `{}`", imported.len(), source.display());
    Ok(imported)
}

/// Delete a tag and drop it from the priority.
pub fn delete_tag(
    store: &mut TemplateStore,
    priority: &mut TagPriority,
    tag: &str,
) -> StoreResult<()> {
    store.delete_tag(tag)?;
    sync_priority(store, priority)
}

/// Reorder the priority. Tags missing from `order` keep their place after the listed ones.
pub fn reorder_tags(
    store: &TemplateStore,
    priority: &mut TagPriority,
    order: &[String],
) -> StoreResult<()> {
    if let Some(unknown) = order.iter().find(|t| !store.has_tag(t)) {
        return Err(StoreError::UnknownTag {
            tag: unknown.clone(),
        });
    }

    let mut merged = order.to_vec();
    merged.extend(
        priority
            .order()
            .iter()
            .filter(|t| !order.contains(t))
            .cloned(),
    );
    if priority.set_order(merged, store.list_tags()) {
        priority.save()?;
    }
    Ok(())
}

/// Merge the priority with the store's tags and persist it if that changed anything.
pub fn sync_priority(store: &TemplateStore, priority: &mut TagPriority) -> StoreResult<()> {
    if priority.merge(store.list_tags()) {
        priority.save()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MessageTemplate, MetadataBundle};
    use pretty_assertions::assert_eq;

    fn bundle(tag: &str, text: &str) -> MetadataBundle {
        MetadataBundle {
            messages: vec![MessageTemplate::new("P", 1, text.to_string(), tag)],
            ..Default::default()
        }
    }

    #[test]
    fn import_of_an_existing_tag_replaces_it() {
        let mut store = TemplateStore::in_memory();
        let mut priority = TagPriority::default();

        let mut export = Vec::new();
        write_bundle(&mut export, &bundle("machine-a", "old")).unwrap();
        import_export(&mut store, &mut priority, &export[..], Path::new("a.ndjson")).unwrap();

        let mut export = Vec::new();
        write_bundle(&mut export, &bundle("machine-a", "new")).unwrap();
        let imported =
            import_export(&mut store, &mut priority, &export[..], Path::new("a.ndjson")).unwrap();

        assert_eq!(imported.len(), 1);
        assert_eq!(store.tag_counts("machine-a").messages, 1);
        assert_eq!(store.export_tag("machine-a").unwrap().messages[0].text, "new");
        assert_eq!(priority.order(), &["machine-a".to_string()]);
    }

    #[test]
    fn deleting_a_tag_is_reflected_in_the_priority() {
        let mut store = TemplateStore::in_memory();
        let mut priority = TagPriority::default();
        for tag in ["a", "b", "c"] {
            for batch in RecordBatch::from_bundle(bundle(tag, tag)) {
                store.bulk_insert(batch).unwrap();
            }
        }
        sync_priority(&store, &mut priority).unwrap();

        reorder_tags(&store, &mut priority, &["c".to_string()]).unwrap();
        assert_eq!(priority.order(), &["c", "a", "b"].map(String::from));

        delete_tag(&mut store, &mut priority, "a").unwrap();
        assert_eq!(priority.order(), &["c", "b"].map(String::from));

        assert!(matches!(
            reorder_tags(&store, &mut priority, &["a".to_string()]),
            Err(StoreError::UnknownTag { .. })
        ));
    }
}
