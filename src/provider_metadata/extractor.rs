use crate::model::{BundleCounts, MessageTemplate, MetadataBundle, short_id};
use crate::provider_metadata::message_table::LegacyMessageTableParser;
use crate::provider_metadata::modern::ModernProviderMetadataParser;
use crate::provider_metadata::registry::ProviderRegistry;
use crate::settings::ExtractorSettings;

use log::{debug, info};

/// Progress of [`ProviderMetadataExtractor::extract_many`], reported once per provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractProgress<'a> {
    /// Zero-based index of the provider that was just processed.
    pub index: usize,
    pub total: usize,
    pub provider: &'a str,
    pub counts: BundleCounts,
}

/// Combines legacy message tables and modern manifests into one tagged bundle per provider.
///
/// Holds no state between calls besides its configuration.
pub struct ProviderMetadataExtractor<R: ProviderRegistry> {
    registry: R,
    settings: ExtractorSettings,
    legacy: LegacyMessageTableParser,
    modern: ModernProviderMetadataParser,
}

impl<R: ProviderRegistry> ProviderMetadataExtractor<R> {
    pub fn new(registry: R) -> Self {
        Self::with_settings(registry, ExtractorSettings::default())
    }

    pub fn with_settings(registry: R, settings: ExtractorSettings) -> Self {
        ProviderMetadataExtractor {
            registry,
            legacy: LegacyMessageTableParser::new(settings.clone()),
            modern: ModernProviderMetadataParser::new(settings.clone()),
            settings,
        }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Everything known about one provider, tagged with `tag`.
    ///
    /// Never fails: a provider with no legacy and no modern metadata yields an empty bundle.
    pub fn extract(
        &self,
        provider_name: &str,
        target_machine: Option<&str>,
        tag: &str,
    ) -> MetadataBundle {
        let message_files = self
            .registry
            .legacy_message_files(provider_name, target_machine);
        let mut messages = self
            .legacy
            .messages_for_provider(provider_name, &message_files, tag);

        let mut bundle = if self.settings.should_read_modern_providers() {
            self.modern
                .load(&self.registry, provider_name, target_machine, tag)
        } else {
            MetadataBundle::default()
        };

        messages.extend(modern_messages(&bundle));
        messages.append(&mut bundle.messages);
        bundle.messages = messages;

        debug!("extracted {:?} for provider `{}`", bundle.counts(), provider_name);
        bundle
    }

    /// Extract providers one after another, reporting progress after each.
    ///
    /// Providers are never processed in parallel: loading arbitrary third-party modules is not
    /// safely reentrant.
    pub fn extract_many<S: AsRef<str>>(
        &self,
        providers: &[S],
        target_machine: Option<&str>,
        tag: &str,
        mut on_progress: impl FnMut(ExtractProgress<'_>),
    ) -> MetadataBundle {
        let total = providers.len();
        let mut out = MetadataBundle::default();

        for (index, provider) in providers.iter().enumerate() {
            let provider = provider.as_ref();
            let bundle = self.extract(provider, target_machine, tag);
            on_progress(ExtractProgress {
                index,
                total,
                provider,
                counts: bundle.counts(),
            });
            out.extend(bundle);
        }

        info!(
            "extracted {} records from {} providers under tag `{}`",
            out.len(),
            total,
            tag
        );
        out
    }
}

/// Modern events and tasks in message shape, so records whose version or log name does not match
/// any event can still be described through the legacy lookup path.
fn modern_messages(bundle: &MetadataBundle) -> impl Iterator<Item = MessageTemplate> + '_ {
    let tasks = bundle.tasks.iter().map(|t| MessageTemplate {
        provider_name: t.provider_name.clone(),
        raw_id: t.value as u32,
        short_id: short_id(t.value as u32),
        text: t.name.clone(),
        template: None,
        log_name: None,
        tag: t.tag.clone(),
    });

    let events = bundle.events.iter().map(|e| MessageTemplate {
        provider_name: e.provider_name.clone(),
        raw_id: e.id,
        short_id: short_id(e.id),
        text: e.description.clone(),
        template: e.template.clone(),
        log_name: (!e.log_name.is_empty()).then(|| e.log_name.clone()),
        tag: e.tag.clone(),
    });

    tasks.chain(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProviderEvent, ValueName};
    use crate::provider_metadata::registry::RegistrySnapshot;

    fn empty_registry() -> RegistrySnapshot {
        serde_json::from_str("{}").unwrap()
    }

    #[test]
    fn unknown_provider_yields_five_empty_lists() {
        let extractor = ProviderMetadataExtractor::new(empty_registry());
        let bundle = extractor.extract("Nobody", None, "machine-a");
        assert_eq!(bundle, MetadataBundle::default());
    }

    #[test]
    fn progress_is_reported_per_provider_in_order() {
        let extractor = ProviderMetadataExtractor::new(empty_registry());
        let mut seen = Vec::new();
        extractor.extract_many(&["a", "b", "c"][..], None, "t", |p| {
            seen.push((p.index, p.total, p.provider.to_string()))
        });
        assert_eq!(
            seen,
            vec![
                (0, 3, "a".to_string()),
                (1, 3, "b".to_string()),
                (2, 3, "c".to_string())
            ]
        );
    }

    #[test]
    fn events_and_tasks_are_also_messages() {
        let bundle = MetadataBundle {
            events: vec![ProviderEvent {
                provider_name: "P".to_string(),
                id: 1014,
                version: 0,
                log_name: "System".to_string(),
                description: "Name resolution for %1 timed out.".to_string(),
                template: None,
                tag: "t".to_string(),
            }],
            tasks: vec![ValueName {
                provider_name: "P".to_string(),
                value: 3,
                name: "Query".to_string(),
                tag: "t".to_string(),
            }],
            ..Default::default()
        };

        let messages: Vec<_> = modern_messages(&bundle).collect();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].raw_id, 3);
        assert_eq!(messages[1].log_name.as_deref(), Some("System"));
    }
}
