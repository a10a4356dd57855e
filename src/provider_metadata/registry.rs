//! Where provider metadata lives on a machine.
//!
//! Legacy providers register message files under
//! `HKLM\SYSTEM\CurrentControlSet\Services\EventLog\<log>\<source>\EventMessageFile`; modern
//! providers register under `HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\WINEVT\Publishers\{guid}`
//! with a resource file (holding the manifest) and a message file (holding its strings).
//!
//! [`RegistrySnapshot`] is an export of those keys taken on the source machine, which lets
//! metadata be ingested without access to the live registry.

use crate::err::RegistryError;
use crate::model::normalize_provider_name;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModernRegistration {
    /// Provider GUID, upper case without braces.
    pub guid: String,
    pub resource_files: Vec<PathBuf>,
    pub message_files: Vec<PathBuf>,
}

/// Lookup of provider registrations for a (possibly remote) machine.
pub trait ProviderRegistry {
    /// All registered provider names, sorted and deduplicated.
    fn provider_names(&self) -> Vec<String>;

    /// Message files of a legacy event source. Empty if the source is not registered.
    fn legacy_message_files(&self, provider_name: &str, target_machine: Option<&str>)
    -> Vec<PathBuf>;

    fn modern_provider(
        &self,
        provider_name: &str,
        target_machine: Option<&str>,
    ) -> Option<ModernRegistration>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacySource {
    #[serde(default)]
    pub event_message_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Publisher {
    pub guid: String,
    pub name: String,
    #[serde(default)]
    pub resource_file_name: Option<String>,
    #[serde(default)]
    pub message_file_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    #[serde(default = "default_system_root")]
    pub system_root: String,
    /// `log name -> source name -> registration`.
    #[serde(default)]
    pub legacy: BTreeMap<String, BTreeMap<String, LegacySource>>,
    #[serde(default)]
    pub publishers: Vec<Publisher>,
    /// Local directory mirroring the source machine's system drive.
    #[serde(skip)]
    pub module_root: Option<PathBuf>,
}

fn default_system_root() -> String {
    r"C:\Windows".to_string()
}

impl RegistrySnapshot {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| RegistryError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn with_module_root(mut self, module_root: impl Into<PathBuf>) -> Self {
        self.module_root = Some(module_root.into());
        self
    }

    fn resolver<'a>(&'a self, target_machine: Option<&'a str>) -> PathResolver<'a> {
        PathResolver {
            system_root: &self.system_root,
            target_machine,
            module_root: self.module_root.as_deref(),
        }
    }

    fn publisher(&self, provider_name: &str) -> Option<&Publisher> {
        let wanted = normalize_provider_name(provider_name);
        self.publishers
            .iter()
            .find(|p| normalize_provider_name(&p.name) == wanted)
    }
}

impl ProviderRegistry for RegistrySnapshot {
    fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .legacy
            .values()
            .flat_map(|sources| sources.keys().cloned())
            .chain(self.publishers.iter().map(|p| p.name.clone()))
            .collect();
        names.sort_by_key(|n| normalize_provider_name(n));
        names.dedup_by(|a, b| a.eq_ignore_ascii_case(b));
        names
    }

    fn legacy_message_files(
        &self,
        provider_name: &str,
        target_machine: Option<&str>,
    ) -> Vec<PathBuf> {
        let wanted = normalize_provider_name(provider_name);
        let resolver = self.resolver(target_machine);

        self.legacy
            .values()
            .flat_map(|sources| sources.iter())
            .find(|(name, _)| normalize_provider_name(name) == wanted)
            .and_then(|(_, source)| source.event_message_file.as_deref())
            .map(|files| resolver.resolve_list(files))
            .unwrap_or_default()
    }

    fn modern_provider(
        &self,
        provider_name: &str,
        target_machine: Option<&str>,
    ) -> Option<ModernRegistration> {
        let publisher = self.publisher(provider_name)?;
        let resolver = self.resolver(target_machine);

        let resource_files = publisher
            .resource_file_name
            .as_deref()
            .map(|f| resolver.resolve_list(f))
            .unwrap_or_default();
        // The message file defaults to the resource file when not registered separately.
        let message_files = publisher
            .message_file_name
            .as_deref()
            .map(|f| resolver.resolve_list(f))
            .unwrap_or_else(|| resource_files.clone());

        Some(ModernRegistration {
            guid: normalize_guid(&publisher.guid),
            resource_files,
            message_files,
        })
    }
}

/// `{3e3cf7b8-...}` and `3E3CF7B8-...` compare equal after this.
pub fn normalize_guid(guid: &str) -> String {
    guid.trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .to_ascii_uppercase()
}

/// Maps registered module paths onto paths readable from this machine.
#[derive(Debug, Clone, Copy)]
pub struct PathResolver<'a> {
    pub system_root: &'a str,
    pub target_machine: Option<&'a str>,
    pub module_root: Option<&'a Path>,
}

impl PathResolver<'_> {
    /// Resolve a `;`-separated list of registered paths.
    pub fn resolve_list(&self, registered: &str) -> Vec<PathBuf> {
        registered
            .split(';')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| self.resolve(p))
            .collect()
    }

    pub fn resolve(&self, registered: &str) -> PathBuf {
        let expanded = expand_system_root(registered, self.system_root);

        if let Some(root) = self.module_root {
            let mut out = root.to_path_buf();
            out.extend(
                strip_drive(&expanded)
                    .split('\\')
                    .filter(|c| !c.is_empty()),
            );
            return out;
        }

        if let Some(machine) = self.target_machine {
            if let Some((drive, rest)) = split_drive(&expanded) {
                return PathBuf::from(format!(r"\\{machine}\{drive}$\{rest}"));
            }
        }

        PathBuf::from(expanded)
    }
}

fn expand_system_root(path: &str, system_root: &str) -> String {
    let mut out = path.to_string();
    for var in ["%systemroot%", "%windir%"] {
        while let Some(pos) = out.to_ascii_lowercase().find(var) {
            out.replace_range(pos..pos + var.len(), system_root);
        }
    }
    out
}

/// `C:\x\y` -> `("C", "x\y")`.
fn split_drive(path: &str) -> Option<(char, &str)> {
    let mut chars = path.chars();
    let drive = chars.next().filter(char::is_ascii_alphabetic)?;
    let rest = path.get(1..)?.strip_prefix(':')?;
    Some((drive.to_ascii_uppercase(), rest.trim_start_matches('\\')))
}

fn strip_drive(path: &str) -> &str {
    split_drive(path).map_or(path, |(_, rest)| rest)
}
