//! Manifest-based ("modern") provider metadata.
//!
//! A registered provider points at a resource file holding its `WEVT_TEMPLATE` manifest and a
//! message file holding the strings the manifest refers to by message id.

use crate::err::ProviderMetadataError;
use crate::model::{MetadataBundle, ProviderEvent, ValueName};
use crate::provider_metadata::manifest::{
    CrimManifest, ManifestProvider, TemplateDefinition, ValueDefinition,
};
use crate::provider_metadata::message_table::LegacyMessageTableParser;
use crate::provider_metadata::registry::{ModernRegistration, ProviderRegistry, normalize_guid};
use crate::provider_metadata::resources::{self, ResourceIdentifier, WEVT_TEMPLATE};
use crate::settings::ExtractorSettings;

use hashbrown::HashMap;
use log::{debug, warn};
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use std::io::Cursor;
use std::path::Path;

const EVENTS_NAMESPACE: &str = "http://schemas.microsoft.com/win/2004/08/events";

/// Channels every provider may write to without declaring them.
fn standard_channel_name(identifier: u8) -> Option<&'static str> {
    match identifier {
        8 => Some("System"),
        9 => Some("Application"),
        10 => Some("Security"),
        _ => None,
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModernProviderMetadataParser {
    message_tables: LegacyMessageTableParser,
}

impl ModernProviderMetadataParser {
    pub fn new(settings: ExtractorSettings) -> Self {
        ModernProviderMetadataParser {
            message_tables: LegacyMessageTableParser::new(settings),
        }
    }

    /// Events, keywords, opcodes and tasks of `provider_name`.
    ///
    /// An unregistered provider yields an empty bundle. So does any failure while reading the
    /// provider's files; the failure is logged and never reaches the caller.
    pub fn load(
        &self,
        registry: &dyn ProviderRegistry,
        provider_name: &str,
        target_machine: Option<&str>,
        tag: &str,
    ) -> MetadataBundle {
        let Some(registration) = registry.modern_provider(provider_name, target_machine) else {
            debug!("provider `{}` has no modern registration", provider_name);
            return MetadataBundle::default();
        };

        match self.read(&registration, provider_name, tag) {
            Ok(bundle) => bundle,
            Err(err) => {
                warn!(
                    "failed to read modern metadata for provider `{}`: {}",
                    provider_name, err
                );
                MetadataBundle::default()
            }
        }
    }

    pub fn read(
        &self,
        registration: &ModernRegistration,
        provider_name: &str,
        tag: &str,
    ) -> Result<MetadataBundle, ProviderMetadataError> {
        let manifest = self.find_manifest(registration)?;
        let provider = manifest
            .providers
            .iter()
            .find(|p| normalize_guid(&p.guid.to_string()) == registration.guid)
            .ok_or_else(|| ProviderMetadataError::ProviderNotInManifest {
                path: registration
                    .resource_files
                    .first()
                    .cloned()
                    .unwrap_or_default(),
                guid: registration.guid.clone(),
            })?;

        let mut strings = HashMap::new();
        for file in &registration.message_files {
            for entry in self.message_tables.load_module(file).entries {
                strings.entry(entry.id).or_insert(entry.text);
            }
        }

        describe_provider(provider, &strings, provider_name, tag)
    }

    fn find_manifest(
        &self,
        registration: &ModernRegistration,
    ) -> Result<CrimManifest, ProviderMetadataError> {
        let mut last_err = None;

        for path in &registration.resource_files {
            match read_manifest(path) {
                Ok(manifest) if manifest.providers.iter().any(|p| {
                    normalize_guid(&p.guid.to_string()) == registration.guid
                }) =>
                {
                    return Ok(manifest);
                }
                Ok(_) => {
                    last_err = Some(ProviderMetadataError::ProviderNotInManifest {
                        path: path.clone(),
                        guid: registration.guid.clone(),
                    })
                }
                Err(err) => last_err = Some(err),
            }
        }

        Err(
            last_err.unwrap_or_else(|| ProviderMetadataError::MissingManifest {
                path: Default::default(),
            }),
        )
    }
}

fn read_manifest(path: &Path) -> Result<CrimManifest, ProviderMetadataError> {
    let pe_bytes = std::fs::read(path).map_err(|source| ProviderMetadataError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let resources = resources::extract_resources(
        &pe_bytes,
        &ResourceIdentifier::Name(WEVT_TEMPLATE.to_string()),
    )?;
    let resource = resources
        .into_iter()
        .next()
        .ok_or_else(|| ProviderMetadataError::MissingManifest {
            path: path.to_path_buf(),
        })?;

    Ok(CrimManifest::parse(&resource.data)?)
}

fn describe_provider(
    provider: &ManifestProvider,
    strings: &HashMap<u32, String>,
    provider_name: &str,
    tag: &str,
) -> Result<MetadataBundle, ProviderMetadataError> {
    let lookup = |id: Option<u32>| id.and_then(|id| strings.get(&id)).map(String::as_str);

    let mut bundle = MetadataBundle::default();

    for event in &provider.events {
        let log_name = provider
            .channel(event.channel)
            .and_then(|c| {
                c.name
                    .clone()
                    .or_else(|| lookup(c.message_id).map(display_name))
            })
            .or_else(|| standard_channel_name(event.channel).map(str::to_string))
            .unwrap_or_default();

        let template = event
            .template_offset
            .and_then(|offset| provider.template_by_offset(offset))
            .map(render_template)
            .transpose()?;

        bundle.events.push(ProviderEvent {
            provider_name: provider_name.to_string(),
            id: u32::from(event.identifier),
            version: event.version,
            log_name,
            description: lookup(event.message_id).unwrap_or_default().to_string(),
            template,
            tag: tag.to_string(),
        });
    }

    let names = |defs: &[ValueDefinition], value: fn(u64) -> u64| -> Vec<ValueName> {
        defs.iter()
            .map(|d| ValueName {
                provider_name: provider_name.to_string(),
                value: value(d.identifier),
                name: lookup(d.message_id)
                    .map(display_name)
                    .or_else(|| d.name.clone())
                    .unwrap_or_default(),
                tag: tag.to_string(),
            })
            .collect()
    };

    bundle.keywords = names(&provider.keywords, |v| v);
    // The high word of an opcode identifier is the opcode value; the low word is its task.
    bundle.opcodes = names(&provider.opcodes, |v| v >> 16);
    bundle.tasks = names(&provider.tasks, |v| v);

    debug!(
        "provider `{}`: {} events, {} keywords, {} opcodes, {} tasks",
        provider_name,
        bundle.events.len(),
        bundle.keywords.len(),
        bundle.opcodes.len(),
        bundle.tasks.len()
    );

    Ok(bundle)
}

/// Message-table strings carry the line terminator the message compiler appends.
fn display_name(text: &str) -> String {
    text.trim_end().to_string()
}

/// Render a template's field list in the shape of the OS event metadata API:
///
/// ```xml
/// <template xmlns="http://schemas.microsoft.com/win/2004/08/events">
///   <data name="QueryName" inType="win:UnicodeString" outType="xs:string"/>
/// </template>
/// ```
pub fn render_template(template: &TemplateDefinition) -> Result<String, ProviderMetadataError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Start(
            BytesStart::new("template").with_attributes([("xmlns", EVENTS_NAMESPACE)]),
        ))
        .map_err(template_error)?;

    for (index, item) in template.items.iter().enumerate() {
        let name = item
            .name
            .clone()
            .unwrap_or_else(|| format!("param{}", index + 1));
        let in_type = in_type_name(item.input_type);
        let out_type = out_type_name(item.output_type);

        writer
            .write_event(Event::Empty(BytesStart::new("data").with_attributes([
                ("name", name.as_str()),
                ("inType", &*in_type),
                ("outType", &*out_type),
            ])))
            .map_err(template_error)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("template")))
        .map_err(template_error)?;

    String::from_utf8(writer.into_inner().into_inner()).map_err(template_error)
}

fn template_error(e: impl std::fmt::Display) -> ProviderMetadataError {
    ProviderMetadataError::Template {
        message: e.to_string(),
    }
}

fn in_type_name(value: u8) -> std::borrow::Cow<'static, str> {
    let name = match value {
        0x01 => "win:UnicodeString",
        0x02 => "win:AnsiString",
        0x03 => "win:Int8",
        0x04 => "win:UInt8",
        0x05 => "win:Int16",
        0x06 => "win:UInt16",
        0x07 => "win:Int32",
        0x08 => "win:UInt32",
        0x09 => "win:Int64",
        0x0a => "win:UInt64",
        0x0b => "win:Float",
        0x0c => "win:Double",
        0x0d => "win:Boolean",
        0x0e => "win:Binary",
        0x0f => "win:GUID",
        0x10 => "win:Pointer",
        0x11 => "win:FILETIME",
        0x12 => "win:SYSTEMTIME",
        0x13 => "win:SID",
        0x14 => "win:HexInt32",
        0x15 => "win:HexInt64",
        other => return format!("0x{other:02x}").into(),
    };
    name.into()
}

fn out_type_name(value: u8) -> std::borrow::Cow<'static, str> {
    let name = match value {
        0x00 | 0x01 => "xs:string",
        0x02 => "xs:dateTime",
        0x03 => "xs:byte",
        0x04 => "xs:unsignedByte",
        0x05 => "xs:short",
        0x06 => "xs:unsignedShort",
        0x07 => "xs:int",
        0x08 => "xs:unsignedInt",
        0x09 => "xs:long",
        0x0a => "xs:unsignedLong",
        0x0b => "xs:float",
        0x0c => "xs:double",
        0x0d => "xs:boolean",
        0x0e => "xs:GUID",
        0x0f => "xs:hexBinary",
        0x10 => "win:HexInt8",
        0x11 => "win:HexInt16",
        0x12 => "win:HexInt32",
        0x13 => "win:HexInt64",
        0x14 => "win:PID",
        0x15 => "win:TID",
        0x16 => "win:Port",
        0x17 => "win:IPv4",
        0x18 => "win:IPv6",
        0x19 => "win:SocketAddress",
        0x1a => "win:CIMDateTime",
        0x1b => "win:ETWTIME",
        0x1c => "win:Xml",
        0x1d => "win:ErrorCode",
        0x1e => "win:Win32Error",
        0x1f => "win:NTSTATUS",
        0x20 => "win:HResult",
        other => return format!("0x{other:02x}").into(),
    };
    name.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider_metadata::manifest::TemplateItem;
    use crate::provider_metadata::registry::RegistrySnapshot;
    use winstructs::guid::Guid;

    #[test]
    fn renders_field_template() {
        let template = TemplateDefinition {
            offset: 0,
            guid: Guid::from_buffer(&[0u8; 16]).unwrap(),
            items: vec![
                TemplateItem {
                    input_type: 0x01,
                    output_type: 0x01,
                    name: Some("QueryName".to_string()),
                },
                TemplateItem {
                    input_type: 0x08,
                    output_type: 0x00,
                    name: None,
                },
            ],
        };

        let xml = render_template(&template).unwrap();
        assert!(xml.starts_with(&format!(r#"<template xmlns="{EVENTS_NAMESPACE}">"#)));
        assert!(xml.contains(r#"<data name="QueryName" inType="win:UnicodeString" outType="xs:string"/>"#));
        assert!(xml.contains(r#"<data name="param2" inType="win:UInt32" outType="xs:string"/>"#));
        assert!(xml.ends_with("</template>"));
    }

    #[test]
    fn unregistered_provider_is_empty_not_an_error() {
        let registry = RegistrySnapshot {
            system_root: r"C:\Windows".to_string(),
            legacy: Default::default(),
            publishers: vec![],
            module_root: None,
        };
        let parser = ModernProviderMetadataParser::default();
        assert!(parser.load(&registry, "Nobody", None, "t").is_empty());
    }
}
