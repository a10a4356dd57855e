//! Decoder for the `CRIM` instrumentation manifest stored in `WEVT_TEMPLATE` resources.
//!
//! Only the elements needed to describe events are decoded: channels, events, keywords, opcodes,
//! tasks and the template table (item names and types). Levels are fixed by the enrichment
//! pipeline and maps are never displayed, so those elements are skipped like any unknown element.
//!
//! Layout summary (all offsets are relative to the start of the CRIM blob):
//!
//! ```text
//! CRIM  sig, size, major, minor, provider_count, { guid, offset }[provider_count]
//! WEVT  sig, size, message_id, descriptor_count, unknown2_count, { offset, unknown }[..]
//! CHAN  sig, size, count, { identifier, name_offset, unknown, message_id }[count]
//! EVNT  sig, size, count, unknown, { 48-byte event definition }[count]
//! KEYW  sig, size, count, { mask:u64, message_id, name_offset }[count]
//! OPCO  sig, size, count, { identifier, message_id, name_offset }[count]
//! TASK  sig, size, count, { identifier, message_id, mui_guid, name_offset }[count]
//! TTBL  sig, size, count, TEMP[count]
//! ```

use crate::err::ManifestError;
use crate::utils::{self, bytes};

use winstructs::guid::Guid;

type Result<T> = std::result::Result<T, ManifestError>;

const NO_MESSAGE: u32 = 0xffff_ffff;
const TEMP_HEADER_SIZE: usize = 40;
const TEMPLATE_ITEM_SIZE: usize = 20;

#[derive(Debug, Clone, Default)]
pub struct CrimManifest {
    pub major_version: u16,
    pub minor_version: u16,
    pub providers: Vec<ManifestProvider>,
}

#[derive(Debug, Clone)]
pub struct ManifestProvider {
    pub guid: Guid,
    pub message_id: Option<u32>,
    pub channels: Vec<ChannelDefinition>,
    pub events: Vec<EventDefinition>,
    pub keywords: Vec<ValueDefinition>,
    pub opcodes: Vec<ValueDefinition>,
    pub tasks: Vec<ValueDefinition>,
    pub templates: Vec<TemplateDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDefinition {
    pub identifier: u32,
    pub name: Option<String>,
    pub message_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDefinition {
    pub identifier: u16,
    pub version: u8,
    pub channel: u8,
    pub level: u8,
    pub opcode: u8,
    pub task: u16,
    pub keywords: u64,
    pub message_id: Option<u32>,
    pub template_offset: Option<u32>,
}

/// A keyword, opcode or task definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueDefinition {
    pub identifier: u64,
    pub message_id: Option<u32>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateDefinition {
    pub offset: u32,
    pub guid: Guid,
    pub items: Vec<TemplateItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateItem {
    pub input_type: u8,
    pub output_type: u8,
    pub name: Option<String>,
}

impl ManifestProvider {
    pub fn channel(&self, identifier: u8) -> Option<&ChannelDefinition> {
        self.channels
            .iter()
            .find(|c| c.identifier == u32::from(identifier))
    }

    pub fn template_by_offset(&self, offset: u32) -> Option<&TemplateDefinition> {
        self.templates.iter().find(|t| t.offset == offset)
    }
}

impl CrimManifest {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let sig = read_sig(data, 0, "CRIM signature")?;
        if sig != *b"CRIM" {
            return Err(ManifestError::InvalidSignature {
                offset: 0,
                expected: *b"CRIM",
                found: sig,
            });
        }

        let size = read_u32(data, 4, "CRIM.size")?;
        let major_version = read_u16(data, 8, "CRIM.major_version")?;
        let minor_version = read_u16(data, 10, "CRIM.minor_version")?;
        let provider_count = read_u32(data, 12, "CRIM.provider_count")?;

        if size < 16 || size as usize > data.len() {
            return Err(ManifestError::SizeOutOfBounds {
                what: "CRIM.size",
                offset: 0,
                size,
            });
        }
        let data = &data[..size as usize];

        let descriptors = array_bytes(provider_count, 20, "CRIM.provider_count", 12)?;
        require_len(data, 16, descriptors, "CRIM provider descriptor array")?;

        let mut providers = Vec::with_capacity(provider_count as usize);
        for i in 0..provider_count as usize {
            let desc_off = 16 + i * 20;
            let guid = read_guid(data, desc_off, "CRIM.provider.guid")?;
            let provider_off = read_u32(data, desc_off + 16, "CRIM.provider.offset")?;
            providers.push(parse_provider(data, guid, provider_off)?);
        }

        Ok(CrimManifest {
            major_version,
            minor_version,
            providers,
        })
    }

    pub fn provider(&self, guid: &Guid) -> Option<&ManifestProvider> {
        self.providers.iter().find(|p| &p.guid == guid)
    }
}

fn parse_provider(crim: &[u8], guid: Guid, provider_off: u32) -> Result<ManifestProvider> {
    let off = to_offset(provider_off, "WEVT provider offset", crim.len())?;
    require_len(crim, off, 20, "WEVT header")?;

    let sig = read_sig(crim, off, "WEVT signature")?;
    if sig != *b"WEVT" {
        return Err(ManifestError::InvalidSignature {
            offset: provider_off,
            expected: *b"WEVT",
            found: sig,
        });
    }

    let message_id = optional_message(read_u32(crim, off + 8, "WEVT.message_identifier")?);
    let descriptor_count = read_u32(crim, off + 12, "WEVT.number_of_descriptors")?;
    let desc_bytes = array_bytes(
        descriptor_count,
        8,
        "WEVT.number_of_descriptors",
        provider_off + 12,
    )?;
    require_len(crim, off + 20, desc_bytes, "WEVT descriptor array")?;

    let mut provider = ManifestProvider {
        guid,
        message_id,
        channels: Vec::new(),
        events: Vec::new(),
        keywords: Vec::new(),
        opcodes: Vec::new(),
        tasks: Vec::new(),
        templates: Vec::new(),
    };

    for i in 0..descriptor_count as usize {
        let element_offset = read_u32(crim, off + 20 + i * 8, "WEVT.descriptor.element_offset")?;
        let element_off = to_offset(element_offset, "WEVT element offset", crim.len())?;
        let signature = read_sig(crim, element_off, "WEVT element signature")?;

        match &signature {
            b"CHAN" => provider.channels = parse_channels(crim, element_offset)?,
            b"EVNT" => provider.events = parse_events(crim, element_offset)?,
            b"KEYW" => provider.keywords = parse_keywords(crim, element_offset)?,
            b"OPCO" => provider.opcodes = parse_values(crim, element_offset, *b"OPCO", 12, 8)?,
            b"TASK" => provider.tasks = parse_values(crim, element_offset, *b"TASK", 28, 24)?,
            b"TTBL" => provider.templates = parse_templates(crim, element_offset)?,
            _ => {
                log::trace!(
                    "skipping manifest element {:?} at offset {}",
                    String::from_utf8_lossy(&signature),
                    element_offset
                );
            }
        }
    }

    Ok(provider)
}

/// Locate the definition array of a `sig, size, count, ...` element.
///
/// Returns the offset of the first definition and the definition count. A `size` of zero is
/// accepted; the array is then bounded by `count` alone.
fn definition_array(
    crim: &[u8],
    element_offset: u32,
    sig: [u8; 4],
    header_len: usize,
    def_size: usize,
) -> Result<(usize, usize)> {
    let what = element_name(&sig);
    let off = to_offset(element_offset, what, crim.len())?;
    require_len(crim, off, header_len, what)?;

    let found = read_sig(crim, off, what)?;
    if found != sig {
        return Err(ManifestError::InvalidSignature {
            offset: element_offset,
            expected: sig,
            found,
        });
    }

    let size = read_u32(crim, off + 4, what)?;
    let count = read_u32(crim, off + 8, what)?;
    let defs_off = off + header_len;
    let defs_bytes = array_bytes(count, def_size, what, element_offset + 8)?;

    if size != 0 {
        if (size as usize) < header_len {
            return Err(ManifestError::SizeOutOfBounds {
                what,
                offset: element_offset,
                size,
            });
        }
        let end = off
            .checked_add(size as usize)
            .filter(|end| *end <= crim.len())
            .ok_or(ManifestError::SizeOutOfBounds {
                what,
                offset: element_offset,
                size,
            })?;
        if defs_off + defs_bytes > end {
            return Err(ManifestError::SizeOutOfBounds {
                what,
                offset: element_offset,
                size,
            });
        }
    }
    require_len(crim, defs_off, defs_bytes, what)?;

    Ok((defs_off, count as usize))
}

fn parse_channels(crim: &[u8], element_offset: u32) -> Result<Vec<ChannelDefinition>> {
    let (defs_off, count) = definition_array(crim, element_offset, *b"CHAN", 12, 16)?;

    (0..count)
        .map(|i| {
            let d = defs_off + i * 16;
            let name_offset = read_u32(crim, d + 4, "CHAN.name_offset")?;
            Ok(ChannelDefinition {
                identifier: read_u32(crim, d, "CHAN.identifier")?,
                name: optional_string(crim, name_offset, "CHAN name")?,
                message_id: optional_message(read_u32(crim, d + 12, "CHAN.message_identifier")?),
            })
        })
        .collect()
}

fn parse_events(crim: &[u8], element_offset: u32) -> Result<Vec<EventDefinition>> {
    let (defs_off, count) = definition_array(crim, element_offset, *b"EVNT", 16, 48)?;

    (0..count)
        .map(|i| {
            let e = defs_off + i * 48;
            let template_offset = read_u32(crim, e + 20, "EVNT.event.template_offset")?;
            Ok(EventDefinition {
                identifier: read_u16(crim, e, "EVNT.event.identifier")?,
                version: read_u8(crim, e + 2, "EVNT.event.version")?,
                channel: read_u8(crim, e + 3, "EVNT.event.channel")?,
                level: read_u8(crim, e + 4, "EVNT.event.level")?,
                opcode: read_u8(crim, e + 5, "EVNT.event.opcode")?,
                task: read_u16(crim, e + 6, "EVNT.event.task")?,
                keywords: read_u64(crim, e + 8, "EVNT.event.keywords")?,
                message_id: optional_message(read_u32(
                    crim,
                    e + 16,
                    "EVNT.event.message_identifier",
                )?),
                template_offset: (template_offset != 0).then_some(template_offset),
            })
        })
        .collect()
}

fn parse_keywords(crim: &[u8], element_offset: u32) -> Result<Vec<ValueDefinition>> {
    let (defs_off, count) = definition_array(crim, element_offset, *b"KEYW", 12, 16)?;

    (0..count)
        .map(|i| {
            let d = defs_off + i * 16;
            let data_offset = read_u32(crim, d + 12, "KEYW.data_offset")?;
            Ok(ValueDefinition {
                identifier: read_u64(crim, d, "KEYW.identifier")?,
                message_id: optional_message(read_u32(crim, d + 8, "KEYW.message_identifier")?),
                name: optional_string(crim, data_offset, "KEYW data")?,
            })
        })
        .collect()
}

/// `OPCO` and `TASK` share `{ identifier:u32, message_id:u32, .., name_offset:u32 }`.
fn parse_values(
    crim: &[u8],
    element_offset: u32,
    sig: [u8; 4],
    def_size: usize,
    name_field: usize,
) -> Result<Vec<ValueDefinition>> {
    let what = element_name(&sig);
    let (defs_off, count) = definition_array(crim, element_offset, sig, 12, def_size)?;

    (0..count)
        .map(|i| {
            let d = defs_off + i * def_size;
            let data_offset = read_u32(crim, d + name_field, what)?;
            Ok(ValueDefinition {
                identifier: u64::from(read_u32(crim, d, what)?),
                message_id: optional_message(read_u32(crim, d + 4, what)?),
                name: optional_string(crim, data_offset, what)?,
            })
        })
        .collect()
}

fn parse_templates(crim: &[u8], element_offset: u32) -> Result<Vec<TemplateDefinition>> {
    let off = to_offset(element_offset, "TTBL offset", crim.len())?;
    require_len(crim, off, 12, "TTBL header")?;
    let sig = read_sig(crim, off, "TTBL signature")?;
    if sig != *b"TTBL" {
        return Err(ManifestError::InvalidSignature {
            offset: element_offset,
            expected: *b"TTBL",
            found: sig,
        });
    }

    let size = read_u32(crim, off + 4, "TTBL.size")?;
    let count = read_u32(crim, off + 8, "TTBL.count")?;
    let end = if size == 0 {
        crim.len()
    } else {
        off.checked_add(size as usize)
            .filter(|end| *end <= crim.len() && size >= 12)
            .ok_or(ManifestError::SizeOutOfBounds {
                what: "TTBL.size",
                offset: element_offset,
                size,
            })?
    };

    let mut templates = Vec::new();
    let mut cur = off + 12;

    for _ in 0..count {
        require_len(&crim[..end], cur, TEMP_HEADER_SIZE, "TEMP header")?;
        let temp_sig = read_sig(crim, cur, "TEMP signature")?;
        if temp_sig != *b"TEMP" {
            return Err(ManifestError::InvalidSignature {
                offset: cur as u32,
                expected: *b"TEMP",
                found: temp_sig,
            });
        }

        let temp_size = read_u32(crim, cur + 4, "TEMP.size")?;
        let temp_end = cur
            .checked_add(temp_size as usize)
            .filter(|e| *e <= end && temp_size as usize >= TEMP_HEADER_SIZE)
            .ok_or(ManifestError::SizeOutOfBounds {
                what: "TEMP.size",
                offset: cur as u32,
                size: temp_size,
            })?;

        let item_count = read_u32(crim, cur + 8, "TEMP.item_descriptor_count")?;
        let items_offset = read_u32(crim, cur + 16, "TEMP.template_items_offset")?;
        let guid = read_guid(crim, cur + 24, "TEMP.guid")?;

        let items = parse_template_items(crim, cur, temp_end, item_count, items_offset)?;

        templates.push(TemplateDefinition {
            offset: cur as u32,
            guid,
            items,
        });
        cur = temp_end;
    }

    Ok(templates)
}

fn parse_template_items(
    crim: &[u8],
    template_off: usize,
    template_end: usize,
    item_count: u32,
    items_offset: u32,
) -> Result<Vec<TemplateItem>> {
    if item_count == 0 {
        return Ok(Vec::new());
    }

    let items_off = items_offset as usize;
    if items_off < template_off + TEMP_HEADER_SIZE || items_off >= template_end {
        return Err(ManifestError::OffsetOutOfBounds {
            what: "TEMP.template_items_offset",
            offset: items_offset,
            len: template_end,
        });
    }

    let needed = array_bytes(
        item_count,
        TEMPLATE_ITEM_SIZE,
        "TEMP.item_descriptor_count",
        template_off as u32 + 8,
    )?;
    require_len(
        &crim[..template_end],
        items_off,
        needed,
        "template item descriptors",
    )?;

    (0..item_count as usize)
        .map(|i| {
            let d = items_off + i * TEMPLATE_ITEM_SIZE;
            let name_offset = read_u32(crim, d + 16, "TEMP.item.name_offset")?;
            let name = if name_offset == 0 {
                None
            } else if (name_offset as usize) < items_off + needed
                || name_offset as usize >= template_end
            {
                return Err(ManifestError::OffsetOutOfBounds {
                    what: "template item name_offset",
                    offset: name_offset,
                    len: template_end,
                });
            } else {
                Some(read_sized_utf16_string(
                    &crim[..template_end],
                    name_offset,
                    "template item name",
                )?)
            };

            Ok(TemplateItem {
                input_type: read_u8(crim, d + 4, "TEMP.item.input_type")?,
                output_type: read_u8(crim, d + 5, "TEMP.item.output_type")?,
                name,
            })
        })
        .collect()
}

fn element_name(sig: &[u8; 4]) -> &'static str {
    match sig {
        b"CHAN" => "CHAN",
        b"EVNT" => "EVNT",
        b"KEYW" => "KEYW",
        b"OPCO" => "OPCO",
        b"TASK" => "TASK",
        _ => "element",
    }
}

fn optional_message(raw: u32) -> Option<u32> {
    (raw != NO_MESSAGE).then_some(raw)
}

fn optional_string(crim: &[u8], offset: u32, what: &'static str) -> Result<Option<String>> {
    if offset == 0 {
        return Ok(None);
    }
    read_sized_utf16_string(crim, offset, what).map(Some)
}

/// A `u32` size (which counts itself) followed by NUL-terminated UTF-16LE text.
fn read_sized_utf16_string(buf: &[u8], offset: u32, what: &'static str) -> Result<String> {
    let off = to_offset(offset, what, buf.len())?;
    let size = read_u32(buf, off, what)?;
    if size < 4 {
        return Err(ManifestError::SizeOutOfBounds { what, offset, size });
    }
    let text = bytes::slice(buf, off + 4, size as usize - 4)
        .ok_or(ManifestError::SizeOutOfBounds { what, offset, size })?;
    utils::decode_utf16le_bytes_z(text)
        .map_err(|_| ManifestError::InvalidUtf16String { what, offset })
}

fn array_bytes(count: u32, elem: usize, what: &'static str, offset: u32) -> Result<usize> {
    (count as usize)
        .checked_mul(elem)
        .ok_or(ManifestError::CountOutOfBounds {
            what,
            offset,
            count,
        })
}

fn to_offset(offset: u32, what: &'static str, len: usize) -> Result<usize> {
    let off = offset as usize;
    if off > len {
        return Err(ManifestError::OffsetOutOfBounds { what, offset, len });
    }
    Ok(off)
}

fn require_len(buf: &[u8], off: usize, need: usize, what: &'static str) -> Result<()> {
    if off > buf.len() || buf.len() - off < need {
        return Err(truncated(buf, off, need, what));
    }
    Ok(())
}

fn truncated(buf: &[u8], off: usize, need: usize, what: &'static str) -> ManifestError {
    ManifestError::Truncated {
        what,
        offset: u32::try_from(off).unwrap_or(u32::MAX),
        need,
        have: buf.len().saturating_sub(off),
    }
}

fn read_sig(buf: &[u8], off: usize, what: &'static str) -> Result<[u8; 4]> {
    bytes::read_sig(buf, off).ok_or_else(|| truncated(buf, off, 4, what))
}

fn read_u8(buf: &[u8], off: usize, what: &'static str) -> Result<u8> {
    bytes::read_u8(buf, off).ok_or_else(|| truncated(buf, off, 1, what))
}

fn read_u16(buf: &[u8], off: usize, what: &'static str) -> Result<u16> {
    bytes::read_u16_le(buf, off).ok_or_else(|| truncated(buf, off, 2, what))
}

fn read_u32(buf: &[u8], off: usize, what: &'static str) -> Result<u32> {
    bytes::read_u32_le(buf, off).ok_or_else(|| truncated(buf, off, 4, what))
}

fn read_u64(buf: &[u8], off: usize, what: &'static str) -> Result<u64> {
    bytes::read_u64_le(buf, off).ok_or_else(|| truncated(buf, off, 8, what))
}

fn read_guid(buf: &[u8], off: usize, what: &'static str) -> Result<Guid> {
    let raw = bytes::read_array::<16>(buf, off).ok_or_else(|| truncated(buf, off, 16, what))?;
    Guid::from_buffer(&raw).map_err(|_| ManifestError::InvalidGuid {
        what,
        offset: off as u32,
    })
}
