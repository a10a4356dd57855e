//! PE resource lookup (via `goblin`).
//!
//! Provider strings live in resources of the provider's modules: `RT_MESSAGETABLE` for message
//! tables and the named `WEVT_TEMPLATE` type for instrumentation manifests. Both are reached through
//! the same three-level resource tree:
//!
//! ```text
//! root / <type> / <name> / <language> -> data
//! ```
//!
//! Only the PE header and section table are parsed; the resource directory itself is walked here so
//! that minimal or slightly non-conforming modules still yield their resources.

use crate::err::ResourceError;
use crate::utils::bytes;

use goblin::pe::header;
use goblin::pe::options::ParseOptions;
use goblin::pe::resource::{ImageResourceDirectory, ResourceEntry};
use goblin::pe::section_table::SectionTable;

const IMAGE_RESOURCE_DIRECTORY_HEADER_SIZE: usize = 16;
const RESOURCE_DATA_ENTRY_SIZE: usize = 16;

/// Resource type id of message tables.
pub const RT_MESSAGETABLE: u32 = 11;
/// Resource type name of instrumentation manifests.
pub const WEVT_TEMPLATE: &str = "WEVT_TEMPLATE";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceIdentifier {
    Id(u32),
    Name(String),
}

impl ResourceIdentifier {
    fn matches(&self, other: &ResourceIdentifier) -> bool {
        match (self, other) {
            (ResourceIdentifier::Id(a), ResourceIdentifier::Id(b)) => a == b,
            (ResourceIdentifier::Name(a), ResourceIdentifier::Name(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceData {
    pub name: ResourceIdentifier,
    pub lang_id: u32,
    pub data: Vec<u8>,
}

struct ResourceView<'a> {
    pe_bytes: &'a [u8],
    rsrc: &'a [u8],
    sections: Vec<SectionTable>,
    file_alignment: u32,
    opts: ParseOptions,
}

impl<'a> ResourceView<'a> {
    /// Returns `Ok(None)` when the module has no resource section at all.
    fn parse(pe_bytes: &'a [u8]) -> Result<Option<Self>, ResourceError> {
        let header = header::Header::parse(pe_bytes).map_err(|_| ResourceError::InvalidPe {
            message: "failed to parse PE via goblin",
        })?;

        let Some(optional_header) = header.optional_header else {
            return Err(ResourceError::InvalidPe {
                message: "missing optional header",
            });
        };

        let Some(resource_table) = optional_header.data_directories.get_resource_table() else {
            return Ok(None);
        };
        if resource_table.virtual_address == 0 || resource_table.size == 0 {
            return Ok(None);
        }

        let file_alignment = optional_header.windows_fields.file_alignment;
        let opts = ParseOptions::default();

        let optional_header_offset = header.dos_header.pe_pointer as usize
            + header::SIZEOF_PE_MAGIC
            + header::SIZEOF_COFF_HEADER;
        let mut sections_offset =
            optional_header_offset + header.coff_header.size_of_optional_header as usize;
        let sections = header
            .coff_header
            .sections(pe_bytes, &mut sections_offset)
            .map_err(|_| ResourceError::MalformedPe {
                message: "failed to parse section headers",
            })?;

        let rsrc_offset = goblin::pe::utils::find_offset(
            resource_table.virtual_address as usize,
            &sections,
            file_alignment,
            &opts,
        )
        .ok_or(ResourceError::UnmappedRva {
            rva: resource_table.virtual_address,
        })?;

        let rsrc = bytes::slice(pe_bytes, rsrc_offset, resource_table.size as usize).ok_or(
            ResourceError::MalformedPe {
                message: "resource directory out of bounds",
            },
        )?;

        Ok(Some(ResourceView {
            pe_bytes,
            rsrc,
            sections,
            file_alignment,
            opts,
        }))
    }

    fn entries(&self, dir_offset: usize) -> Result<Vec<ResourceEntry>, ResourceError> {
        let dir = parse_image_resource_directory(self.rsrc, dir_offset)?;
        let entries_offset = dir_offset
            .checked_add(IMAGE_RESOURCE_DIRECTORY_HEADER_SIZE)
            .ok_or(ResourceError::MalformedResource {
                message: "resource directory entries offset overflow",
            })?;

        let it = dir.next_iter(entries_offset, self.rsrc).map_err(|_| {
            ResourceError::MalformedResource {
                message: "resource directory entries out of bounds",
            }
        })?;

        it.collect::<Result<Vec<_>, _>>()
            .map_err(|_| ResourceError::MalformedResource {
                message: "failed to parse resource directory entries",
            })
    }

    fn identifier(&self, entry: &ResourceEntry) -> Result<ResourceIdentifier, ResourceError> {
        if entry.name_is_string() {
            Ok(ResourceIdentifier::Name(parse_resource_name(
                self.rsrc,
                entry.name_offset() as usize,
            )?))
        } else {
            Ok(ResourceIdentifier::Id(entry.name_offset()))
        }
    }

    fn data(&self, data_entry_offset: usize) -> Result<Vec<u8>, ResourceError> {
        let entry = bytes::slice(self.rsrc, data_entry_offset, RESOURCE_DATA_ENTRY_SIZE).ok_or(
            ResourceError::MalformedResource {
                message: "resource data entry out of bounds",
            },
        )?;
        let data_rva = bytes::read_u32_le(entry, 0).ok_or(ResourceError::MalformedResource {
            message: "resource data entry RVA out of bounds",
        })?;
        let data_size = bytes::read_u32_le(entry, 4).ok_or(ResourceError::MalformedResource {
            message: "resource data entry size out of bounds",
        })? as usize;

        let data_offset = goblin::pe::utils::find_offset(
            data_rva as usize,
            &self.sections,
            self.file_alignment,
            &self.opts,
        )
        .ok_or(ResourceError::UnmappedRva { rva: data_rva })?;

        Ok(bytes::slice(self.pe_bytes, data_offset, data_size)
            .ok_or(ResourceError::MalformedPe {
                message: "resource data out of bounds",
            })?
            .to_vec())
    }
}

fn parse_image_resource_directory(
    rsrc: &[u8],
    offset: usize,
) -> Result<ImageResourceDirectory, ResourceError> {
    let header = bytes::slice(rsrc, offset, IMAGE_RESOURCE_DIRECTORY_HEADER_SIZE).ok_or(
        ResourceError::MalformedResource {
            message: "resource directory header out of bounds",
        },
    )?;

    // The header slice is exactly 16 bytes, so the fixed reads below cannot fail.
    Ok(ImageResourceDirectory {
        characteristics: bytes::read_u32_le(header, 0).unwrap_or_default(),
        time_date_stamp: bytes::read_u32_le(header, 4).unwrap_or_default(),
        major_version: bytes::read_u16_le(header, 8).unwrap_or_default(),
        minor_version: bytes::read_u16_le(header, 10).unwrap_or_default(),
        number_of_named_entries: bytes::read_u16_le(header, 12).unwrap_or_default(),
        number_of_id_entries: bytes::read_u16_le(header, 14).unwrap_or_default(),
    })
}

fn parse_resource_name(rsrc: &[u8], offset: usize) -> Result<String, ResourceError> {
    let char_count = bytes::read_u16_le(rsrc, offset).ok_or(ResourceError::MalformedResource {
        message: "resource name length out of bounds",
    })? as usize;

    let buf = bytes::slice(rsrc, offset + 2, char_count * 2).ok_or(
        ResourceError::MalformedResource {
            message: "resource name out of bounds",
        },
    )?;

    let units: Vec<u16> = buf
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();

    String::from_utf16(&units).map_err(|_| ResourceError::InvalidResourceName)
}

/// Extract every resource of `resource_type` from a PE module.
///
/// Returns an empty vector if the module has no resources or none of that type.
pub fn extract_resources(
    pe_bytes: &[u8],
    resource_type: &ResourceIdentifier,
) -> Result<Vec<ResourceData>, ResourceError> {
    let Some(view) = ResourceView::parse(pe_bytes)? else {
        return Ok(Vec::new());
    };

    let mut type_entry = None;
    for entry in view.entries(0)? {
        if view.identifier(&entry)?.matches(resource_type) {
            type_entry = Some(entry);
            break;
        }
    }

    let Some(type_entry) = type_entry else {
        return Ok(Vec::new());
    };
    if !type_entry.data_is_directory() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();

    for name_entry in view.entries(type_entry.offset_to_directory() as usize)? {
        if !name_entry.data_is_directory() {
            continue;
        }
        let name = view.identifier(&name_entry)?;

        for lang_entry in view.entries(name_entry.offset_to_directory() as usize)? {
            if lang_entry.name_is_string() {
                continue;
            }
            let Some(data_entry_offset) = lang_entry.offset_to_data() else {
                continue;
            };

            let data = view.data(data_entry_offset as usize)?;
            if data.is_empty() {
                continue;
            }

            out.push(ResourceData {
                name: name.clone(),
                lang_id: lang_entry.name_offset(),
                data,
            });
        }
    }

    Ok(out)
}

/// First language of the resource `resource_type / name`, if present.
pub fn find_resource(
    pe_bytes: &[u8],
    resource_type: &ResourceIdentifier,
    name: &ResourceIdentifier,
) -> Result<Option<Vec<u8>>, ResourceError> {
    Ok(extract_resources(pe_bytes, resource_type)?
        .into_iter()
        .find(|r| r.name.matches(name))
        .map(|r| r.data))
}
