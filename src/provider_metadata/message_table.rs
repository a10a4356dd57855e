//! Legacy message tables (`RT_MESSAGETABLE`).
//!
//! ```text
//! u32 block_count
//! { u32 low_id, u32 high_id, u32 offset_to_entries }[block_count]
//! entry: { u16 length, u16 flags, text[length - 4] }   (one per id in [low_id, high_id])
//! ```
//!
//! `flags` 0 is ANSI text in the module's code page, 1 is UTF-16LE. Entries are laid out back to
//! back; `length` includes the 4-byte entry header and any NUL padding.

use crate::err::MessageTableError;
use crate::model::MessageTemplate;
use crate::provider_metadata::resources::{self, RT_MESSAGETABLE, ResourceIdentifier};
use crate::settings::ExtractorSettings;
use crate::utils;

use byteorder::{LittleEndian, ReadBytesExt};
use encoding::EncodingRef;
use log::{debug, trace, warn};
use std::io::{Cursor, Seek, SeekFrom};
use std::path::Path;

const BLOCK_SIZE: u64 = 12;
const ENTRY_HEADER_SIZE: u16 = 4;

const FLAG_ANSI: u16 = 0;
const FLAG_UNICODE: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTableEntry {
    pub id: u32,
    pub text: String,
}

/// A decoded message table.
///
/// Entries whose encoding flags are not understood are left out of `entries` and reported in
/// `unsupported`; they never invalidate the rest of the table.
#[derive(Debug, Default)]
pub struct MessageTable {
    pub entries: Vec<MessageTableEntry>,
    pub unsupported: Vec<MessageTableError>,
}

impl MessageTable {
    pub fn get(&self, id: u32) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.text.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn truncated(what: &'static str, offset: u64) -> impl FnOnce(std::io::Error) -> MessageTableError {
    move |_| MessageTableError::Truncated { what, offset }
}

/// Decode a raw message table resource.
pub fn parse_message_table(
    blob: &[u8],
    ansi_codec: EncodingRef,
) -> Result<MessageTable, MessageTableError> {
    let mut cursor = Cursor::new(blob);
    let block_count = cursor
        .read_u32::<LittleEndian>()
        .map_err(truncated("block count", 0))?;

    trace!("message table has {} blocks", block_count);

    let mut table = MessageTable::default();

    for block in 0..block_count {
        let block_offset = 4 + u64::from(block) * BLOCK_SIZE;
        cursor.set_position(block_offset);

        let low_id = cursor
            .read_u32::<LittleEndian>()
            .map_err(truncated("block low id", block_offset))?;
        let high_id = cursor
            .read_u32::<LittleEndian>()
            .map_err(truncated("block high id", block_offset + 4))?;
        let offset_to_entries = cursor
            .read_u32::<LittleEndian>()
            .map_err(truncated("block entries offset", block_offset + 8))?;

        if low_id > high_id {
            return Err(MessageTableError::InvalidBlockRange {
                block,
                low_id,
                high_id,
            });
        }

        cursor
            .seek(SeekFrom::Start(u64::from(offset_to_entries)))
            .map_err(truncated("block entries", u64::from(offset_to_entries)))?;

        for id in low_id..=high_id {
            read_entry(&mut cursor, id, ansi_codec, &mut table)?;
        }
    }

    Ok(table)
}

fn read_entry(
    cursor: &mut Cursor<&[u8]>,
    id: u32,
    ansi_codec: EncodingRef,
    table: &mut MessageTable,
) -> Result<(), MessageTableError> {
    let entry_offset = cursor.position();
    let length = cursor
        .read_u16::<LittleEndian>()
        .map_err(truncated("entry length", entry_offset))?;
    let flags = cursor
        .read_u16::<LittleEndian>()
        .map_err(truncated("entry flags", entry_offset + 2))?;

    // A zero length would never advance the cursor.
    if length < ENTRY_HEADER_SIZE {
        return Err(MessageTableError::InvalidEntryLength {
            id,
            offset: entry_offset,
            length,
        });
    }

    let blob = *cursor.get_ref();
    let text_start = entry_offset + u64::from(ENTRY_HEADER_SIZE);
    let text_end = entry_offset + u64::from(length);
    let text_bytes = usize::try_from(text_end)
        .ok()
        .and_then(|end| blob.get(text_start as usize..end))
        .ok_or(MessageTableError::Truncated {
            what: "entry text",
            offset: text_start,
        })?;

    match flags {
        FLAG_ANSI => {
            let text = utils::decode_ansi_z(text_bytes, ansi_codec)
                .map_err(|message| MessageTableError::InvalidText { id, message })?;
            table.entries.push(MessageTableEntry { id, text });
        }
        FLAG_UNICODE => {
            let text = utils::decode_utf16le_bytes_z(text_bytes).map_err(|e| {
                MessageTableError::InvalidText {
                    id,
                    message: format!("{e:?}"),
                }
            })?;
            table.entries.push(MessageTableEntry { id, text });
        }
        _ => {
            debug!("message {} has unsupported encoding flags 0x{:04x}", id, flags);
            table
                .unsupported
                .push(MessageTableError::UnsupportedEncoding { id, flags });
        }
    }

    cursor.set_position(text_end);
    Ok(())
}

/// Reads message tables out of legacy provider modules.
#[derive(Debug, Clone, Default)]
pub struct LegacyMessageTableParser {
    settings: ExtractorSettings,
}

impl LegacyMessageTableParser {
    pub fn new(settings: ExtractorSettings) -> Self {
        LegacyMessageTableParser { settings }
    }

    /// Read and decode the message table of the module at `path`.
    pub fn read_module(&self, path: impl AsRef<Path>) -> Result<MessageTable, MessageTableError> {
        let path = path.as_ref();
        let pe_bytes = std::fs::read(path).map_err(|source| MessageTableError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let blob = resources::find_resource(
            &pe_bytes,
            &ResourceIdentifier::Id(RT_MESSAGETABLE),
            &ResourceIdentifier::Id(self.settings.get_message_table_resource_id()),
        )?
        .ok_or(MessageTableError::MissingResource)?;

        parse_message_table(&blob, self.settings.get_ansi_codec())
    }

    /// Like [`read_module`](Self::read_module), but never fails: most providers legitimately have
    /// no legacy metadata, so problems are logged and yield an empty table.
    pub fn load_module(&self, path: impl AsRef<Path>) -> MessageTable {
        let path = path.as_ref();
        match self.read_module(path) {
            Ok(table) => {
                for err in &table.unsupported {
                    warn!("`{}`: {}", path.display(), err);
                }
                table
            }
            Err(err) => {
                warn!(
                    "failed to load message table from `{}`: {}",
                    path.display(),
                    err
                );
                MessageTable::default()
            }
        }
    }

    /// Messages from every message file registered for `provider_name`, tagged with `tag`.
    pub fn messages_for_provider<P: AsRef<Path>>(
        &self,
        provider_name: &str,
        message_files: &[P],
        tag: &str,
    ) -> Vec<MessageTemplate> {
        let mut messages = Vec::new();
        for file in message_files {
            let table = self.load_module(file);
            messages.extend(
                table
                    .entries
                    .into_iter()
                    .map(|e| MessageTemplate::new(provider_name, e.id, e.text, tag)),
            );
        }

        debug!(
            "loaded {} legacy messages for provider `{}`",
            messages.len(),
            provider_name
        );
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding::all::WINDOWS_1252;
    use pretty_assertions::assert_eq;

    fn entry(flags: u16, text: &[u8]) -> Vec<u8> {
        let mut body = text.to_vec();
        body.extend_from_slice(&[0, 0]);
        while body.len() % 4 != 0 {
            body.push(0);
        }
        let mut out = ((body.len() + 4) as u16).to_le_bytes().to_vec();
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend(body);
        out
    }

    fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    fn table(blocks: &[(u32, Vec<Vec<u8>>)]) -> Vec<u8> {
        let mut out = (blocks.len() as u32).to_le_bytes().to_vec();
        let mut entries_off = 4 + blocks.len() * 12;
        let mut data = Vec::new();
        for (low, entries) in blocks {
            let high = low + entries.len() as u32 - 1;
            out.extend_from_slice(&low.to_le_bytes());
            out.extend_from_slice(&high.to_le_bytes());
            out.extend_from_slice(&(entries_off as u32).to_le_bytes());
            for e in entries {
                entries_off += e.len();
                data.extend_from_slice(e);
            }
        }
        out.extend(data);
        out
    }

    #[test]
    fn decodes_ansi_and_unicode_entries() {
        let blob = table(&[
            (1, vec![entry(0, b"caf\xe9"), entry(1, &utf16("second"))]),
            (0x4000_0010, vec![entry(1, &utf16("Service %1 started."))]),
        ]);

        let table = parse_message_table(&blob, WINDOWS_1252).unwrap();
        assert_eq!(
            table.entries,
            vec![
                MessageTableEntry {
                    id: 1,
                    text: "caf\u{e9}".to_string()
                },
                MessageTableEntry {
                    id: 2,
                    text: "second".to_string()
                },
                MessageTableEntry {
                    id: 0x4000_0010,
                    text: "Service %1 started.".to_string()
                },
            ]
        );
        assert_eq!(table.get(2), Some("second"));
        assert!(table.unsupported.is_empty());
    }

    #[test]
    fn every_id_of_every_block_is_stored_under_both_ids() {
        use crate::model::short_id;
        use crate::store::{RecordBatch, TemplateLookup, TemplateStore};

        let blocks: Vec<(u32, Vec<Vec<u8>>)> = [(1u32, 3usize), (0x0001_0100, 2), (0x4000_0200, 4)]
            .iter()
            .map(|&(low, count)| {
                let entries = (0..count)
                    .map(|i| entry(1, &utf16(&format!("message {}", low + i as u32))))
                    .collect();
                (low, entries)
            })
            .collect();
        let expected: usize = blocks.iter().map(|(_, entries)| entries.len()).sum();

        let table = parse_message_table(&table(&blocks), WINDOWS_1252).unwrap();
        assert_eq!(table.len(), expected);

        let mut store = TemplateStore::in_memory();
        store
            .bulk_insert(RecordBatch::Messages(
                table
                    .entries
                    .iter()
                    .map(|e| MessageTemplate::new("Legacy", e.id, e.text.clone(), "t"))
                    .collect(),
            ))
            .unwrap();

        for (low, entries) in &blocks {
            for raw_id in *low..*low + entries.len() as u32 {
                let text = format!("message {}", raw_id);
                let by_raw = store.messages_by_raw_id("Legacy", raw_id).unwrap();
                assert_eq!(by_raw.len(), 1);
                assert_eq!(by_raw[0].text, text);

                let by_short = store.messages_by_short_id("Legacy", short_id(raw_id)).unwrap();
                assert!(by_short.iter().any(|m| m.raw_id == raw_id && m.text == text));
            }
        }
    }

    #[test]
    fn unsupported_flags_only_skip_that_entry() {
        let blob = table(&[(
            7,
            vec![entry(1, &utf16("a")), entry(2, b"zz"), entry(1, &utf16("c"))],
        )]);

        let table = parse_message_table(&blob, WINDOWS_1252).unwrap();
        let ids: Vec<u32> = table.entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![7, 9]);
        assert!(matches!(
            table.unsupported.as_slice(),
            [MessageTableError::UnsupportedEncoding { id: 8, flags: 2 }]
        ));
    }

    #[test]
    fn structural_errors() {
        // Block points past the end of the blob.
        let mut blob = table(&[(1, vec![entry(1, &utf16("a"))])]);
        blob.truncate(18);
        assert!(matches!(
            parse_message_table(&blob, WINDOWS_1252),
            Err(MessageTableError::Truncated { .. })
        ));

        // Zero-length entry.
        let mut blob = table(&[(1, vec![entry(1, &utf16("a"))])]);
        blob[16] = 0;
        blob[17] = 0;
        assert!(matches!(
            parse_message_table(&blob, WINDOWS_1252),
            Err(MessageTableError::InvalidEntryLength { id: 1, length: 0, .. })
        ));
    }

    #[test]
    fn missing_module_yields_empty_table() {
        let parser = LegacyMessageTableParser::default();
        let table = parser.load_module("/definitely/not/here.dll");
        assert!(table.is_empty());
    }
}
