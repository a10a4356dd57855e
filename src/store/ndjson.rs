//! Newline-delimited JSON, used both for the store's own tables and for export files.
//!
//! Export lines carry their record kind so one file can hold a whole bundle:
//!
//! ```text
//! {"kind":"message","providerName":"APPLICATION ERROR","rawId":1000,"shortId":1000,...}
//! {"kind":"keyword","providerName":"MICROSOFT-WINDOWS-DNS-CLIENT","value":32768,...}
//! ```

use crate::err::{StoreError, StoreResult};
use crate::model::{MessageTemplate, MetadataBundle, ProviderEvent, Tagged, ValueName};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExportLine {
    Message(MessageTemplate),
    Event(ProviderEvent),
    Keyword(ValueName),
    Opcode(ValueName),
    Task(ValueName),
}

impl ExportLine {
    pub fn tag(&self) -> &str {
        match self {
            ExportLine::Message(m) => m.tag(),
            ExportLine::Event(e) => e.tag(),
            ExportLine::Keyword(v) | ExportLine::Opcode(v) | ExportLine::Task(v) => v.tag(),
        }
    }

    fn push_into(self, bundle: &mut MetadataBundle) {
        match self {
            ExportLine::Message(m) => bundle.messages.push(m),
            ExportLine::Event(e) => bundle.events.push(e),
            ExportLine::Keyword(v) => bundle.keywords.push(v),
            ExportLine::Opcode(v) => bundle.opcodes.push(v),
            ExportLine::Task(v) => bundle.tasks.push(v),
        }
    }
}

/// Bundles of an export file, one per tag, in the order their tags first appear.
pub type TaggedBundles = Vec<(String, MetadataBundle)>;

/// Write every record of `bundle` as one kind-tagged line. Returns the number of lines written.
pub fn write_bundle<W: Write>(writer: W, bundle: &MetadataBundle) -> StoreResult<usize> {
    let mut writer = BufWriter::new(writer);
    let mut written = 0;

    let lines = bundle
        .messages
        .iter()
        .cloned()
        .map(ExportLine::Message)
        .chain(bundle.events.iter().cloned().map(ExportLine::Event))
        .chain(bundle.keywords.iter().cloned().map(ExportLine::Keyword))
        .chain(bundle.opcodes.iter().cloned().map(ExportLine::Opcode))
        .chain(bundle.tasks.iter().cloned().map(ExportLine::Task));

    for line in lines {
        serde_json::to_writer(&mut writer, &line).map_err(|source| StoreError::Serialize {
            what: "export line",
            source,
        })?;
        writer.write_all(b"\n").map_err(export_io)?;
        written += 1;
    }

    writer.flush().map_err(export_io)?;
    Ok(written)
}

fn export_io(source: std::io::Error) -> StoreError {
    StoreError::Io {
        action: "writing export",
        path: Default::default(),
        source,
    }
}

/// Read an export file, grouping records by tag.
pub fn read_export<R: BufRead>(reader: R, path: &Path) -> StoreResult<TaggedBundles> {
    let mut out: TaggedBundles = Vec::new();

    for_each_line(reader, path, |line: ExportLine| {
        let position = match out.iter().position(|(tag, _)| tag == line.tag()) {
            Some(position) => position,
            None => {
                out.push((line.tag().to_string(), MetadataBundle::default()));
                out.len() - 1
            }
        };
        line.push_into(&mut out[position].1);
    })?;

    Ok(out)
}

fn for_each_line<T: DeserializeOwned, R: BufRead>(
    reader: R,
    path: &Path,
    mut f: impl FnMut(T),
) -> StoreResult<()> {
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| StoreError::Io {
            action: "reading",
            path: path.to_path_buf(),
            source,
        })?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value = serde_json::from_str(line).map_err(|source| StoreError::InvalidRecord {
            path: path.to_path_buf(),
            line: line_no + 1,
            source,
        })?;
        f(value);
    }
    Ok(())
}

/// Load one store table. A missing file is an empty table.
pub(crate) fn read_table<T: DeserializeOwned>(path: &Path) -> StoreResult<Vec<T>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Io {
                action: "opening",
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut out = Vec::new();
    for_each_line(BufReader::new(file), path, |record| out.push(record))?;
    Ok(out)
}

pub(crate) fn append_table<T: Serialize>(path: &Path, records: &[T]) -> StoreResult<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| StoreError::Io {
            action: "opening",
            path: path.to_path_buf(),
            source,
        })?;
    write_records(file, path, records)
}

/// Replace a table's contents, going through a sibling temporary file.
pub(crate) fn rewrite_table<T: Serialize>(path: &Path, records: &[T]) -> StoreResult<()> {
    let tmp = path.with_extension("ndjson.tmp");
    let file = File::create(&tmp).map_err(|source| StoreError::Io {
        action: "creating",
        path: tmp.clone(),
        source,
    })?;
    write_records(file, &tmp, records)?;
    std::fs::rename(&tmp, path).map_err(|source| StoreError::Io {
        action: "replacing",
        path: path.to_path_buf(),
        source,
    })
}

fn write_records<T: Serialize>(file: File, path: &Path, records: &[T]) -> StoreResult<()> {
    let io_err = |source| StoreError::Io {
        action: "writing",
        path: path.to_path_buf(),
        source,
    };

    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record).map_err(|source| StoreError::Serialize {
            what: "store record",
            source,
        })?;
        writer.write_all(b"\n").map_err(io_err)?;
    }
    writer.flush().map_err(io_err)
}
