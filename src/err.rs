use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while locating a resource inside a PE module.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("input is not a valid PE file: {message}")]
    InvalidPe { message: &'static str },

    #[error("malformed PE file: {message}")]
    MalformedPe { message: &'static str },

    #[error("failed to map RVA 0x{rva:08x} to a file offset")]
    UnmappedRva { rva: u32 },

    #[error("resource directory is malformed: {message}")]
    MalformedResource { message: &'static str },

    #[error("failed to decode UTF-16 resource name")]
    InvalidResourceName,
}

#[derive(Debug, Error)]
pub enum MessageTableError {
    #[error("message table truncated while reading {what} at offset {offset}")]
    Truncated { what: &'static str, offset: u64 },

    #[error("message table block {block} has inverted id range [{low_id}, {high_id}]")]
    InvalidBlockRange {
        block: u32,
        low_id: u32,
        high_id: u32,
    },

    #[error("message table entry {id} at offset {offset} has invalid length {length}")]
    InvalidEntryLength { id: u32, offset: u64, length: u16 },

    /// Flags other than 0 (ANSI) and 1 (UTF-16) are not mapped to any encoding.
    #[error("message table entry {id} uses unsupported encoding flags 0x{flags:04x}")]
    UnsupportedEncoding { id: u32, flags: u16 },

    #[error("failed to decode message table entry {id}: {message}")]
    InvalidText { id: u32, message: String },

    #[error("module does not contain a message table resource")]
    MissingResource,

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error("failed to read module `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("invalid signature at offset {offset}: expected {expected:?}, got {found:?}")]
    InvalidSignature {
        offset: u32,
        expected: [u8; 4],
        found: [u8; 4],
    },

    #[error("buffer too small for {what} at offset {offset} (need {need} bytes, have {have})")]
    Truncated {
        what: &'static str,
        offset: u32,
        need: usize,
        have: usize,
    },

    #[error("offset {offset} out of bounds for {what} (len {len})")]
    OffsetOutOfBounds {
        what: &'static str,
        offset: u32,
        len: usize,
    },

    #[error("size {size} out of bounds for {what} at offset {offset}")]
    SizeOutOfBounds {
        what: &'static str,
        offset: u32,
        size: u32,
    },

    #[error("invalid count {count} for {what} at offset {offset}")]
    CountOutOfBounds {
        what: &'static str,
        offset: u32,
        count: u32,
    },

    #[error("invalid utf-16 string for {what} at offset {offset}")]
    InvalidUtf16String { what: &'static str, offset: u32 },

    #[error("invalid GUID for {what} at offset {offset}")]
    InvalidGuid { what: &'static str, offset: u32 },
}

/// Failures while reading one provider's modern metadata. These never leave the extractor.
#[derive(Debug, Error)]
pub enum ProviderMetadataError {
    #[error("failed to read resource file `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("resource file `{path}` has no WEVT_TEMPLATE resource")]
    MissingManifest { path: PathBuf },

    #[error("manifest in `{path}` does not describe provider {guid}")]
    ProviderNotInManifest { path: PathBuf, guid: String },

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error("failed to decode CRIM manifest: {0}")]
    Manifest(#[from] ManifestError),

    #[error("failed to render event template: {message}")]
    Template { message: String },
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read registry snapshot `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("registry snapshot `{path}` is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("tag `{tag}` already exists")]
    TagAlreadyExists { tag: String },

    #[error("tag `{tag}` does not exist")]
    UnknownTag { tag: String },

    #[error("tag name must not be empty")]
    EmptyTag,

    #[error("record batch mixes tags `{first}` and `{other}`")]
    MixedTags { first: String, other: String },

    #[error("I/O error while {action} `{path}`: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid record at {path}:{line}: {source}")]
    InvalidRecord {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordValidationError {
    #[error("record {record_id} has an empty provider name")]
    EmptyProviderName { record_id: u64 },

    #[error("record {record_id} has level {level}, which is not a valid event level")]
    InvalidLevel { record_id: u64, level: u32 },
}

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("I/O error while reading records from `{source_name}`: {source}")]
    Io {
        source_name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record at {source_name}:{line}: {source}")]
    Malformed {
        source_name: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid record at {source_name}:{line}: {source}")]
    Invalid {
        source_name: String,
        line: usize,
        #[source]
        source: RecordValidationError,
    },

    #[error("reader failed: {message}")]
    Other { message: String },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("reader failed after {emitted} records were emitted: {source}")]
    Reader {
        emitted: usize,
        #[source]
        source: ReaderError,
    },

    #[error("template store lookup failed: {0}")]
    Store(#[from] StoreError),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
