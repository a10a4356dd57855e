use encoding::EncodingRef;
use encoding::all::WINDOWS_1252;
use jiff::tz::TimeZone;
use std::fmt;

use crate::utils::DEFAULT_TIME_FORMAT;

/// Number of buffered records re-resolved per emitted chunk after a priority change.
pub const DEFAULT_RERESOLUTION_CHUNK_SIZE: usize = 1000;

/// Name of the message table resource looked up in legacy message files.
pub const DEFAULT_MESSAGE_TABLE_RESOURCE_ID: u32 = 1;

#[derive(Clone)]
pub struct ExtractorSettings {
    /// Code page used for message-table entries with flags 0.
    ansi_codec: EncodingRef,
    message_table_resource_id: u32,
    modern_providers: bool,
}

impl fmt::Debug for ExtractorSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractorSettings")
            .field("ansi_codec", &self.ansi_codec.name())
            .field("message_table_resource_id", &self.message_table_resource_id)
            .field("modern_providers", &self.modern_providers)
            .finish()
    }
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        ExtractorSettings {
            ansi_codec: WINDOWS_1252,
            message_table_resource_id: DEFAULT_MESSAGE_TABLE_RESOURCE_ID,
            modern_providers: true,
        }
    }
}

impl ExtractorSettings {
    pub fn new() -> Self {
        ExtractorSettings::default()
    }

    /// Sets the code page used to decode ANSI message-table entries.
    ///
    /// Legacy providers compiled their strings against the build machine's code page, so this
    /// should match the locale of the machine the metadata was captured from.
    pub fn ansi_codec(mut self, ansi_codec: EncodingRef) -> Self {
        self.ansi_codec = ansi_codec;
        self
    }

    pub fn message_table_resource_id(mut self, id: u32) -> Self {
        self.message_table_resource_id = id;
        self
    }

    /// When disabled, only legacy message tables are read.
    pub fn modern_providers(mut self, enabled: bool) -> Self {
        self.modern_providers = enabled;
        self
    }

    pub fn get_ansi_codec(&self) -> EncodingRef {
        self.ansi_codec
    }

    pub fn get_message_table_resource_id(&self) -> u32 {
        self.message_table_resource_id
    }

    pub fn should_read_modern_providers(&self) -> bool {
        self.modern_providers
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    time_zone: TimeZone,
    time_format: String,
    reresolution_chunk_size: usize,
    source_is_oldest_first: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            time_zone: TimeZone::UTC,
            time_format: DEFAULT_TIME_FORMAT.to_string(),
            reresolution_chunk_size: DEFAULT_RERESOLUTION_CHUNK_SIZE,
            source_is_oldest_first: false,
        }
    }
}

impl PipelineSettings {
    pub fn new() -> Self {
        PipelineSettings::default()
    }

    /// Display time zone applied to `timeCreated`.
    pub fn time_zone(mut self, time_zone: TimeZone) -> Self {
        self.time_zone = time_zone;
        self
    }

    /// `strftime`-style format used for the display time.
    pub fn time_format(mut self, format: impl Into<String>) -> Self {
        self.time_format = format.into();
        self
    }

    /// Sets the re-resolution chunk size. Values below 1 are clamped to 1.
    pub fn reresolution_chunk_size(mut self, size: usize) -> Self {
        self.reresolution_chunk_size = size.max(1);
        self
    }

    /// Treat the source as oldest-first even when its reader does not report it.
    pub fn source_is_oldest_first(mut self, oldest_first: bool) -> Self {
        self.source_is_oldest_first = oldest_first;
        self
    }

    pub fn get_time_zone(&self) -> &TimeZone {
        &self.time_zone
    }

    pub fn get_time_format(&self) -> &str {
        &self.time_format
    }

    pub fn get_reresolution_chunk_size(&self) -> usize {
        self.reresolution_chunk_size
    }

    pub fn is_source_oldest_first(&self) -> bool {
        self.source_is_oldest_first
    }
}
