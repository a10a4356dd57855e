//! Provider metadata records as they are extracted, stored and exported.
//!
//! Every record carries the tag of the ingestion batch that produced it. Records are immutable once
//! stored; the same key defined under several tags is normal and resolved later by tag priority.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical form of a provider name. Lookups are case-insensitive because every stored name and
/// every lookup key goes through this function.
pub fn normalize_provider_name(name: &str) -> String {
    name.trim().to_uppercase()
}

/// Unsigned 16-bit truncation of a legacy message id.
pub fn short_id(raw_id: u32) -> u16 {
    (raw_id & 0xffff) as u16
}

/// A record that belongs to exactly one ingestion tag.
pub trait Tagged {
    fn tag(&self) -> &str;
}

/// A message-table string (legacy) or a description-bearing modern entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageTemplate {
    pub provider_name: String,
    pub raw_id: u32,
    pub short_id: u16,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_name: Option<String>,
    pub tag: String,
}

impl MessageTemplate {
    pub fn new(provider_name: &str, raw_id: u32, text: String, tag: &str) -> Self {
        MessageTemplate {
            provider_name: provider_name.to_string(),
            raw_id,
            short_id: short_id(raw_id),
            text,
            template: None,
            log_name: None,
            tag: tag.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEvent {
    pub provider_name: String,
    pub id: u32,
    pub version: u8,
    pub log_name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    pub tag: String,
}

/// Shared shape of the keyword, opcode and task tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueName {
    pub provider_name: String,
    pub value: u64,
    pub name: String,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionTag {
    pub name: String,
    pub rank: usize,
}

impl Tagged for MessageTemplate {
    fn tag(&self) -> &str {
        &self.tag
    }
}

impl Tagged for ProviderEvent {
    fn tag(&self) -> &str {
        &self.tag
    }
}

impl Tagged for ValueName {
    fn tag(&self) -> &str {
        &self.tag
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Keyword,
    Opcode,
    Task,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Message,
    Event,
    Keyword,
    Opcode,
    Task,
}

impl RecordKind {
    pub const ALL: [RecordKind; 5] = [
        RecordKind::Message,
        RecordKind::Event,
        RecordKind::Keyword,
        RecordKind::Opcode,
        RecordKind::Task,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Message => "message",
            RecordKind::Event => "event",
            RecordKind::Keyword => "keyword",
            RecordKind::Opcode => "opcode",
            RecordKind::Task => "task",
        }
    }
}

impl From<ValueKind> for RecordKind {
    fn from(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Keyword => RecordKind::Keyword,
            ValueKind::Opcode => RecordKind::Opcode,
            ValueKind::Task => RecordKind::Task,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything extracted for one or more providers under a single tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataBundle {
    pub messages: Vec<MessageTemplate>,
    pub events: Vec<ProviderEvent>,
    pub keywords: Vec<ValueName>,
    pub opcodes: Vec<ValueName>,
    pub tasks: Vec<ValueName>,
}

impl MetadataBundle {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.messages.len()
            + self.events.len()
            + self.keywords.len()
            + self.opcodes.len()
            + self.tasks.len()
    }

    pub fn extend(&mut self, other: MetadataBundle) {
        self.messages.extend(other.messages);
        self.events.extend(other.events);
        self.keywords.extend(other.keywords);
        self.opcodes.extend(other.opcodes);
        self.tasks.extend(other.tasks);
    }

    pub fn counts(&self) -> BundleCounts {
        BundleCounts {
            messages: self.messages.len(),
            events: self.events.len(),
            keywords: self.keywords.len(),
            opcodes: self.opcodes.len(),
            tasks: self.tasks.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BundleCounts {
    pub messages: usize,
    pub events: usize,
    pub keywords: usize,
    pub opcodes: usize,
    pub tasks: usize,
}

impl BundleCounts {
    pub fn add(&mut self, other: BundleCounts) {
        self.messages += other.messages;
        self.events += other.events;
        self.keywords += other.keywords;
        self.opcodes += other.opcodes;
        self.tasks += other.tasks;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_is_unsigned_truncation() {
        assert_eq!(short_id(200_000), (200_000 % 65_536) as u16);
        assert_eq!(short_id(0xC000_8001), 0x8001);
        assert_eq!(short_id(40_000), 40_000);
    }

    #[test]
    fn provider_names_normalize_to_upper_case() {
        assert_eq!(
            normalize_provider_name(" Microsoft-Windows-Kernel-General "),
            "MICROSOFT-WINDOWS-KERNEL-GENERAL"
        );
    }
}
