//! Event records as they cross the reader boundary, and the display-ready records derived from
//! them.

use crate::err::RecordValidationError;

use jiff::Timestamp;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;

/// Highest level code an event can carry.
const MAX_LEVEL: u32 = u8::MAX as u32;

/// One raw event as delivered by a reader. Validated with [`RawRecord::validate`] before it is
/// trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    pub id: u32,
    #[serde(default)]
    pub version: Option<u8>,
    #[serde(default)]
    pub qualifiers: Option<u16>,
    #[serde(default)]
    pub log_name: String,
    #[serde(default)]
    pub machine_name: String,
    #[serde(default)]
    pub level: u32,
    pub time_created: Timestamp,
    pub provider_name: String,
    #[serde(default)]
    pub task: u32,
    #[serde(default)]
    pub opcode: u32,
    #[serde(default)]
    pub keywords: Keywords,
    #[serde(default)]
    pub user: Option<String>,
    pub record_id: u64,
    #[serde(default, deserialize_with = "properties_as_text")]
    pub properties: Vec<String>,
}

impl RawRecord {
    pub fn validate(&self) -> Result<(), RecordValidationError> {
        if self.provider_name.trim().is_empty() {
            return Err(RecordValidationError::EmptyProviderName {
                record_id: self.record_id,
            });
        }
        if self.level > MAX_LEVEL {
            return Err(RecordValidationError::InvalidLevel {
                record_id: self.record_id,
                level: self.level,
            });
        }
        Ok(())
    }

    /// Id used for the legacy message lookup: qualifiers in the high word when present.
    pub fn message_id(&self) -> u32 {
        match self.qualifiers {
            Some(qualifiers) => (u32::from(qualifiers) << 16) | (self.id & 0xffff),
            None => self.id,
        }
    }

    /// Version and log name, when both are present. Only such records can match a modern event.
    pub fn modern_key(&self) -> Option<(u8, &str)> {
        match self.version {
            Some(version) if !self.log_name.is_empty() => Some((version, self.log_name.as_str())),
            _ => None,
        }
    }
}

/// Keyword bitmask(s) of a record. Readers emit either a single mask or an array of masks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged, from = "KeywordsRepr")]
pub enum Keywords {
    Mask(u64),
    Masks(Vec<u64>),
}

impl Default for Keywords {
    fn default() -> Self {
        Keywords::Mask(0)
    }
}

impl Keywords {
    pub fn masks(&self) -> &[u64] {
        match self {
            Keywords::Mask(mask) => std::slice::from_ref(mask),
            Keywords::Masks(masks) => masks,
        }
    }
}

/// Masks with the top bit set are commonly written as negative 64-bit integers.
#[derive(Deserialize)]
#[serde(untagged)]
enum MaskRepr {
    Unsigned(u64),
    Signed(i64),
}

impl From<MaskRepr> for u64 {
    fn from(mask: MaskRepr) -> u64 {
        match mask {
            MaskRepr::Unsigned(v) => v,
            MaskRepr::Signed(v) => v as u64,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KeywordsRepr {
    Mask(MaskRepr),
    Masks(Vec<MaskRepr>),
}

impl From<KeywordsRepr> for Keywords {
    fn from(repr: KeywordsRepr) -> Self {
        match repr {
            KeywordsRepr::Mask(mask) => Keywords::Mask(mask.into()),
            KeywordsRepr::Masks(masks) => Keywords::Masks(masks.into_iter().map(u64::from).collect()),
        }
    }
}

/// Properties are positional strings, but readers may pass numbers, booleans or nulls through.
fn properties_as_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let values = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(values
        .into_iter()
        .map(|value| match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        })
        .collect())
}

/// A raw record plus everything resolved for display. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedEventRecord {
    #[serde(flatten)]
    pub raw: Arc<RawRecord>,
    pub level_name: String,
    pub description: String,
    pub task_name: String,
    pub opcode_name: String,
    /// Comma-separated names of the set keyword bits.
    pub keyword_names: String,
    pub time_created_display: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn deserializes_reader_output() {
        let record: RawRecord = serde_json::from_str(
            r#"{
                "id": 7036,
                "qualifiers": 16384,
                "logName": "System",
                "machineName": "host-a",
                "level": 4,
                "timeCreated": "2019-03-08T14:02:11Z",
                "providerName": "Service Control Manager",
                "keywords": [-9187343239835811840],
                "recordId": 42,
                "properties": ["Windows Update", "running", 3, null]
            }"#,
        )
        .unwrap();

        assert_eq!(record.version, None);
        assert_eq!(record.message_id(), 0x4000_1B7C);
        assert_eq!(record.keywords.masks(), &[0x8080_0000_0000_0000]);
        assert_eq!(
            record.properties,
            vec!["Windows Update", "running", "3", ""]
        );
        assert_eq!(record.modern_key(), None);
        assert_eq!(record.validate(), Ok(()));
    }

    #[test]
    fn single_mask_and_missing_keywords() {
        let one: Keywords = serde_json::from_str("32768").unwrap();
        assert_eq!(one.masks(), &[0x8000]);
        assert_eq!(Keywords::default().masks(), &[0]);
    }

    #[test]
    fn validation_rejects_bad_records() {
        let mut record: RawRecord = serde_json::from_str(
            r#"{"id":1,"timeCreated":"2020-01-01T00:00:00Z","providerName":" ","recordId":9}"#,
        )
        .unwrap();
        assert_eq!(
            record.validate(),
            Err(RecordValidationError::EmptyProviderName { record_id: 9 })
        );

        record.provider_name = "P".to_string();
        record.level = 300;
        assert_eq!(
            record.validate(),
            Err(RecordValidationError::InvalidLevel {
                record_id: 9,
                level: 300
            })
        );
    }
}
