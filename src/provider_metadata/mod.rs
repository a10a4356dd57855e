//! Reading provider metadata out of a machine's provider modules.

pub mod extractor;
pub mod manifest;
pub mod message_table;
pub mod modern;
pub mod registry;
pub mod resources;

pub use self::extractor::{ExtractProgress, ProviderMetadataExtractor};
pub use self::message_table::{LegacyMessageTableParser, MessageTable, MessageTableEntry};
pub use self::modern::ModernProviderMetadataParser;
pub use self::registry::{ModernRegistration, ProviderRegistry, RegistrySnapshot};
