pub(crate) mod bytes;
mod strings;
mod time;

pub(crate) use self::strings::{decode_ansi_z, decode_utf16le_bytes_z};
pub use self::time::{DEFAULT_TIME_FORMAT, format_in_zone, time_zone_from_name};
