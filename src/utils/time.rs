use jiff::Timestamp;
use jiff::tz::{Offset, TimeZone};

/// Default display format, e.g. `2019-03-08 14:02:11`.
pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Render `ts` as wall-clock time in `tz`.
///
/// A format string jiff cannot apply falls back to the zoned RFC 9557 rendering.
pub fn format_in_zone(ts: Timestamp, tz: &TimeZone, format: &str) -> String {
    let zoned = ts.to_zoned(tz.clone());
    jiff::fmt::strtime::format(format, &zoned).unwrap_or_else(|_| zoned.to_string())
}

/// Resolve an IANA zone name, a fixed offset such as `+02:00`, or `UTC` / `local`.
pub fn time_zone_from_name(name: &str) -> Result<TimeZone, jiff::Error> {
    if name.eq_ignore_ascii_case("local") {
        return Ok(TimeZone::system());
    }
    if name.eq_ignore_ascii_case("utc") {
        return Ok(TimeZone::UTC);
    }
    if let Some(seconds) = fixed_offset_seconds(name) {
        return Ok(TimeZone::fixed(Offset::from_seconds(seconds)?));
    }
    TimeZone::get(name)
}

/// `+hh[:mm]` or `-hh[:mm]`.
fn fixed_offset_seconds(name: &str) -> Option<i32> {
    let (sign, rest) = match name.as_bytes().first()? {
        b'+' => (1, &name[1..]),
        b'-' => (-1, &name[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    (minutes < 60).then_some(sign * (hours * 3600 + minutes * 60))
}
