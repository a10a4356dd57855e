//! Text rules applied to every enriched record, independent of where its metadata came from.

/// Prefix of the description synthesized when no message could be found for an event.
pub const DESCRIPTION_NOT_FOUND: &str = "The description for this event could not be found. \
     The following information was included with the event:\n\n";

/// Display name of a level code.
///
/// Only the levels written by the classic event log API are named; anything else (critical,
/// verbose, provider-defined levels) has an empty name.
pub fn level_name(level: u32) -> &'static str {
    match level {
        0 | 4 => "Information",
        2 => "Error",
        3 => "Warning",
        _ => "",
    }
}

/// Replace each `%N` token (1-based) with the Nth property.
///
/// Tokens whose index has no property are left as they are.
pub fn substitute_placeholders(format: &str, properties: &[String]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut rest = format;

    while let Some(percent) = rest.find('%') {
        out.push_str(&rest[..percent]);
        let after = &rest[percent + 1..];
        let digits = after
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(after.len());

        let property = after[..digits]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|index| properties.get(index));

        match property {
            Some(property) => out.push_str(property),
            None => out.push_str(&rest[percent..percent + 1 + digits]),
        }
        rest = &after[digits..];
    }

    out.push_str(rest);
    out
}

/// Final description of a record given the format string resolved for it, if any.
///
/// Without a usable format string a record with exactly one property is described by that
/// property; otherwise a placeholder message lists every property.
pub fn describe(format: Option<&str>, properties: &[String]) -> String {
    match format {
        Some(format) if !format.is_empty() => substitute_placeholders(format, properties),
        _ => match properties {
            [only] => only.clone(),
            _ => format!("{}{}", DESCRIPTION_NOT_FOUND, properties.join("\n")),
        },
    }
}

/// Reserved keyword bits shared by every provider.
const STANDARD_KEYWORDS: &[(u64, &str)] = &[
    (0x0001_0000_0000_0000, "Response Time"),
    (0x0002_0000_0000_0000, "WDI Context"),
    (0x0004_0000_0000_0000, "WDI Diag"),
    (0x0008_0000_0000_0000, "SQM"),
    (0x0010_0000_0000_0000, "Audit Failure"),
    (0x0020_0000_0000_0000, "Audit Success"),
    (0x0040_0000_0000_0000, "Correlation Hint"),
    (0x0080_0000_0000_0000, "Classic"),
];

pub fn standard_keyword_name(bit: u64) -> Option<&'static str> {
    STANDARD_KEYWORDS
        .iter()
        .find(|(value, _)| *value == bit)
        .map(|(_, name)| *name)
}

/// Each set bit of `mask` as its own value, lowest first.
pub fn set_bits(mask: u64) -> impl Iterator<Item = u64> {
    (0..u64::BITS)
        .map(|shift| 1u64 << shift)
        .filter(move |bit| mask & bit != 0)
}
