//! Byte-slice helpers for fixed-offset parsing.
//!
//! Every read is little-endian (PE resources, message tables and CRIM manifests are all LE) and
//! returns `None` when the requested range falls outside the slice, so callers can map the failure
//! onto their own error type with the context they have at hand.
//!
//! ```ignore
//! use crate::utils::bytes;
//!
//! let count = bytes::read_u32_le(blob, 0).ok_or(MyError::Truncated { what: "count" })?;
//! ```

/// Read `N` raw bytes at `offset`.
pub(crate) fn read_array<const N: usize>(buf: &[u8], offset: usize) -> Option<[u8; N]> {
    let end = offset.checked_add(N)?;
    let bytes: [u8; N] = buf.get(offset..end)?.try_into().ok()?;
    Some(bytes)
}

pub(crate) fn read_u8(buf: &[u8], offset: usize) -> Option<u8> {
    buf.get(offset).copied()
}

/// Read a 4-byte element signature at `offset` (e.g. `b"EVNT"`).
pub(crate) fn read_sig(buf: &[u8], offset: usize) -> Option<[u8; 4]> {
    read_array::<4>(buf, offset)
}

pub(crate) fn read_u16_le(buf: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_le_bytes(read_array::<2>(buf, offset)?))
}

pub(crate) fn read_u32_le(buf: &[u8], offset: usize) -> Option<u32> {
    Some(u32::from_le_bytes(read_array::<4>(buf, offset)?))
}

pub(crate) fn read_u64_le(buf: &[u8], offset: usize) -> Option<u64> {
    Some(u64::from_le_bytes(read_array::<8>(buf, offset)?))
}

/// Borrow `len` bytes at `offset`, checking for overflow as well as bounds.
pub(crate) fn slice(buf: &[u8], offset: usize, len: usize) -> Option<&[u8]> {
    let end = offset.checked_add(len)?;
    buf.get(offset..end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_little_endian_and_bounds_checked() {
        let buf = [0x01, 0x02, 0x03, 0x04, 0x05];
        assert_eq!(read_u16_le(&buf, 0), Some(0x0201));
        assert_eq!(read_u32_le(&buf, 1), Some(0x0504_0302));
        assert_eq!(read_u32_le(&buf, 2), None);
        assert_eq!(read_u8(&buf, 5), None);
        assert_eq!(slice(&buf, usize::MAX, 2), None);
    }
}
