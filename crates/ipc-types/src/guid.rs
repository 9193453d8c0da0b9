//! 128-bit interface/type identifiers and the FNV-1a hashing used to derive
//! compact 32-bit interface ids from their canonical GUID text.

use std::fmt;

use crate::error::IpcError;

/// A 128-bit interface or type identifier, stored as its raw bytes.
///
/// Canonical text form is `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX` (36 chars,
/// hyphens at byte offsets 8, 13, 18, 23). The bytes themselves are opaque —
/// hashing and equality both operate on the raw 16 bytes, never on the
/// parsed fields.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid(pub [u8; 16]);

const HYPHEN_POSITIONS: [usize; 4] = [8, 13, 18, 23];

impl Guid {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Guid(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Parse a canonical 36-character GUID string.
    ///
    /// Fails with [`IpcError::InvalidStringSize`] if the length isn't 36,
    /// or [`IpcError::InvalidString`] if a non-hyphen, non-hex-digit
    /// character is found where a hex digit is expected.
    pub fn parse(text: &str) -> Result<Self, IpcError> {
        if text.len() != 36 {
            return Err(IpcError::invalid_string_size(text.len()));
        }
        let chars: Vec<char> = text.chars().collect();
        if chars.len() != 36 {
            // Non-ASCII input can have byte len 36 but fewer chars; either
            // way the shape check below will reject it.
            return Err(IpcError::invalid_string("non-ASCII GUID text"));
        }
        for &pos in &HYPHEN_POSITIONS {
            if chars[pos] != '-' {
                return Err(IpcError::invalid_string("missing hyphen"));
            }
        }

        let mut bytes = [0u8; 16];
        let mut out = 0usize;
        let mut i = 0usize;
        while i < 36 {
            if HYPHEN_POSITIONS.contains(&i) {
                i += 1;
                continue;
            }
            let hi = hex_digit(chars[i]).ok_or_else(|| IpcError::invalid_string("bad hex digit"))?;
            let lo = hex_digit(chars[i + 1])
                .ok_or_else(|| IpcError::invalid_string("bad hex digit"))?;
            bytes[out] = (hi << 4) | lo;
            out += 1;
            i += 2;
        }
        debug_assert_eq!(out, 16);
        Ok(Guid(bytes))
    }

    /// Render the canonical `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX` form.
    pub fn to_canonical_string(&self) -> String {
        let b = &self.0;
        format!(
            "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            b[0], b[1], b[2], b[3],
            b[4], b[5],
            b[6], b[7],
            b[8], b[9],
            b[10], b[11], b[12], b[13], b[14], b[15],
        )
    }

    /// Zero-extend the low 4 bytes of this GUID into a 32-bit interface id.
    /// Used to decode the "synthetic GUID" projection produced by
    /// [`crate::header::v1::synthetic_guid_for_interface_id`].
    pub fn low_u32(&self) -> u32 {
        u32::from_be_bytes([self.0[12], self.0[13], self.0[14], self.0[15]])
    }
}

fn hex_digit(c: char) -> Option<u8> {
    match c {
        '0'..='9' => Some(c as u8 - b'0'),
        'a'..='f' => Some(c as u8 - b'a' + 10),
        'A'..='F' => Some(c as u8 - b'A' + 10),
        _ => None,
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self.to_canonical_string())
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

const FNV_PRIME: u32 = 0x0100_0193;
const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;

/// FNV-1a over raw bytes. Used to derive `method_hash` in [`crate::method::MethodMetadata`].
pub fn fnv1a32(data: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in data {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// FNV-1a over a GUID's canonical text, normalizing case and stripping
/// `{}` delimiters first. This is how 32-bit wire `interface_id`s are
/// derived from a build-time interface GUID table.
pub fn fnv1a32_guid(guid_str: &str) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for c in guid_str.chars() {
        if c == '{' || c == '}' {
            continue;
        }
        let upper = c.to_ascii_uppercase();
        let mut buf = [0u8; 4];
        for &b in upper.encode_utf8(&mut buf).as_bytes() {
            hash ^= u32::from(b);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_to_same_canonical_text() {
        let text = "12345678-1234-1234-1234-123456789ABC";
        let guid = Guid::parse(text).unwrap();
        assert_eq!(guid.to_canonical_string(), text);
    }

    #[test]
    fn parse_rejects_wrong_length() {
        let text = "12345678-1234-1234-1234-123456789AB"; // 35 chars
        let err = Guid::parse(text).unwrap_err();
        assert!(matches!(err, IpcError::InvalidStringSize { .. }));
    }

    #[test]
    fn parse_rejects_bad_hex_digits() {
        let text = "XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX";
        let err = Guid::parse(text).unwrap_err();
        assert!(matches!(err, IpcError::InvalidString { .. }));
    }

    #[test]
    fn fnv1a32_guid_ignores_braces_and_case() {
        let a = fnv1a32_guid("{12345678-1234-1234-1234-123456789abc}");
        let b = fnv1a32_guid("12345678-1234-1234-1234-123456789ABC");
        assert_eq!(a, b);
    }

    #[test]
    fn fnv1a32_matches_known_vector() {
        // FNV-1a32 of the empty string is the offset basis.
        assert_eq!(fnv1a32(b""), FNV_OFFSET_BASIS);
    }
}
