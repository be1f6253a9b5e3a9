// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Core types shared by the pinner services.

use core::{fmt, str::FromStr};

use base64::Engine as _;
use serde_with::{DeserializeFromStr, SerializeDisplay};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

/// The number of bytes in the raw representation of a [`Skylink`]: a 2-byte
/// little-endian bitfield followed by a 32-byte merkle root.
pub const RAW_SKYLINK_SIZE: usize = 34;

/// The length of the canonical base64 string form of a skylink.
const BASE64_SKYLINK_LENGTH: usize = 46;

/// The length of the alternate base32 string form of a skylink.
const BASE32_SKYLINK_LENGTH: usize = 55;

/// The alphabet of the base32 form, as used in subdomain-style links.
const BASE32_ALPHABET: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

/// Error returned when parsing an invalid string as a [`Skylink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SkylinkParseError {
    /// The string has a length matching neither the base64 nor the base32 form.
    #[error("invalid skylink length: {0}")]
    InvalidLength(usize),
    /// The string contains characters outside the expected alphabet, or does
    /// not decode to [`RAW_SKYLINK_SIZE`] bytes.
    #[error("invalid skylink encoding")]
    InvalidEncoding,
}

/// The canonical handle of a content-addressed object.
///
/// A skylink consists of a 2-byte bitfield carrying the link version and
/// offset information, followed by the 32-byte merkle root of the object. Its
/// canonical string form is the URL-safe, unpadded base64 encoding of those
/// 34 bytes; links may also arrive in a 55-character base32 form and are
/// canonicalized on parse.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr,
)]
pub struct Skylink {
    bitfield: u16,
    root: [u8; 32],
}

impl Skylink {
    /// Creates a skylink from its raw 34-byte representation.
    pub fn from_raw(bytes: [u8; RAW_SKYLINK_SIZE]) -> Self {
        let bitfield = u16::from_le_bytes([bytes[0], bytes[1]]);
        let mut root = [0u8; 32];
        root.copy_from_slice(&bytes[2..]);
        Self { bitfield, root }
    }

    /// Returns the raw 34-byte representation of this skylink.
    pub fn to_raw(&self) -> [u8; RAW_SKYLINK_SIZE] {
        let mut bytes = [0u8; RAW_SKYLINK_SIZE];
        bytes[..2].copy_from_slice(&self.bitfield.to_le_bytes());
        bytes[2..].copy_from_slice(&self.root);
        bytes
    }

    /// The version of the link, encoded in the low bits of the bitfield.
    pub fn version(&self) -> u8 {
        (self.bitfield & 0b11) as u8 + 1
    }

    /// Returns true iff this is a version-2 link, which must be resolved to
    /// its version-1 target before it is stored.
    pub fn is_v2(&self) -> bool {
        self.version() == 2
    }

    /// The merkle root the link points at.
    pub fn merkle_root(&self) -> &[u8; 32] {
        &self.root
    }

    /// Returns the base32 string form of this skylink.
    pub fn to_base32(&self) -> String {
        base32_encode(&self.to_raw())
    }
}

impl fmt::Display for Skylink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(self.to_raw()))
    }
}

impl fmt::Debug for Skylink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Skylink").field(&self.to_string()).finish()
    }
}

impl FromStr for Skylink {
    type Err = SkylinkParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = match s.len() {
            BASE64_SKYLINK_LENGTH => base64::engine::general_purpose::URL_SAFE_NO_PAD
                .decode(s)
                .map_err(|_| SkylinkParseError::InvalidEncoding)?,
            BASE32_SKYLINK_LENGTH => base32_decode(s)?,
            len => return Err(SkylinkParseError::InvalidLength(len)),
        };
        let bytes: [u8; RAW_SKYLINK_SIZE] = raw
            .try_into()
            .map_err(|_| SkylinkParseError::InvalidEncoding)?;
        Ok(Self::from_raw(bytes))
    }
}

fn base32_encode(data: &[u8]) -> String {
    let mut encoded = String::with_capacity(data.len() * 8 / 5 + 1);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for &byte in data {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            encoded.push(BASE32_ALPHABET[(buffer >> bits) as usize & 0x1f] as char);
        }
    }
    if bits > 0 {
        encoded.push(BASE32_ALPHABET[(buffer << (5 - bits)) as usize & 0x1f] as char);
    }
    encoded
}

fn base32_decode(input: &str) -> Result<Vec<u8>, SkylinkParseError> {
    let mut decoded = Vec::with_capacity(input.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for byte in input.bytes() {
        let value = BASE32_ALPHABET
            .iter()
            .position(|&c| c == byte.to_ascii_lowercase())
            .ok_or(SkylinkParseError::InvalidEncoding)?;
        buffer = (buffer << 5) | value as u32;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            decoded.push((buffer >> bits) as u8);
        }
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skylink_with_root(bitfield: u16, fill: u8) -> Skylink {
        let mut raw = [fill; RAW_SKYLINK_SIZE];
        raw[..2].copy_from_slice(&bitfield.to_le_bytes());
        Skylink::from_raw(raw)
    }

    #[test]
    fn base64_form_round_trips() {
        let skylink = skylink_with_root(0, 0x42);
        let encoded = skylink.to_string();
        assert_eq!(encoded.len(), BASE64_SKYLINK_LENGTH);
        assert_eq!(encoded.parse::<Skylink>().unwrap(), skylink);
    }

    #[test]
    fn base32_form_parses_to_the_same_link() {
        let skylink = skylink_with_root(0, 0x17);
        let encoded = skylink.to_base32();
        assert_eq!(encoded.len(), BASE32_SKYLINK_LENGTH);
        assert_eq!(encoded.parse::<Skylink>().unwrap(), skylink);
        // Uppercase input is accepted as well.
        assert_eq!(encoded.to_uppercase().parse::<Skylink>().unwrap(), skylink);
    }

    #[test]
    fn rejects_wrong_lengths() {
        assert_eq!(
            "too-short".parse::<Skylink>(),
            Err(SkylinkParseError::InvalidLength(9))
        );
        assert_eq!(
            "".parse::<Skylink>(),
            Err(SkylinkParseError::InvalidLength(0))
        );
    }

    #[test]
    fn rejects_invalid_alphabets() {
        // Correct length, but '!' is not a base64 character.
        let input = "!".repeat(BASE64_SKYLINK_LENGTH);
        assert_eq!(
            input.parse::<Skylink>(),
            Err(SkylinkParseError::InvalidEncoding)
        );
        // Correct length, but 'z' is outside the base32 alphabet.
        let input = "z".repeat(BASE32_SKYLINK_LENGTH);
        assert_eq!(
            input.parse::<Skylink>(),
            Err(SkylinkParseError::InvalidEncoding)
        );
    }

    #[test]
    fn version_is_read_from_the_bitfield() {
        assert_eq!(skylink_with_root(0, 0).version(), 1);
        assert!(!skylink_with_root(0, 0).is_v2());
        assert_eq!(skylink_with_root(1, 0).version(), 2);
        assert!(skylink_with_root(1, 0).is_v2());
    }

    #[test]
    fn serde_uses_the_canonical_string_form() {
        let skylink = skylink_with_root(0, 0x99);
        let json = serde_json::to_string(&skylink).unwrap();
        assert_eq!(json, format!("\"{skylink}\""));
        assert_eq!(serde_json::from_str::<Skylink>(&json).unwrap(), skylink);
    }
}
