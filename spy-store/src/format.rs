//! Payload formatters used to render raw message bytes as text.

use std::fmt::{self, Display};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::FormatError;

/// Conversion applied to a raw payload before it is displayed or searched.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Formatter {
    /// Payload bytes as UTF-8 text (invalid sequences replaced).
    #[default]
    Plain,
    /// Payload rendered as lowercase hexadecimal.
    HexEncode,
    /// Payload treated as hexadecimal text and decoded.
    HexDecode,
    /// Payload rendered as standard base64.
    Base64Encode,
    /// Payload treated as base64 text and decoded.
    Base64Decode,
}

impl Formatter {
    /// Converts `raw` into display text.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] when a decoding formatter is applied to a payload
    /// that is not valid in the expected encoding.
    pub fn apply(self, raw: &[u8]) -> Result<String, FormatError> {
        match self {
            Self::Plain => Ok(String::from_utf8_lossy(raw).into_owned()),
            Self::HexEncode => Ok(hex::encode(raw)),
            Self::HexDecode => hex::decode(raw.trim_ascii())
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .map_err(|err| FormatError::InvalidHex {
                    reason: err.to_string(),
                }),
            Self::Base64Encode => Ok(STANDARD.encode(raw)),
            Self::Base64Decode => STANDARD
                .decode(raw.trim_ascii())
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .map_err(|err| FormatError::InvalidBase64 {
                    reason: err.to_string(),
                }),
        }
    }

    /// Returns a short label suitable for logs and menus.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::HexEncode => "hex-encode",
            Self::HexDecode => "hex-decode",
            Self::Base64Encode => "base64-encode",
            Self::Base64Decode => "base64-decode",
        }
    }
}

impl Display for Formatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Truncates `text` to at most `max_chars` characters.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}
