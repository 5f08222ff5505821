//! Text encodings accepted for the manager stream

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Charset used to decode inbound blocks and encode outbound actions.
///
/// Invalid input sequences are dropped on decode. Characters the charset
/// cannot represent are replaced by `?` on encode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
#[non_exhaustive]
pub enum TextEncoding {
    /// UTF-8 (default)
    #[default]
    Utf8,
    /// 7-bit ASCII
    Ascii,
    /// ISO-8859-1
    Latin1,
}

impl TextEncoding {
    /// Canonical label.
    pub fn as_str(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf8",
            TextEncoding::Ascii => "ascii",
            TextEncoding::Latin1 => "latin1",
        }
    }

    /// Decode bytes, silently dropping invalid sequences.
    pub fn decode(&self, data: &[u8]) -> String {
        match self {
            TextEncoding::Utf8 => {
                let mut out = String::with_capacity(data.len());
                for chunk in data.utf8_chunks() {
                    out.push_str(chunk.valid());
                }
                out
            }
            TextEncoding::Ascii => data
                .iter()
                .filter(|b| b.is_ascii())
                .map(|&b| b as char)
                .collect(),
            TextEncoding::Latin1 => data
                .iter()
                .map(|&b| b as char)
                .collect(),
        }
    }

    /// Encode text for the wire.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            TextEncoding::Utf8 => text
                .as_bytes()
                .to_vec(),
            TextEncoding::Ascii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
            TextEncoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unsupported encoding label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEncodingError(pub String);

impl fmt::Display for ParseEncodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported encoding: {}", self.0)
    }
}

impl std::error::Error for ParseEncodingError {}

impl FromStr for TextEncoding {
    type Err = ParseEncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s
            .to_ascii_lowercase()
            .as_str()
        {
            "utf8" | "utf-8" => Ok(TextEncoding::Utf8),
            "ascii" | "us-ascii" => Ok(TextEncoding::Ascii),
            "latin1" | "latin-1" | "iso-8859-1" | "iso8859-1" => Ok(TextEncoding::Latin1),
            _ => Err(ParseEncodingError(s.to_string())),
        }
    }
}

impl TryFrom<String> for TextEncoding {
    type Error = ParseEncodingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TextEncoding> for String {
    fn from(value: TextEncoding) -> Self {
        value
            .as_str()
            .to_string()
    }
}
