//! AMI stream framing: reassembles blocks across read boundaries

use crate::{
    constants::{BLOCK_DELIMITERS, MAX_BUFFER_SIZE},
    encoding::TextEncoding,
    error::{AmiError, AmiResult},
    message::Message,
};
use bytes::{Buf, BytesMut};
use tracing::trace;

/// Locate the earliest block delimiter in `data`.
///
/// Returns `(block_len, delimiter_len)`.
fn find_delimiter(data: &[u8]) -> Option<(usize, usize)> {
    BLOCK_DELIMITERS
        .iter()
        .filter_map(|delim| {
            data.windows(delim.len())
                .position(|w| w == *delim)
                .map(|pos| (pos, delim.len()))
        })
        .min_by_key(|(pos, _)| *pos)
}

/// AMI protocol parser
///
/// Bytes go in with [`add_data`](Self::add_data); decoded messages come out of
/// [`parse_message`](Self::parse_message). Whatever follows the last complete
/// delimiter stays in the carry-over buffer until more data arrives, so the
/// buffer never holds a complete block between calls that drained it.
///
/// Blocks are cut on raw bytes and only then decoded, which keeps multi-byte
/// characters intact when a read boundary falls inside one.
#[derive(Debug)]
pub struct AmiParser {
    buffer: BytesMut,
    encoding: TextEncoding,
    /// Bytes already searched without finding a delimiter
    scanned: usize,
}

impl AmiParser {
    /// Create new parser
    pub fn new(encoding: TextEncoding) -> Self {
        Self {
            buffer: BytesMut::new(),
            encoding,
            scanned: 0,
        }
    }

    /// Add data to the parser buffer
    pub fn add_data(&mut self, data: &[u8]) -> AmiResult<()> {
        if self
            .buffer
            .len()
            + data.len()
            > MAX_BUFFER_SIZE
        {
            return Err(AmiError::protocol_error(format!(
                "Buffer would exceed limit of {} bytes without a block delimiter",
                MAX_BUFFER_SIZE
            )));
        }
        self.buffer
            .extend_from_slice(data);
        Ok(())
    }

    /// Bytes waiting for a delimiter.
    pub fn buffered(&self) -> usize {
        self.buffer
            .len()
    }

    /// Cut the next complete block out of the buffer, decoded and trimmed.
    ///
    /// Empty blocks are returned as empty strings; callers skip them.
    fn next_block(&mut self) -> Option<String> {
        // A delimiter may straddle the previous scan boundary.
        let start = self
            .scanned
            .saturating_sub(3);
        let (len, delim_len) = match find_delimiter(&self.buffer[start..]) {
            Some((pos, delim_len)) => (start + pos, delim_len),
            None => {
                self.scanned = self
                    .buffer
                    .len();
                return None;
            }
        };

        let raw = self
            .buffer
            .split_to(len);
        self.buffer
            .advance(delim_len);
        self.scanned = 0;

        Some(
            self.encoding
                .decode(&raw)
                .trim()
                .to_string(),
        )
    }

    /// Try to parse a complete message from the buffer
    ///
    /// Blank blocks are skipped. Returns `None` once only an incomplete tail
    /// remains.
    pub fn parse_message(&mut self) -> Option<Message> {
        while let Some(block) = self.next_block() {
            if block.is_empty() {
                continue;
            }
            match Message::parse(&block) {
                Some(message) => return Some(message),
                None => trace!("[RECV] Skipping undecodable block"),
            }
        }
        None
    }
}

impl Default for AmiParser {
    fn default() -> Self {
        Self::new(TextEncoding::default())
    }
}
