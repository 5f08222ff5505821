//! Decoded manager messages

use crate::{
    constants::{END_COMMAND_SENTINEL, SUCCESS_RESPONSES},
    headers::ManagerHeader,
};
use indexmap::IndexMap;
use percent_encoding::percent_decode_str;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    name: String,
    value: String,
}

/// One decoded manager block: a response, an event, or a list item.
///
/// Field names are case-insensitive and keep their arrival order. A field
/// that repeats (Asterisk sends one `Output:` line per line of CLI output)
/// is stored once with its values joined by `\n`. Lines that are not
/// `Key: Value` pairs, such as legacy command output or the connection
/// banner, are kept in [`content()`](Self::content).
///
/// Messages are immutable once parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    fields: IndexMap<String, Field>,
    content: Vec<String>,
}

/// Split a line into `(key, value)` if it looks like a field.
///
/// Keys never contain whitespace; anything else is content.
fn split_field(line: &str) -> Option<(&str, &str)> {
    let (key, value) = match line.split_once(": ") {
        Some(kv) => kv,
        None => (line.strip_suffix(':')?, ""),
    };
    if key.is_empty()
        || key
            .chars()
            .any(char::is_whitespace)
    {
        return None;
    }
    Some((key, value))
}

impl Message {
    /// Parse one block (without its terminator).
    ///
    /// Returns `None` for a block with no fields and no content.
    pub fn parse(block: &str) -> Option<Self> {
        let mut message = Message::default();

        for line in block.lines() {
            let line = line.trim_end_matches('\r');
            if line
                .trim()
                .is_empty()
            {
                continue;
            }
            match split_field(line) {
                Some((key, value)) => message.push_field(key, value),
                None => message
                    .content
                    .push(line.to_string()),
            }
        }

        if message.is_empty() {
            None
        } else {
            Some(message)
        }
    }

    /// Build a message from `(name, value)` pairs.
    ///
    /// ```
    /// use asterisk_ami_tokio::Message;
    ///
    /// let event = Message::from_fields([("Event", "PeerStatus"), ("Peer", "SIP/100")]);
    /// assert_eq!(event.event_name(), Some("PeerStatus"));
    /// assert_eq!(event.header("peer"), Some("SIP/100"));
    /// ```
    pub fn from_fields<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut message = Message::default();
        for (key, value) in fields {
            message.push_field(key.as_ref(), value.as_ref());
        }
        message
    }

    fn push_field(&mut self, key: &str, value: &str) {
        self.fields
            .entry(key.to_ascii_lowercase())
            .and_modify(|field| {
                field
                    .value
                    .push('\n');
                field
                    .value
                    .push_str(value);
            })
            .or_insert_with(|| Field {
                name: key.to_string(),
                value: value.to_string(),
            });
    }

    /// Look up a field by name (case-insensitive).
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        let name = name.as_ref();
        let field = match self
            .fields
            .get(name)
        {
            Some(field) => Some(field),
            None => self
                .fields
                .get(&name.to_ascii_lowercase()),
        };
        field.map(|f| f.value.as_str())
    }

    /// Whether the field is present (case-insensitive).
    pub fn contains(&self, name: impl AsRef<str>) -> bool {
        self.header(name)
            .is_some()
    }

    /// Fields in arrival order, with their original spelling.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .values()
            .map(|f| (f.name.as_str(), f.value.as_str()))
    }

    /// Number of distinct fields.
    pub fn len(&self) -> usize {
        self.fields
            .len()
    }

    /// `true` if the message has no fields and no content lines.
    pub fn is_empty(&self) -> bool {
        self.fields
            .is_empty()
            && self
                .content
                .is_empty()
    }

    /// Non-field lines in arrival order.
    pub fn content(&self) -> &[String] {
        &self.content
    }

    /// `ActionID` field.
    pub fn action_id(&self) -> Option<&str> {
        self.header(ManagerHeader::ActionId)
    }

    /// `CommandID` field, set on AsyncAGI events.
    pub fn command_id(&self) -> Option<&str> {
        self.header(ManagerHeader::CommandId)
    }

    /// Correlation identifier: `ActionID`, falling back to `CommandID`.
    pub fn id(&self) -> Option<&str> {
        self.action_id()
            .or_else(|| self.command_id())
    }

    /// `Event` field.
    pub fn event_name(&self) -> Option<&str> {
        self.header(ManagerHeader::Event)
    }

    /// `Response` field.
    pub fn response(&self) -> Option<&str> {
        self.header(ManagerHeader::Response)
    }

    /// `Message` field (the human-readable response text).
    pub fn message_text(&self) -> Option<&str> {
        self.header(ManagerHeader::Message)
    }

    /// `true` if this is an unsolicited or list event.
    pub fn is_event(&self) -> bool {
        self.event_name()
            .is_some()
    }

    /// `true` iff `Response` is `Success`, `Follows` or `Goodbye` (any case).
    ///
    /// This is the single place success is derived; login and action results
    /// both rely on it.
    pub fn is_success(&self) -> bool {
        self.response()
            .map(|r| {
                SUCCESS_RESPONSES
                    .iter()
                    .any(|ok| r.eq_ignore_ascii_case(ok))
            })
            .unwrap_or(false)
    }

    /// `true` if a content line carries the legacy end-of-output sentinel.
    pub fn has_end_command(&self) -> bool {
        self.content
            .iter()
            .any(|line| line.trim() == END_COMMAND_SENTINEL)
    }

    /// Percent-decoded `Result` field of an AsyncAGI exec event.
    ///
    /// Asterisk URL-encodes the AGI reply line, e.g.
    /// `200%20result%3D1%20(SIP%2F000000)%0A` becomes `200 result=1 (SIP/000000)`.
    pub fn agi_result(&self) -> Option<String> {
        let raw = self.header(ManagerHeader::Result)?;
        let decoded = percent_decode_str(raw)
            .decode_utf8_lossy()
            .into_owned();
        Some(
            decoded
                .trim_end_matches(['\r', '\n'])
                .to_string(),
        )
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            for part in value.split('\n') {
                writeln!(f, "{}: {}", name, part)?;
            }
        }
        for line in &self.content {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}
