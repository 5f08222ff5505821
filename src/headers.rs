//! Typed field names for Asterisk manager messages and actions.

/// Error returned when parsing an unrecognized manager field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseManagerHeaderError(pub String);

impl std::fmt::Display for ParseManagerHeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown manager header: {}", self.0)
    }
}

impl std::error::Error for ParseManagerHeaderError {}

define_field_enum! {
    error_type: ParseManagerHeaderError,
    /// Field names with protocol meaning to the client.
    ///
    /// Lookups through [`Message::header()`](crate::Message::header) are
    /// case-insensitive, so these spellings only matter for outbound blocks.
    pub enum ManagerHeader {
        Action => "Action",
        ActionId => "ActionID",
        CommandId => "CommandID",
        Event => "Event",
        Response => "Response",
        Message => "Message",
        EventList => "EventList",
        SubEvent => "SubEvent",
        Command => "Command",
        Channel => "Channel",
        Username => "Username",
        Secret => "Secret",
        Result => "Result",
        Output => "Output",
        Async => "Async",
        Privilege => "Privilege",
    }
}
