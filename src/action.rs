//! Outbound actions and response correlation

use crate::{
    constants::{ACTION_ID_PREFIX, BLOCK_TERMINATOR, LINE_TERMINATOR},
    error::{AmiError, AmiResult},
    headers::ManagerHeader,
    message::Message,
};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::time::delay_queue;
use uuid::Uuid;

/// Validate that a user-provided string contains no line terminators.
///
/// AMI blocks are line-delimited; embedded newlines would allow injection
/// of arbitrary fields or whole extra actions.
fn validate_no_newlines(s: &str, context: &str) -> AmiResult<()> {
    if s.contains('\n') || s.contains('\r') {
        return Err(AmiError::InvalidField {
            field: format!("{} must not contain newlines", context),
        });
    }
    Ok(())
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "true" | "yes" | "1" | "on"
    )
}

/// How the server correlates replies to an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ActionKind {
    /// Replies echo `ActionID`.
    Standard,
    /// AsyncAGI command; the exec event echoes `CommandID`, which is set to the
    /// same value as `ActionID`.
    AgiCommand,
}

/// An AMI request.
///
/// ```
/// use asterisk_ami_tokio::Action;
///
/// let action = Action::new("QueueStatus")
///     .field("Queue", "support").unwrap()
///     .as_list(true);
/// assert_eq!(action.name(), "QueueStatus");
/// assert_eq!(action.get("queue"), Some("support"));
/// ```
#[derive(Clone)]
pub struct Action {
    name: String,
    fields: Vec<(String, String)>,
    action_id: Option<String>,
    as_list: bool,
    timeout: Option<Duration>,
    kind: ActionKind,
}

impl Action {
    /// Start an action with the given `Action:` name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            action_id: None,
            as_list: false,
            timeout: None,
            kind: ActionKind::Standard,
        }
    }

    /// Add a parameter.
    ///
    /// `Action` renames the action and `ActionID` sets the identifier; every
    /// other name is sent as-is, in insertion order. Returns an error if the
    /// name or value contains newline characters.
    pub fn field(mut self, name: &str, value: &str) -> AmiResult<Self> {
        validate_no_newlines(name, "field name")?;
        validate_no_newlines(value, "field value")?;
        if name.eq_ignore_ascii_case(ManagerHeader::Action.as_str()) {
            self.name = value.to_string();
        } else if name.eq_ignore_ascii_case(ManagerHeader::ActionId.as_str()) {
            self.action_id = Some(value.to_string());
        } else {
            self.fields
                .push((name.to_string(), value.to_string()));
        }
        Ok(self)
    }

    /// Use an explicit identifier instead of a generated one.
    pub fn with_action_id(self, action_id: &str) -> AmiResult<Self> {
        self.field(ManagerHeader::ActionId.as_str(), action_id)
    }

    /// Collect every correlated message until the list terminator.
    pub fn as_list(mut self, as_list: bool) -> Self {
        self.as_list = as_list;
        self
    }

    /// Fail the pending response if nothing completes it in time.
    ///
    /// Clamped to [`MAX_ACTION_TIMEOUT_MS`](crate::constants::MAX_ACTION_TIMEOUT_MS).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// `Action: Ping`, the keepalive no-op.
    pub fn ping() -> Self {
        Self::new("Ping")
    }

    /// `Action: Login` with username and secret.
    pub fn login(username: &str, secret: &str) -> AmiResult<Self> {
        Self::new("Login")
            .field(ManagerHeader::Username.as_str(), username)?
            .field(ManagerHeader::Secret.as_str(), secret)
    }

    /// `Action: Logoff`
    pub fn logoff() -> Self {
        Self::new("Logoff")
    }

    /// `Action: Command` running a CLI command.
    pub fn command(command: &str) -> AmiResult<Self> {
        Self::new("Command").field(ManagerHeader::Command.as_str(), command)
    }

    /// `Action: AGI` queueing an AGI command on a channel in AsyncAGI.
    ///
    /// Resolves as a list: the queueing acknowledgement, then the exec event
    /// carrying the AGI result.
    pub fn agi(channel: &str, command: &str) -> AmiResult<Self> {
        let mut action = Self::new("AGI")
            .field(ManagerHeader::Channel.as_str(), channel)?
            .field(ManagerHeader::Command.as_str(), command)?;
        action.kind = ActionKind::AgiCommand;
        Ok(action)
    }

    /// Action name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a parameter (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Explicit identifier, if one was set.
    pub fn action_id(&self) -> Option<&str> {
        self.action_id
            .as_deref()
    }

    /// Whether list mode was requested.
    pub fn is_list(&self) -> bool {
        self.as_list
    }

    /// Per-action timeout, if any.
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout
    }

    /// Correlation kind.
    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    /// Serialize into one block ending with the block terminator.
    pub fn to_wire_format(&self, action_id: &str) -> AmiResult<String> {
        use std::fmt::Write;
        validate_no_newlines(&self.name, "action name")?;
        validate_no_newlines(action_id, "action id")?;

        let mut result = String::new();
        let _ = write!(
            result,
            "{}: {}{}",
            ManagerHeader::Action,
            self.name,
            LINE_TERMINATOR
        );
        for (key, value) in &self.fields {
            let _ = write!(result, "{}: {}{}", key, value, LINE_TERMINATOR);
        }
        if self.kind == ActionKind::AgiCommand {
            let _ = write!(
                result,
                "{}: {}{}",
                ManagerHeader::CommandId,
                action_id,
                LINE_TERMINATOR
            );
        }
        let _ = write!(
            result,
            "{}: {}{}",
            ManagerHeader::ActionId,
            action_id,
            BLOCK_TERMINATOR
        );
        Ok(result)
    }

    /// Whether an `Originate` reply only acknowledges queueing.
    fn is_async_originate(&self) -> bool {
        self.get(ManagerHeader::Async.as_str())
            .map(is_truthy)
            .unwrap_or(false)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<(&str, &str)> = self
            .fields
            .iter()
            .map(|(k, v)| {
                if k.eq_ignore_ascii_case(ManagerHeader::Secret.as_str()) {
                    (k.as_str(), "[REDACTED]")
                } else {
                    (k.as_str(), v.as_str())
                }
            })
            .collect();
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("fields", &fields)
            .field("action_id", &self.action_id)
            .field("as_list", &self.as_list)
            .field("timeout", &self.timeout)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Generates identifiers unique for the lifetime of a manager.
///
/// Ids look like `action/<uuid>/<n>`: the UUID is fixed per generator and `n`
/// increases monotonically, so no two pending actions share one.
#[derive(Debug)]
pub struct ActionIdGenerator {
    prefix: String,
    counter: AtomicU64,
}

impl ActionIdGenerator {
    /// New generator with a random prefix.
    pub fn new() -> Self {
        Self {
            prefix: format!("{}/{}", ACTION_ID_PREFIX, Uuid::new_v4()),
            counter: AtomicU64::new(0),
        }
    }

    /// Next identifier.
    pub fn next_id(&self) -> String {
        let n = self
            .counter
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        format!("{}/{}", self.prefix, n)
    }
}

impl Default for ActionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolved value of an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// The first message bearing the action's identifier.
    Single(Message),
    /// Every correlated message, in arrival order, ending with the terminator.
    List(Vec<Message>),
}

impl Response {
    /// Success of the first message.
    pub fn is_success(&self) -> bool {
        self.first()
            .map(Message::is_success)
            .unwrap_or(false)
    }

    /// First message.
    pub fn first(&self) -> Option<&Message> {
        self.messages()
            .first()
    }

    /// All messages.
    pub fn messages(&self) -> &[Message] {
        match self {
            Response::Single(message) => std::slice::from_ref(message),
            Response::List(messages) => messages,
        }
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages()
            .len()
    }

    /// `true` for an empty list.
    pub fn is_empty(&self) -> bool {
        self.messages()
            .is_empty()
    }

    /// Whether this resolved in list mode.
    pub fn is_list(&self) -> bool {
        matches!(self, Response::List(_))
    }

    /// Look up a field on the first message.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.first()?
            .header(name)
    }

    /// Decoded AGI result from the last message carrying one.
    pub fn agi_result(&self) -> Option<String> {
        self.messages()
            .iter()
            .rev()
            .find_map(Message::agi_result)
    }

    /// Consume into the message list.
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Response::Single(message) => vec![message],
            Response::List(messages) => messages,
        }
    }
}

/// Completion handle returned by [`Manager::send_action`](crate::Manager::send_action).
///
/// Resolves to the [`Response`], or to an error if the action timed out, was
/// rejected, or the connection was lost first.
#[derive(Debug)]
pub struct PendingResponse {
    action_id: String,
    rx: oneshot::Receiver<AmiResult<Response>>,
}

impl PendingResponse {
    pub(crate) fn new(action_id: String, rx: oneshot::Receiver<AmiResult<Response>>) -> Self {
        Self { action_id, rx }
    }

    /// Identifier embedded in the request.
    pub fn action_id(&self) -> &str {
        &self.action_id
    }
}

impl Future for PendingResponse {
    type Output = AmiResult<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(AmiError::ConnectionClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Whether the first reply announces that more messages follow.
fn announces_list(first: &Message, async_originate: bool) -> bool {
    if first
        .header(ManagerHeader::EventList)
        .is_some_and(|v| v.eq_ignore_ascii_case("start"))
    {
        return true;
    }
    if first
        .header(ManagerHeader::SubEvent)
        .is_some_and(|v| v.eq_ignore_ascii_case("start"))
    {
        return true;
    }
    let text = first
        .message_text()
        .unwrap_or("")
        .to_ascii_lowercase();
    text.contains("will follow")
        || (text.starts_with("added") && text.ends_with("to queue"))
        || (async_originate && text.ends_with("successfully queued"))
}

/// Whether `message` terminates a list.
fn ends_list(message: &Message, is_first: bool) -> bool {
    if let Some(event) = message.event_name() {
        let event = event.to_ascii_lowercase();
        if event.ends_with("complete") || event == "asyncagiexec" {
            return true;
        }
    }
    if message
        .header(ManagerHeader::EventList)
        .is_some_and(|v| v.eq_ignore_ascii_case("complete"))
    {
        return true;
    }
    if message
        .header(ManagerHeader::SubEvent)
        .is_some_and(|v| v.eq_ignore_ascii_case("end") || v.eq_ignore_ascii_case("exec"))
    {
        return true;
    }
    if message.has_end_command() {
        return true;
    }
    match message.response() {
        // A later message with a status is the final outcome (OriginateResponse).
        Some(_) if !is_first => true,
        // A rejected list request gets no items.
        Some(_) => !message.is_success(),
        None => false,
    }
}

/// An action registered in a connection's pending table.
pub(crate) struct PendingAction {
    name: String,
    as_list: bool,
    async_originate: bool,
    multi: bool,
    responses: Vec<Message>,
    tx: oneshot::Sender<AmiResult<Response>>,
    pub(crate) timeout_key: Option<delay_queue::Key>,
}

impl PendingAction {
    pub(crate) fn new(action: &Action, tx: oneshot::Sender<AmiResult<Response>>) -> Self {
        Self {
            name: action
                .name
                .clone(),
            as_list: action.as_list,
            async_originate: action.is_async_originate(),
            multi: action.as_list,
            responses: Vec::new(),
            tx,
            timeout_key: None,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Append a correlated message; `true` once the action is complete.
    pub(crate) fn accumulate(&mut self, message: Message) -> bool {
        let is_first = self
            .responses
            .is_empty();
        if is_first {
            self.multi = self.as_list || announces_list(&message, self.async_originate);
        }
        let done = !self.multi || ends_list(&message, is_first);
        self.responses
            .push(message);
        done
    }

    /// Resolve the handle with what was accumulated.
    pub(crate) fn complete(mut self) {
        let response = if self.multi {
            Response::List(self.responses)
        } else {
            match self
                .responses
                .drain(..)
                .next()
            {
                Some(first) => Response::Single(first),
                None => Response::List(Vec::new()),
            }
        };
        let _ = self
            .tx
            .send(Ok(response));
    }

    /// Fail the handle.
    pub(crate) fn fail(self, error: AmiError) {
        let _ = self
            .tx
            .send(Err(error));
    }
}
