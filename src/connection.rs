//! Connection task: framing, response correlation and event routing

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, error, info, trace, warn};

use crate::{
    action::{Action, PendingAction, PendingResponse},
    constants::{MAX_ACTION_TIMEOUT_MS, SOCKET_BUF_SIZE},
    encoding::TextEncoding,
    error::{AmiError, AmiResult},
    manager::WeakManager,
    message::Message,
    protocol::AmiParser,
    transport::BoxedStream,
};

/// Connection status for the AMI client
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionStatus {
    /// No connection has been established yet.
    Idle,
    /// AMI session is active.
    Connected,
    /// AMI session ended.
    Disconnected(DisconnectReason),
}

/// Reason for disconnection
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// I/O or protocol error (io::Error is not Clone, so we store the message)
    IoError(String),
    /// Clean EOF on the connection
    ConnectionClosed,
    /// Client called close(), or the connection was replaced
    ClientRequested,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::IoError(msg) => write!(f, "I/O error: {}", msg),
            DisconnectReason::ConnectionClosed => write!(f, "connection closed"),
            DisconnectReason::ClientRequested => write!(f, "client requested disconnect"),
        }
    }
}

/// Work queued for the connection task.
enum Outbound {
    Send {
        action_id: String,
        wire: String,
        pending: PendingAction,
        timeout: Option<Duration>,
    },
    /// Drop the connection as if the transport failed.
    Abort { reason: String },
}

impl Outbound {
    fn fail(self, error: AmiError) {
        match self {
            Outbound::Send { pending, .. } => pending.fail(error),
            Outbound::Abort { .. } => {}
        }
    }
}

/// Handle to one connection generation (Clone + Send).
///
/// Actions are queued to the connection task, which owns both stream halves
/// and the pending table, so sending never waits on the socket.
#[derive(Clone)]
pub(crate) struct ConnectionHandle {
    generation: u64,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    cancel: CancellationToken,
    closed: Arc<AtomicBool>,
    status_rx: watch::Receiver<ConnectionStatus>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("generation", &self.generation)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl ConnectionHandle {
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Token cancelled when this generation ends.
    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Serialize `action` under `action_id` and queue it.
    pub(crate) fn send_action(
        &self,
        action: &Action,
        action_id: String,
        default_timeout: Option<Duration>,
    ) -> AmiResult<PendingResponse> {
        if !self.is_connected() {
            return Err(AmiError::NotConnected);
        }

        let wire = action.to_wire_format(&action_id)?;
        let (tx, rx) = oneshot::channel();
        let outbound = Outbound::Send {
            action_id: action_id.clone(),
            wire,
            pending: PendingAction::new(action, tx),
            timeout: action
                .timeout_duration()
                .or(default_timeout),
        };
        self.outbound_tx
            .send(outbound)
            .map_err(|_| AmiError::NotConnected)?;
        Ok(PendingResponse::new(action_id, rx))
    }

    /// End the connection with an I/O error so the loss path runs.
    pub(crate) fn abort(&self, reason: &str) {
        let _ = self
            .outbound_tx
            .send(Outbound::Abort {
                reason: reason.to_string(),
            });
    }

    /// Close the connection. Idempotent.
    pub(crate) fn close(&self) {
        if !self
            .closed
            .swap(true, Ordering::AcqRel)
        {
            info!("Client requested disconnect");
            self.cancel
                .cancel();
        }
    }

    /// Whether the connection is alive (not yet disconnected).
    pub(crate) fn is_connected(&self) -> bool {
        !self
            .closed
            .load(Ordering::Acquire)
            && matches!(
                *self
                    .status_rx
                    .borrow(),
                ConnectionStatus::Connected
            )
    }

    /// Current connection status snapshot.
    pub(crate) fn status(&self) -> ConnectionStatus {
        self.status_rx
            .borrow()
            .clone()
    }
}

/// Spawn the task for a freshly established stream.
pub(crate) fn spawn(
    stream: BoxedStream,
    encoding: TextEncoding,
    generation: u64,
    manager: WeakManager,
    runtime: &Handle,
) -> ConnectionHandle {
    let (reader, writer) = tokio::io::split(stream);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connected);
    let cancel = CancellationToken::new();
    let closed = Arc::new(AtomicBool::new(false));

    let task = ConnectionTask {
        reader,
        writer,
        parser: AmiParser::new(encoding),
        encoding,
        outbound_rx,
        pending: HashMap::new(),
        timeouts: DelayQueue::new(),
        cancel: cancel.clone(),
        manager: manager.clone(),
    };

    runtime.spawn(reader_loop(
        task,
        generation,
        manager,
        status_tx,
        closed.clone(),
    ));

    ConnectionHandle {
        generation,
        outbound_tx,
        cancel,
        closed,
        status_rx,
    }
}

/// Background connection loop
async fn reader_loop(
    task: ConnectionTask,
    generation: u64,
    manager: WeakManager,
    status_tx: watch::Sender<ConnectionStatus>,
    closed: Arc<AtomicBool>,
) {
    let result = std::panic::AssertUnwindSafe(task.run());
    let reason = match futures_util::FutureExt::catch_unwind(result).await {
        Ok(reason) => reason,
        Err(_) => {
            error!("connection task panicked");
            DisconnectReason::IoError("connection task panicked".to_string())
        }
    };

    closed.store(true, Ordering::Release);
    status_tx.send_replace(ConnectionStatus::Disconnected(reason.clone()));

    if reason != DisconnectReason::ClientRequested {
        if let Some(manager) = manager.upgrade() {
            manager.connection_lost(generation);
        }
    }
}

struct ConnectionTask {
    reader: ReadHalf<BoxedStream>,
    writer: WriteHalf<BoxedStream>,
    parser: AmiParser,
    encoding: TextEncoding,
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    pending: HashMap<String, PendingAction>,
    /// Action ids with their timeout in milliseconds
    timeouts: DelayQueue<(String, u64)>,
    cancel: CancellationToken,
    manager: WeakManager,
}

impl ConnectionTask {
    async fn run(mut self) -> DisconnectReason {
        let reason = self
            .serve()
            .await;
        self.fail_all();
        if reason == DisconnectReason::ClientRequested {
            let _ = self
                .writer
                .shutdown()
                .await;
        }
        reason
    }

    async fn serve(&mut self) -> DisconnectReason {
        let mut read_buffer = vec![0u8; SOCKET_BUF_SIZE];

        loop {
            // Drain complete blocks before touching the socket again
            while let Some(message) = self
                .parser
                .parse_message()
            {
                self.route(message);
            }

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    return DisconnectReason::ClientRequested;
                }

                outbound = self.outbound_rx.recv() => {
                    let Some(outbound) = outbound else {
                        debug!("All connection handles dropped, closing");
                        return DisconnectReason::ClientRequested;
                    };
                    match outbound {
                        Outbound::Send { action_id, wire, pending, timeout } => {
                            if let Err(e) = self.write(action_id, wire, pending, timeout).await {
                                warn!("Write error: {}", e);
                                return DisconnectReason::IoError(e.to_string());
                            }
                        }
                        Outbound::Abort { reason } => {
                            warn!("Dropping connection: {}", reason);
                            return DisconnectReason::IoError(reason);
                        }
                    }
                }

                read_result = self.reader.read(&mut read_buffer) => {
                    match read_result {
                        Ok(0) => {
                            info!("Connection closed (EOF)");
                            return DisconnectReason::ConnectionClosed;
                        }
                        Ok(n) => {
                            trace!("[RECV] Read {} bytes from socket", n);
                            if let Err(e) = self.parser.add_data(&read_buffer[..n]) {
                                warn!("Buffer error: {}", e);
                                return DisconnectReason::IoError(e.to_string());
                            }
                        }
                        Err(e) => {
                            warn!("Read error: {}", e);
                            return DisconnectReason::IoError(e.to_string());
                        }
                    }
                }

                Some(expired) = self.timeouts.next(), if !self.timeouts.is_empty() => {
                    let (action_id, timeout_ms) = expired.into_inner();
                    if let Some(pending) = self.pending.remove(&action_id) {
                        debug!("Action {} ({}) timed out after {}ms", pending.name(), action_id, timeout_ms);
                        pending.fail(AmiError::Timeout { timeout_ms });
                    }
                }
            }
        }
    }

    /// Register the action and write it out.
    async fn write(
        &mut self,
        action_id: String,
        wire: String,
        mut pending: PendingAction,
        timeout: Option<Duration>,
    ) -> AmiResult<()> {
        if self
            .pending
            .contains_key(&action_id)
        {
            warn!("Action id {} is already pending, rejecting", action_id);
            pending.fail(AmiError::DuplicateActionId { action_id });
            return Ok(());
        }

        debug!("Sending action: {} ({})", pending.name(), action_id);
        if let Some(timeout) = timeout {
            let timeout = timeout.min(Duration::from_millis(MAX_ACTION_TIMEOUT_MS));
            let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            pending.timeout_key = Some(
                self.timeouts
                    .insert((action_id.clone(), timeout_ms), timeout),
            );
        }
        self.pending
            .insert(action_id, pending);

        let bytes = self
            .encoding
            .encode(&wire);
        self.writer
            .write_all(&bytes)
            .await?;
        self.writer
            .flush()
            .await?;
        Ok(())
    }

    /// Deliver a message to its pending action, or dispatch it as an event.
    fn route(&mut self, message: Message) {
        let id = message
            .id()
            .map(str::to_string);
        if let Some(id) = id {
            if let Some(pending) = self
                .pending
                .get_mut(&id)
            {
                trace!("[RECV] Message for pending action {}", id);
                if pending.accumulate(message) {
                    self.resolve(&id);
                }
                return;
            }
        }

        if message.is_event() {
            let Some(manager) = self
                .manager
                .upgrade()
            else {
                return;
            };
            match manager.dispatch(&message) {
                Ok(patterns) if patterns.is_empty() => {
                    trace!("[RECV] No subscription for {:?}", message.event_name());
                }
                Ok(patterns) => {
                    trace!("[RECV] {:?} dispatched to {:?}", message.event_name(), patterns);
                }
                Err(e) => error!("Event dispatch failed: {}", e),
            }
        } else {
            trace!("[RECV] Discarding unroutable message: {:?}", message.id());
        }
    }

    fn resolve(&mut self, action_id: &str) {
        let Some(mut pending) = self
            .pending
            .remove(action_id)
        else {
            return;
        };
        if let Some(key) = pending
            .timeout_key
            .take()
        {
            self.cancel_timeout(&key);
        }
        debug!("Action {} ({}) complete", pending.name(), action_id);
        pending.complete();
    }

    fn cancel_timeout(&mut self, key: &delay_queue::Key) {
        self.timeouts
            .try_remove(key);
    }

    /// Fail everything still waiting, including actions queued but never written.
    fn fail_all(&mut self) {
        let failed = self
            .pending
            .len();
        for (_, pending) in self
            .pending
            .drain()
        {
            pending.fail(AmiError::ConnectionClosed);
        }
        self.timeouts
            .clear();

        self.outbound_rx
            .close();
        while let Ok(outbound) = self
            .outbound_rx
            .try_recv()
        {
            outbound.fail(AmiError::ConnectionClosed);
        }

        if failed > 0 {
            debug!("Failed {} pending actions on disconnect", failed);
        }
    }
}
