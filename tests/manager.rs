//! Manager tests against a scripted in-memory AMI peer.

use asterisk_ami_tokio::{
    Action, AmiError, AmiResult, AuthState, BoxedStream, CallbackError, ConnectionStatus,
    Connector, DisconnectReason, Manager, ManagerConfig, Message, Response,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf,
};

/// Hands out queued in-memory streams; refuses when none are left.
#[derive(Default)]
struct ScriptedConnector {
    streams: Mutex<VecDeque<DuplexStream>>,
    attempts: AtomicUsize,
}

impl ScriptedConnector {
    /// Queue a stream for the next connect and return the server side.
    fn accept_next(&self) -> Peer {
        let (client, server) = duplex(64 * 1024);
        self.streams
            .lock()
            .push_back(client);
        Peer::new(server)
    }

    fn attempts(&self) -> usize {
        self.attempts
            .load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _config: &ManagerConfig) -> AmiResult<BoxedStream> {
        self.attempts
            .fetch_add(1, Ordering::SeqCst);
        match self
            .streams
            .lock()
            .pop_front()
        {
            Some(stream) => Ok(Box::new(stream)),
            None => Err(AmiError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "no scripted peer",
            ))),
        }
    }
}

/// Server side of a scripted connection.
struct Peer {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl Peer {
    fn new(stream: DuplexStream) -> Self {
        let (reader, writer) = split(stream);
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Read one action block; `None` on EOF.
    async fn try_read_action(&mut self) -> Option<Message> {
        let mut block = String::new();
        loop {
            let mut line = String::new();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .unwrap();
            if n == 0 {
                return None;
            }
            if line == "\r\n" {
                return Message::parse(&block);
            }
            block.push_str(&line);
        }
    }

    async fn read_action(&mut self) -> Message {
        tokio::time::timeout(Duration::from_secs(30), self.try_read_action())
            .await
            .expect("timed out waiting for an action")
            .expect("client closed the stream")
    }

    /// Write one block from its lines.
    async fn send(&mut self, lines: &[&str]) {
        let mut block = lines.join("\r\n");
        block.push_str("\r\n\r\n");
        self.writer
            .write_all(block.as_bytes())
            .await
            .unwrap();
    }

    async fn send_banner(&mut self) {
        self.writer
            .write_all(b"Asterisk Call Manager/5.0.1\r\n")
            .await
            .unwrap();
    }
}

fn config() -> ManagerConfig {
    ManagerConfig {
        ping_interval_ms: 0,
        reconnect_delay_ms: 100,
        ..Default::default()
    }
}

fn manager_with(config: ManagerConfig) -> (Manager, Arc<ScriptedConnector>) {
    let connector = Arc::new(ScriptedConnector::default());
    let manager = Manager::builder(config)
        .connector(connector.clone())
        .build()
        .unwrap();
    (manager, connector)
}

async fn connected(config: ManagerConfig) -> (Manager, Peer, Arc<ScriptedConnector>) {
    let (manager, connector) = manager_with(config);
    let mut peer = connector.accept_next();
    assert!(manager
        .connect()
        .await);
    peer.send_banner()
        .await;
    (manager, peer, connector)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}

/// Round-trip a ping so everything the peer wrote before it has been routed.
async fn sync(manager: &Manager, peer: &mut Peer) {
    let pending = manager
        .send_action(Action::ping())
        .unwrap();
    let ping = peer
        .read_action()
        .await;
    let id = ping
        .action_id()
        .unwrap()
        .to_string();
    peer.send(&["Response: Success", &format!("ActionID: {}", id), "Ping: Pong"])
        .await;
    pending
        .await
        .unwrap();
}

#[tokio::test]
async fn ping_resolves_with_first_reply() {
    let (manager, mut peer, _) = connected(config()).await;
    assert_eq!(manager.status(), ConnectionStatus::Connected);

    let pending = manager
        .send_action(Action::ping())
        .unwrap();
    let action = peer
        .read_action()
        .await;
    assert_eq!(action.header("Action"), Some("Ping"));
    assert_eq!(action.action_id(), Some(pending.action_id()));
    assert!(pending
        .action_id()
        .starts_with("action/"));

    let id = pending
        .action_id()
        .to_string();
    peer.send(&[
        "Response: Success",
        &format!("ActionID: {}", id),
        "Ping: Pong",
        "Timestamp: 1463151785.497413",
    ])
    .await;

    let response = pending
        .await
        .unwrap();
    assert!(!response.is_list());
    assert!(response.is_success());
    assert_eq!(response.header("Ping"), Some("Pong"));
}

#[tokio::test]
async fn login_success_authenticates() {
    let (manager, mut peer, _) = connected(config().with_credentials("admin", "hunter2")).await;
    assert_eq!(manager.auth_state(), AuthState::Pending);

    let login = peer
        .read_action()
        .await;
    assert_eq!(login.header("Action"), Some("Login"));
    assert_eq!(login.header("Username"), Some("admin"));
    assert_eq!(login.header("Secret"), Some("hunter2"));
    let id = login
        .action_id()
        .unwrap()
        .to_string();
    peer.send(&[
        "Response: Success",
        &format!("ActionID: {}", id),
        "Message: Authentication accepted",
    ])
    .await;

    assert!(manager
        .wait_for_login()
        .await);
    assert!(manager.authenticated());
}

#[tokio::test]
async fn login_failure_is_not_an_error() {
    let (manager, mut peer, _) = connected(config().with_credentials("admin", "wrong")).await;

    let login = peer
        .read_action()
        .await;
    let id = login
        .action_id()
        .unwrap()
        .to_string();
    peer.send(&[
        "Response: Error",
        &format!("ActionID: {}", id),
        "Message: Authentication failed",
    ])
    .await;

    assert!(!manager
        .wait_for_login()
        .await);
    assert!(!manager.authenticated());
    assert_eq!(manager.auth_state(), AuthState::Rejected);
    assert!(manager.is_connected());
}

#[tokio::test]
async fn logoff_goodbye_is_success() {
    let (manager, mut peer, _) = connected(config()).await;

    let pending = manager
        .send_action(Action::logoff())
        .unwrap();
    let action = peer
        .read_action()
        .await;
    assert_eq!(action.header("Action"), Some("Logoff"));
    peer.send(&[
        "Response: Goodbye",
        &format!("ActionID: {}", pending.action_id()),
        "Message: Thanks for all the fish.",
    ])
    .await;

    assert!(pending
        .await
        .unwrap()
        .is_success());
}

#[tokio::test]
async fn queue_status_collects_list() {
    let (manager, mut peer, _) = connected(config()).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    manager
        .register_event("*", move |event: &Message, _: &Manager| {
            sink.lock()
                .push(
                    event
                        .event_name()
                        .unwrap_or_default()
                        .to_string(),
                );
            Ok(())
        })
        .unwrap();

    let pending = manager
        .send_action(Action::new("QueueStatus"))
        .unwrap();
    let action = peer
        .read_action()
        .await;
    assert_eq!(action.header("Action"), Some("QueueStatus"));
    let id = format!("ActionID: {}", pending.action_id());

    peer.send(&[
        "Response: Success",
        &id,
        "EventList: start",
        "Message: Queue status will follow",
    ])
    .await;
    peer.send(&["Event: QueueParams", &id, "Queue: support", "Calls: 1"])
        .await;
    for member in ["SIP/100", "SIP/101", "SIP/102", "SIP/103"] {
        peer.send(&["Event: QueueMember", &id, "Queue: support", &format!("Name: {}", member)])
            .await;
    }
    // Unrelated traffic interleaved with the list goes to callbacks.
    peer.send(&["Event: PeerStatus", "Peer: SIP/100", "PeerStatus: Reachable"])
        .await;
    peer.send(&["Event: QueueEntry", &id, "Queue: support", "Position: 1"])
        .await;
    peer.send(&["Event: QueueParams", &id, "Queue: sales", "Calls: 0"])
        .await;
    peer.send(&[
        "Event: QueueStatusComplete",
        &id,
        "EventList: Complete",
        "ListItems: 7",
    ])
    .await;

    let response = pending
        .await
        .unwrap();
    assert!(response.is_list());
    assert_eq!(response.len(), 9);
    assert!(response.is_success());
    assert_eq!(
        response.messages()[8].event_name(),
        Some("QueueStatusComplete")
    );
    assert_eq!(*seen.lock(), ["PeerStatus"]);
}

#[tokio::test]
async fn agi_command_returns_decoded_result() {
    let (manager, mut peer, _) = connected(config()).await;

    let pending = manager
        .send_agi_command("SIP/000000-00000a", "GET VARIABLE endpoint")
        .unwrap();
    let action = peer
        .read_action()
        .await;
    assert_eq!(action.header("Action"), Some("AGI"));
    assert_eq!(action.header("Channel"), Some("SIP/000000-00000a"));
    assert_eq!(action.header("Command"), Some("GET VARIABLE endpoint"));
    assert_eq!(action.command_id(), action.action_id());

    let id = pending
        .action_id()
        .to_string();
    peer.send(&[
        "Response: Success",
        &format!("ActionID: {}", id),
        "Message: Added AGI command to queue",
    ])
    .await;
    peer.send(&[
        "Event: AsyncAGIExec",
        "Privilege: agi,all",
        "Channel: SIP/000000-00000a",
        &format!("CommandID: {}", id),
        "Result: 200%20result%3D1%20(SIP%2F000000)%0A",
    ])
    .await;

    let response = pending
        .await
        .unwrap();
    assert_eq!(response.len(), 2);
    assert_eq!(
        response
            .agi_result()
            .as_deref(),
        Some("200 result=1 (SIP/000000)")
    );
}

#[tokio::test]
async fn originate_sync_is_single_response() {
    let (manager, mut peer, _) = connected(config()).await;

    let action = Action::new("Originate")
        .field("Channel", "Local/100@default")
        .unwrap()
        .field("Exten", "200")
        .unwrap()
        .field("Async", "false")
        .unwrap();
    let pending = manager
        .send_action(action)
        .unwrap();
    let sent = peer
        .read_action()
        .await;
    assert_eq!(sent.header("Async"), Some("false"));
    peer.send(&[
        "Response: Success",
        &format!("ActionID: {}", pending.action_id()),
        "Message: Originate successfully queued",
    ])
    .await;

    let response = pending
        .await
        .unwrap();
    assert!(!response.is_list());
    assert_eq!(
        response.header("Message"),
        Some("Originate successfully queued")
    );
}

#[tokio::test]
async fn events_dispatch_by_pattern() {
    let (manager, mut peer, _) = connected(config()).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    manager
        .register_event("Peer*", move |event: &Message, _: &Manager| {
            sink.lock()
                .push(
                    event
                        .header("Peer")
                        .unwrap_or_default()
                        .to_string(),
                );
            Ok(())
        })
        .unwrap();

    peer.send(&["Event: PeerStatus", "Peer: SIP/1000", "PeerStatus: Unregistered"])
        .await;
    peer.send(&["Event: NoPeerStatus", "Peer: SIP/2000"])
        .await;
    peer.send(&["Event: PeerStatus", "Peer: SIP/3000", "PeerStatus: Registered"])
        .await;
    sync(&manager, &mut peer).await;

    assert_eq!(*seen.lock(), ["SIP/1000", "SIP/3000"]);
}

#[tokio::test]
async fn callbacks_run_in_registration_order() {
    let (manager, _connector) = manager_with(config());
    let order = Arc::new(Mutex::new(Vec::new()));
    for tag in ["first", "second"] {
        let order = order.clone();
        manager
            .register_event("Hangup", move |_: &Message, _: &Manager| {
                order
                    .lock()
                    .push(tag);
                Ok(())
            })
            .unwrap();
    }

    let event = Message::parse("Event: Hangup\nChannel: SIP/1-0001").unwrap();
    let matched = manager
        .dispatch(&event)
        .unwrap();
    assert_eq!(matched, ["Hangup", "Hangup"]);
    assert_eq!(*order.lock(), ["first", "second"]);
}

#[tokio::test]
async fn registrar_returns_registered_callback() {
    let (manager, _connector) = manager_with(config());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let registrar = manager.event_registrar("Newchannel");
    assert_eq!(registrar.pattern(), "Newchannel");
    let callback = registrar
        .register(move |_: &Message, _: &Manager| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    let event = Message::parse("Event: Newchannel").unwrap();
    manager
        .dispatch(&event)
        .unwrap();
    (*callback)(&event, &manager).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(manager.registry().patterns(), ["Newchannel"]);
}

#[tokio::test]
async fn callback_error_aborts_dispatch() {
    let (manager, mut peer, _) = connected(config()).await;
    let later = Arc::new(AtomicUsize::new(0));
    let counter = later.clone();
    manager
        .register_event("Boom", |_: &Message, _: &Manager| -> Result<(), CallbackError> {
            Err("callback failed".into())
        })
        .unwrap();
    manager
        .register_event("B*", move |_: &Message, _: &Manager| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    let event = Message::parse("Event: Boom").unwrap();
    let Err(err) = manager.dispatch(&event) else {
        panic!("dispatch should fail");
    };
    assert!(matches!(err, AmiError::Callback { ref pattern, .. } if pattern == "Boom"));
    assert_eq!(later.load(Ordering::SeqCst), 0);

    // On the connection task the failure is logged and routing carries on.
    peer.send(&["Event: Boom"])
        .await;
    sync(&manager, &mut peer).await;
    assert!(manager.is_connected());
    assert_eq!(later.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn connection_loss_fails_pending_and_reconnects() {
    let (manager, mut peer, connector) = connected(config()).await;
    let mut next_peer = connector.accept_next();

    let pending = manager
        .send_action(Action::new("Status"))
        .unwrap();
    peer.read_action()
        .await;
    drop(peer);

    assert!(matches!(pending.await, Err(AmiError::ConnectionClosed)));
    assert_eq!(
        manager.status(),
        ConnectionStatus::Disconnected(DisconnectReason::ConnectionClosed)
    );
    assert!(matches!(
        manager.send_action(Action::ping()),
        Err(AmiError::NotConnected)
    ));

    wait_until(|| connector.attempts() == 2 && manager.is_connected()).await;
    next_peer
        .send_banner()
        .await;
    sync(&manager, &mut next_peer).await;
}

#[tokio::test(start_paused = true)]
async fn action_times_out() {
    let (manager, mut peer, _) = connected(config()).await;

    let pending = manager
        .send_action(Action::new("Status").timeout(Duration::from_millis(500)))
        .unwrap();
    let id = pending
        .action_id()
        .to_string();
    peer.read_action()
        .await;

    assert!(matches!(
        pending.await,
        Err(AmiError::Timeout { timeout_ms: 500 })
    ));

    // A late reply is discarded and the connection stays usable.
    peer.send(&["Response: Success", &format!("ActionID: {}", id)])
        .await;
    sync(&manager, &mut peer).await;
}

#[tokio::test(start_paused = true)]
async fn default_action_timeout_from_config() {
    let (manager, mut peer, _) = connected(ManagerConfig {
        action_timeout_ms: Some(250),
        ..config()
    })
    .await;

    let pending = manager
        .send_action(Action::ping())
        .unwrap();
    peer.read_action()
        .await;
    assert!(matches!(
        pending.await,
        Err(AmiError::Timeout { timeout_ms: 250 })
    ));
}

#[tokio::test(start_paused = true)]
async fn keepalive_sends_ping() {
    let (_manager, mut peer, _) = connected(ManagerConfig {
        ping_interval_ms: 1000,
        ..config()
    })
    .await;

    let start = tokio::time::Instant::now();
    let ping = peer
        .read_action()
        .await;
    assert_eq!(ping.header("Action"), Some("Ping"));
    assert!(start.elapsed() >= Duration::from_millis(1000));
    let id = ping
        .action_id()
        .unwrap()
        .to_string();
    peer.send(&["Response: Success", &format!("ActionID: {}", id), "Ping: Pong"])
        .await;

    let again = peer
        .read_action()
        .await;
    assert_eq!(again.header("Action"), Some("Ping"));
    assert_ne!(again.action_id(), ping.action_id());
}

#[tokio::test(start_paused = true)]
async fn unanswered_keepalive_drops_connection() {
    let (manager, mut peer, connector) = connected(ManagerConfig {
        ping_interval_ms: 1000,
        ..config()
    })
    .await;
    let mut next_peer = connector.accept_next();

    let ping = peer
        .read_action()
        .await;
    assert_eq!(ping.header("Action"), Some("Ping"));

    // No second ping is queued behind the unanswered one.
    assert!(peer
        .try_read_action()
        .await
        .is_none());
    wait_until(|| {
        manager.status()
            == ConnectionStatus::Disconnected(DisconnectReason::IoError(
                "keepalive ping timed out".into(),
            ))
    })
    .await;

    wait_until(|| connector.attempts() == 2 && manager.is_connected()).await;
    next_peer
        .send_banner()
        .await;
    sync(&manager, &mut next_peer).await;
}

#[tokio::test(start_paused = true)]
async fn replaced_connection_keepalive_stops() {
    let (manager, mut old_peer, connector) = connected(ManagerConfig {
        ping_interval_ms: 1000,
        ..config()
    })
    .await;
    let mut new_peer = connector.accept_next();

    tokio::time::sleep(Duration::from_millis(600)).await;
    let replaced_at = tokio::time::Instant::now();
    assert!(manager
        .connect()
        .await);

    // The old generation closes without ever pinging.
    assert!(old_peer
        .try_read_action()
        .await
        .is_none());

    let ping = new_peer
        .read_action()
        .await;
    assert_eq!(ping.header("Action"), Some("Ping"));
    assert!(replaced_at.elapsed() >= Duration::from_millis(1000));
}

#[tokio::test]
async fn oversized_action_timeout_is_clamped() {
    let (manager, mut peer, _) = connected(config()).await;

    let status = manager
        .send_action(Action::new("Status"))
        .unwrap();
    let long = manager
        .send_action(Action::ping().timeout(Duration::from_secs(3 * 365 * 86_400)))
        .unwrap();
    let status_id = peer
        .read_action()
        .await
        .action_id()
        .unwrap()
        .to_string();
    let ping_id = peer
        .read_action()
        .await
        .action_id()
        .unwrap()
        .to_string();

    peer.send(&["Response: Success", &format!("ActionID: {}", ping_id), "Ping: Pong"])
        .await;
    peer.send(&["Response: Success", &format!("ActionID: {}", status_id)])
        .await;
    assert!(long
        .await
        .unwrap()
        .is_success());
    assert!(status
        .await
        .unwrap()
        .is_success());
    assert_eq!(manager.status(), ConnectionStatus::Connected);
}

#[tokio::test]
async fn max_config_timeout_still_logs_in() {
    let (manager, mut peer, _) = connected(ManagerConfig {
        action_timeout_ms: Some(u64::MAX),
        ..config().with_credentials("admin", "hunter2")
    })
    .await;

    let login = peer
        .read_action()
        .await;
    let id = login
        .action_id()
        .unwrap()
        .to_string();
    peer.send(&["Response: Success", &format!("ActionID: {}", id)])
        .await;

    assert!(manager
        .wait_for_login()
        .await);
    assert!(manager.is_connected());
}

#[tokio::test]
async fn connection_loss_during_login_leaves_unauthenticated() {
    let (manager, mut peer, _) = connected(config().with_credentials("admin", "hunter2")).await;

    peer.read_action()
        .await;
    drop(peer);

    assert!(!manager
        .wait_for_login()
        .await);
    wait_until(|| !manager.is_connected()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.auth_state(), AuthState::Unauthenticated);
    manager.close();
}

#[tokio::test(start_paused = true)]
async fn failed_connect_keeps_live_connection() {
    let (manager, mut peer, connector) = connected(config()).await;

    let pending = manager
        .send_action(Action::new("Status"))
        .unwrap();
    let id = peer
        .read_action()
        .await
        .action_id()
        .unwrap()
        .to_string();

    assert!(!manager
        .connect()
        .await);
    assert_eq!(connector.attempts(), 2);
    let _spare = connector.accept_next();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(connector.attempts(), 2);
    assert!(manager.is_connected());

    peer.send(&["Response: Success", &format!("ActionID: {}", id)])
        .await;
    assert!(pending
        .await
        .unwrap()
        .is_success());
}

#[tokio::test(start_paused = true)]
async fn connect_failure_schedules_retry() {
    let (manager, connector) = manager_with(config());

    assert!(!manager
        .connect()
        .await);
    assert_eq!(connector.attempts(), 1);
    assert_eq!(manager.status(), ConnectionStatus::Idle);

    let mut peer = connector.accept_next();
    wait_until(|| manager.is_connected()).await;
    assert_eq!(connector.attempts(), 2);
    sync(&manager, &mut peer).await;
}

#[tokio::test(start_paused = true)]
async fn close_is_idempotent_and_stops_reconnect() {
    let (manager, mut peer, connector) = connected(config()).await;

    let pending = manager
        .send_action(Action::new("Status"))
        .unwrap();
    peer.read_action()
        .await;

    manager.close();
    manager.close();

    assert!(matches!(pending.await, Err(AmiError::ConnectionClosed)));
    assert!(peer
        .try_read_action()
        .await
        .is_none());
    wait_until(|| {
        manager.status() == ConnectionStatus::Disconnected(DisconnectReason::ClientRequested)
    })
    .await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(manager.auth_state(), AuthState::Unauthenticated);
}

#[tokio::test]
async fn close_without_connection() {
    let (manager, connector) = manager_with(config());
    manager.close();
    manager.close();
    assert_eq!(connector.attempts(), 0);
    assert_eq!(manager.status(), ConnectionStatus::Idle);
}

#[tokio::test]
async fn duplicate_action_id_rejected() {
    let (manager, mut peer, _) = connected(config()).await;

    let first = manager
        .send_action(
            Action::ping()
                .with_action_id("dup")
                .unwrap(),
        )
        .unwrap();
    let second = manager
        .send_action(
            Action::ping()
                .with_action_id("dup")
                .unwrap(),
        )
        .unwrap();
    assert_eq!(second.action_id(), "dup");

    assert!(matches!(
        second.await,
        Err(AmiError::DuplicateActionId { ref action_id }) if action_id == "dup"
    ));

    let sent = peer
        .read_action()
        .await;
    assert_eq!(sent.action_id(), Some("dup"));
    peer.send(&["Response: Success", "ActionID: dup", "Ping: Pong"])
        .await;
    let response: Response = first
        .await
        .unwrap();
    assert!(response.is_success());
}

#[tokio::test]
async fn send_before_connect_fails() {
    let (manager, _connector) = manager_with(config());
    assert!(matches!(
        manager.send_action(Action::ping()),
        Err(AmiError::NotConnected)
    ));
    assert!(matches!(
        manager.send_command("core show version"),
        Err(AmiError::NotConnected)
    ));
}

#[tokio::test]
async fn reconnect_replaces_connection() {
    let (manager, mut old_peer, connector) = connected(config()).await;
    let mut new_peer = connector.accept_next();

    assert!(manager
        .connect()
        .await);
    assert!(old_peer
        .try_read_action()
        .await
        .is_none());
    sync(&manager, &mut new_peer).await;
}
