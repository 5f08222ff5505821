//! Top-level AMI client: connection lifecycle, login, keepalive and events

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::{
    action::{Action, ActionIdGenerator, PendingResponse, Response},
    config::ManagerConfig,
    connection::{self, ConnectionHandle, ConnectionStatus},
    error::{AmiError, AmiResult, CallbackError},
    message::Message,
    registry::{EventRegistry, Registrar},
    transport::{BoxedStream, Connector, TcpConnector},
};

/// Login progress of the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthState {
    /// No login attempted (no credentials, or not connected)
    Unauthenticated,
    /// `Login` sent, reply outstanding
    Pending,
    /// Server accepted the credentials
    Authenticated,
    /// Server refused the credentials, or the login never completed
    Rejected,
}

struct ManagerInner {
    config: ManagerConfig,
    connector: Arc<dyn Connector>,
    runtime: Handle,
    registry: EventRegistry,
    ids: Arc<ActionIdGenerator>,
    connection: Mutex<Option<ConnectionHandle>>,
    auth: watch::Sender<AuthState>,
    generation: AtomicU64,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        if let Some(connection) = self
            .connection
            .get_mut()
            .take()
        {
            connection.close();
        }
    }
}

/// AMI client handle (Clone + Send)
///
/// Clones share one connection, one pending table and one event registry.
/// After a loss the manager reconnects on its own, logging in again when
/// credentials are configured, until [`close`](Self::close) is called.
///
/// ```rust,no_run
/// use asterisk_ami_tokio::{Action, Manager, ManagerConfig, Message};
///
/// # async fn example() -> Result<(), asterisk_ami_tokio::AmiError> {
/// let config = ManagerConfig::new("127.0.0.1", 5038).with_credentials("admin", "secret");
/// let manager = Manager::new(config)?;
///
/// manager.register_event("Peer*", |event: &Message, _: &Manager| {
///     println!("{:?}: {:?}", event.event_name(), event.header("Peer"));
///     Ok(())
/// })?;
///
/// if manager.connect().await && manager.wait_for_login().await {
///     let pong = manager.send_action(Action::ping())?.await?;
///     assert!(pong.is_success());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Manager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("host", &self.inner.config.host)
            .field("port", &self.inner.config.port)
            .field("status", &self.status())
            .field("auth", &self.auth_state())
            .finish()
    }
}

/// Non-owning reference held by connection tasks.
#[derive(Clone)]
pub(crate) struct WeakManager(Weak<ManagerInner>);

impl WeakManager {
    pub(crate) fn upgrade(&self) -> Option<Manager> {
        self.0
            .upgrade()
            .map(|inner| Manager { inner })
    }
}

/// Builder for [`Manager`] with a custom transport or runtime.
pub struct ManagerBuilder {
    config: ManagerConfig,
    connector: Option<Arc<dyn Connector>>,
    runtime: Option<Handle>,
}

impl std::fmt::Debug for ManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerBuilder")
            .field("config", &self.config)
            .field("custom_connector", &self.connector.is_some())
            .field("runtime", &self.runtime.is_some())
            .finish()
    }
}

impl ManagerBuilder {
    /// Start from a configuration.
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            connector: None,
            runtime: None,
        }
    }

    /// Replace the default TCP/TLS transport factory.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Runtime that connection tasks and timers are spawned on.
    ///
    /// Defaults to the runtime `build` is called from.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the manager. Nothing connects until [`Manager::connect`].
    pub fn build(self) -> AmiResult<Manager> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| AmiError::NoRuntime)?,
        };
        let (auth, _) = watch::channel(AuthState::Unauthenticated);
        Ok(Manager {
            inner: Arc::new(ManagerInner {
                config: self.config,
                connector: self
                    .connector
                    .unwrap_or_else(|| Arc::new(TcpConnector)),
                runtime,
                registry: EventRegistry::new(),
                ids: Arc::new(ActionIdGenerator::new()),
                connection: Mutex::new(None),
                auth,
                generation: AtomicU64::new(0),
            }),
        })
    }
}

impl Manager {
    /// Manager with the default transport on the current runtime.
    pub fn new(config: ManagerConfig) -> AmiResult<Self> {
        ManagerBuilder::new(config).build()
    }

    /// Start building a manager.
    pub fn builder(config: ManagerConfig) -> ManagerBuilder {
        ManagerBuilder::new(config)
    }

    /// Configuration in use.
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Event subscriptions.
    pub fn registry(&self) -> &EventRegistry {
        &self.inner.registry
    }

    fn downgrade(&self) -> WeakManager {
        WeakManager(Arc::downgrade(&self.inner))
    }

    fn generation(&self) -> u64 {
        self.inner
            .generation
            .load(Ordering::Acquire)
    }

    fn current_connection(&self) -> Option<ConnectionHandle> {
        self.inner
            .connection
            .lock()
            .clone()
    }

    /// Open a connection, replacing any previous one.
    ///
    /// Resolves to `true` once the transport is up. On failure the error is
    /// logged, a retry is scheduled after `reconnect_delay_ms`, and the
    /// future resolves to `false`. Login, when credentials are configured,
    /// continues in the background; see [`wait_for_login`](Self::wait_for_login).
    pub fn connect(&self) -> BoxFuture<'static, bool> {
        let manager = self.clone();
        async move {
            manager
                .connect_inner()
                .await
        }
        .boxed()
    }

    async fn connect_inner(&self) -> bool {
        let config = &self.inner.config;
        let started = self.generation();
        info!("[CONNECT] Connecting to Asterisk at {}:{}", config.host, config.port);

        let stream = match self
            .inner
            .connector
            .connect(config)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    "[CONNECT] Connection to {}:{} failed: {}",
                    config.host, config.port, e
                );
                if !self.is_connected() {
                    self.schedule_reconnect(started);
                }
                return false;
            }
        };

        // A close() or another connect() won while we were connecting.
        if self
            .inner
            .generation
            .compare_exchange(started, started + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("[CONNECT] Superseded while connecting, dropping stream");
            return false;
        }

        self.attach(stream, started + 1);
        true
    }

    fn attach(&self, stream: BoxedStream, generation: u64) {
        let config = &self.inner.config;
        let handle = connection::spawn(
            stream,
            config.encoding,
            generation,
            self.downgrade(),
            &self.inner.runtime,
        );

        let previous = self
            .inner
            .connection
            .lock()
            .replace(handle.clone());
        if let Some(previous) = previous {
            previous.close();
        }
        info!(
            "[CONNECT] Connected to {}:{} (generation {})",
            config.host, config.port, generation
        );

        self.inner
            .auth
            .send_replace(AuthState::Unauthenticated);
        if let (Some(username), Some(secret)) = (&config.username, &config.secret) {
            self.start_login(&handle, username, secret);
        }
        self.start_keepalive(&handle);
    }

    fn start_login(&self, handle: &ConnectionHandle, username: &str, secret: &str) {
        let generation = handle.generation();
        let pending = Action::login(username, secret).and_then(|action| {
            handle.send_action(&action, self.inner.ids.next_id(), self.inner.config.action_timeout())
        });
        let pending = match pending {
            Ok(pending) => pending,
            Err(e) => {
                warn!("Could not send login: {}", e);
                self.inner
                    .auth
                    .send_replace(AuthState::Rejected);
                return;
            }
        };

        debug!("Sending login for user {}", username);
        self.inner
            .auth
            .send_replace(AuthState::Pending);
        let manager = self.clone();
        self.inner
            .runtime
            .spawn(async move {
                let result = pending.await;
                if manager.generation() != generation {
                    trace!("Ignoring login result from stale connection");
                    return;
                }
                match result {
                    Ok(response) => {
                        manager.login(&response);
                    }
                    // connection_lost owns the auth state from here
                    Err(e) if e.is_connection_error() => {
                        debug!("Login interrupted: {}", e);
                    }
                    Err(e) => {
                        warn!("Login did not complete: {}", e);
                        manager
                            .inner
                            .auth
                            .send_replace(AuthState::Rejected);
                    }
                }
            });
    }

    fn start_keepalive(&self, handle: &ConnectionHandle) {
        let Some(interval) = self
            .inner
            .config
            .ping_interval()
        else {
            return;
        };
        let handle = handle.clone();
        let ids = self
            .inner
            .ids
            .clone();
        self.inner
            .runtime
            .spawn(async move {
                let cancel = handle
                    .cancel_token()
                    .clone();
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }
                    trace!("Sending keepalive ping");
                    // One ping in flight at a time, answered within one interval.
                    let result = match handle.send_action(&Action::ping(), ids.next_id(), Some(interval)) {
                        Ok(pending) => pending.await,
                        Err(e) => Err(e),
                    };
                    match result {
                        Ok(_) => {}
                        Err(AmiError::Timeout { timeout_ms }) => {
                            warn!("Keepalive ping unanswered after {}ms", timeout_ms);
                            handle.abort("keepalive ping timed out");
                            break;
                        }
                        Err(e) => {
                            debug!("Keepalive stopped: {}", e);
                            break;
                        }
                    }
                }
            });
    }

    /// Called by a connection task after an unrequested loss.
    pub(crate) fn connection_lost(&self, generation: u64) {
        if self.generation() != generation {
            return;
        }
        warn!(
            "Connection to {}:{} lost, reconnecting in {}ms",
            self.inner.config.host, self.inner.config.port, self.inner.config.reconnect_delay_ms
        );
        self.inner
            .auth
            .send_replace(AuthState::Unauthenticated);
        self.schedule_reconnect(generation);
    }

    /// Reconnect after the configured delay unless the generation moves on.
    fn schedule_reconnect(&self, generation: u64) {
        let manager = self.downgrade();
        let delay = self
            .inner
            .config
            .reconnect_delay();
        self.inner
            .runtime
            .spawn(async move {
                tokio::time::sleep(delay).await;
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                if manager.generation() != generation {
                    trace!("Reconnect cancelled");
                    return;
                }
                if manager.is_connected() {
                    trace!("Already connected, skipping reconnect");
                    return;
                }
                manager
                    .connect()
                    .await;
            });
    }

    /// Close the connection and cancel pending reconnects. Idempotent.
    ///
    /// Pending actions fail with [`AmiError::ConnectionClosed`].
    pub fn close(&self) {
        self.inner
            .generation
            .fetch_add(1, Ordering::AcqRel);
        // Keep the closed handle so status() reports the reason.
        let connection = self.current_connection();
        if let Some(connection) = connection {
            connection.close();
        }
        self.inner
            .auth
            .send_replace(AuthState::Unauthenticated);
    }

    /// Send an action and return its completion handle.
    ///
    /// An id is generated unless the action carries one, and the configured
    /// default timeout applies unless the action sets its own.
    pub fn send_action(&self, action: Action) -> AmiResult<PendingResponse> {
        let connection = self
            .current_connection()
            .ok_or(AmiError::NotConnected)?;
        let action_id = match action.action_id() {
            Some(id) => id.to_string(),
            None => self
                .inner
                .ids
                .next_id(),
        };
        connection.send_action(&action, action_id, self.inner.config.action_timeout())
    }

    /// Run a CLI command through `Action: Command`.
    pub fn send_command(&self, command: &str) -> AmiResult<PendingResponse> {
        self.send_action(Action::command(command)?)
    }

    /// Queue an AGI command on a channel in AsyncAGI.
    ///
    /// Resolves as a list ending with the exec event; use
    /// [`Response::agi_result`] for the decoded result line.
    pub fn send_agi_command(&self, channel: &str, command: &str) -> AmiResult<PendingResponse> {
        self.send_action(Action::agi(channel, command)?)
    }

    /// Subscribe `callback` to events whose name matches the glob `pattern`.
    ///
    /// Returns the stored callback.
    pub fn register_event<F>(&self, pattern: &str, callback: F) -> AmiResult<Arc<F>>
    where
        F: Fn(&Message, &Manager) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        let callback = self
            .inner
            .registry
            .register(pattern, callback)?;
        debug!("Registered event pattern '{}'", pattern);
        Ok(callback)
    }

    /// Registration deferred until a callback is supplied.
    ///
    /// ```rust,no_run
    /// # fn example(manager: &asterisk_ami_tokio::Manager) -> Result<(), asterisk_ami_tokio::AmiError> {
    /// use asterisk_ami_tokio::{Manager, Message};
    ///
    /// let on_hangup = manager
    ///     .event_registrar("Hangup")
    ///     .register(|event: &Message, _: &Manager| {
    ///         println!("hangup on {:?}", event.header("Channel"));
    ///         Ok(())
    ///     })?;
    /// # let _ = on_hangup;
    /// # Ok(())
    /// # }
    /// ```
    pub fn event_registrar(&self, pattern: &str) -> Registrar {
        Registrar::new(self.clone(), pattern)
    }

    /// Invoke every matching callback for `event`.
    ///
    /// See [`EventRegistry::dispatch`].
    pub fn dispatch(&self, event: &Message) -> AmiResult<Vec<String>> {
        self.inner
            .registry
            .dispatch(event, self)
    }

    /// Record the outcome of a login reply; returns whether it succeeded.
    pub fn login(&self, response: &Response) -> bool {
        let accepted = response.is_success();
        if accepted {
            info!("Authentication accepted");
        } else {
            warn!(
                "Authentication rejected: {}",
                response
                    .header("Message")
                    .unwrap_or("no reason given")
            );
        }
        self.inner
            .auth
            .send_replace(if accepted {
                AuthState::Authenticated
            } else {
                AuthState::Rejected
            });
        accepted
    }

    /// Whether the server accepted our credentials.
    pub fn authenticated(&self) -> bool {
        self.auth_state() == AuthState::Authenticated
    }

    /// Current login state.
    pub fn auth_state(&self) -> AuthState {
        *self
            .inner
            .auth
            .borrow()
    }

    /// Wait for an outstanding login to settle; returns `authenticated()`.
    pub async fn wait_for_login(&self) -> bool {
        let mut rx = self
            .inner
            .auth
            .subscribe();
        let authenticated = match rx
            .wait_for(|state| *state != AuthState::Pending)
            .await
        {
            Ok(state) => *state == AuthState::Authenticated,
            Err(_) => false,
        };
        authenticated
    }

    /// Current connection status snapshot.
    pub fn status(&self) -> ConnectionStatus {
        self.current_connection()
            .map(|c| c.status())
            .unwrap_or(ConnectionStatus::Idle)
    }

    /// Whether a live connection exists.
    pub fn is_connected(&self) -> bool {
        self.current_connection()
            .is_some_and(|c| c.is_connected())
    }
}
