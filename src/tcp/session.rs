//! Persistent TCP control session: connect, auto-discovery fallback,
//! reconnect policy, inbound dispatch and the event surface.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::EiscpCodec;
use crate::message::Message;
use crate::types::{
    ConnectionState, EiscpError, Event, ReceivedMessage, Result, DEFAULT_PORT,
    DEFAULT_RECONNECT_DELAY, DEFAULT_SEND_DELAY,
};
use crate::udp::discovery::{discover, DiscoveryOptions};

use super::queue::{spawn_worker, QueueItem};

/// Capacity of the broadcast event channel; slow subscribers lag, they do
/// not block the session.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Session configuration. Unset host/model are resolved through discovery
/// on connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Device address. `None` means discover one on the local segment.
    pub host: Option<String>,
    /// Control port.
    pub port: u16,
    /// Device model. `None` means resolve it via targeted discovery.
    pub model: Option<String>,
    /// Re-attempt the connection after a close.
    pub reconnect: bool,
    /// Wait between a close and the reconnect attempt.
    pub reconnect_delay: Duration,
    /// Mandatory pause between consecutive outbound commands.
    pub send_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            model: None,
            reconnect: false,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            send_delay: DEFAULT_SEND_DELAY,
        }
    }
}

/// Per-call connection options; only the `Some` fields overwrite the stored
/// [`SessionConfig`].
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub model: Option<String>,
    pub reconnect: Option<bool>,
    pub reconnect_delay: Option<Duration>,
    pub send_delay: Option<Duration>,
}

impl ConnectOptions {
    /// Options pinned to a known host.
    pub fn host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Self::default()
        }
    }
}

impl SessionConfig {
    fn merge(&mut self, options: ConnectOptions) {
        if let Some(host) = options.host {
            self.host = Some(host);
        }
        if let Some(port) = options.port {
            self.port = port;
        }
        if let Some(model) = options.model {
            self.model = Some(model);
        }
        if let Some(reconnect) = options.reconnect {
            self.reconnect = reconnect;
        }
        if let Some(delay) = options.reconnect_delay {
            self.reconnect_delay = delay;
        }
        if let Some(delay) = options.send_delay {
            self.send_delay = delay;
        }
    }
}

/// State shared between the session task, the queue worker and the handle.
pub(crate) struct Shared {
    pub(crate) config: Mutex<SessionConfig>,
    state: Mutex<ConnectionState>,
    /// Write half of the active transport; `None` while disconnected. The
    /// queue worker is its only writer-side user.
    pub(crate) writer: tokio::sync::Mutex<Option<FramedWrite<OwnedWriteHalf, EiscpCodec>>>,
    /// Cancels the read loop of the current connection only.
    conn_cancel: Mutex<Option<CancellationToken>>,
    events: broadcast::Sender<Event>,
    /// Per-command-code subscribers; closed receivers are pruned on dispatch.
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<String>>>>,
}

impl Shared {
    pub(crate) fn emit(&self, event: Event) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn send_delay(&self) -> Duration {
        self.config.lock().unwrap().send_delay
    }

    /// Cancel the current connection's read loop, if any.
    pub(crate) fn cancel_connection(&self) {
        if let Some(token) = self.conn_cancel.lock().unwrap().take() {
            token.cancel();
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }

    fn dispatch(&self, host: &str, port: u16, model: Option<&str>, text: String) {
        let message = match Message::parse(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "ignoring malformed inbound message");
                self.emit(Event::Debug(format!(
                    "ignoring malformed inbound message {text:?}"
                )));
                return;
            }
        };
        debug!(code = %message.code, argument = %message.argument, "received");

        self.emit(Event::Data(ReceivedMessage {
            raw: text,
            code: message.code.clone(),
            argument: message.argument.clone(),
            host: host.to_string(),
            port,
            model: model.map(str::to_string),
        }));

        let mut subscribers = self.subscribers.lock().unwrap();
        if let Some(list) = subscribers.get_mut(&message.code) {
            list.retain(|tx| tx.send(message.argument.clone()).is_ok());
            if list.is_empty() {
                subscribers.remove(&message.code);
            }
        }
    }
}

/// An owned control session for one device.
///
/// The session is an explicit object with a guarded lifecycle: `connect`
/// while already connecting or connected is rejected instead of silently
/// stacking transports, and `disconnect` cancels the session task including
/// any pending reconnect timer.
pub struct EiscpSession {
    shared: Arc<Shared>,
    queue: mpsc::UnboundedSender<QueueItem>,
    session_cancel: Mutex<Option<CancellationToken>>,
}

impl Default for EiscpSession {
    fn default() -> Self {
        Self::new()
    }
}

impl EiscpSession {
    /// Create a disconnected session with default configuration.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared {
            config: Mutex::new(SessionConfig::default()),
            state: Mutex::new(ConnectionState::Disconnected),
            writer: tokio::sync::Mutex::new(None),
            conn_cancel: Mutex::new(None),
            events,
            subscribers: Mutex::new(HashMap::new()),
        });
        let queue = spawn_worker(shared.clone());
        Self {
            shared,
            queue,
            session_cancel: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock().unwrap()
    }

    /// Snapshot of the session configuration.
    pub fn config(&self) -> SessionConfig {
        self.shared.config.lock().unwrap().clone()
    }

    /// Subscribe to the session event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.events.subscribe()
    }

    /// Subscribe to the arguments of one command code, e.g. `"PWR"`.
    ///
    /// Every inbound message with that code delivers its argument to the
    /// returned channel; dropping the receiver unsubscribes.
    pub fn subscribe_code(&self, code: impl Into<String>) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared
            .subscribers
            .lock()
            .unwrap()
            .entry(code.into())
            .or_default()
            .push(tx);
        rx
    }

    /// Establish the session, resolving host and model via discovery when
    /// they are not configured.
    ///
    /// Returns `AlreadyConnected` if a session is connecting or connected;
    /// call [`disconnect`](Self::disconnect) first to replace it.
    pub async fn connect(&self, options: ConnectOptions) -> Result<()> {
        {
            let mut state = self.shared.state.lock().unwrap();
            if *state != ConnectionState::Disconnected {
                return Err(EiscpError::AlreadyConnected);
            }
            // Claim the session before any await point so concurrent
            // connect calls cannot stack transports.
            *state = ConnectionState::Connecting;
        }
        self.shared.config.lock().unwrap().merge(options);

        if let Err(e) = self.resolve_target().await {
            self.shared.set_state(ConnectionState::Disconnected);
            return Err(e);
        }

        let cancel = CancellationToken::new();
        *self.session_cancel.lock().unwrap() = Some(cancel.clone());
        tokio::spawn(run_session(self.shared.clone(), cancel));
        Ok(())
    }

    /// Fill in host, port and model through discovery when unset.
    async fn resolve_target(&self) -> Result<()> {
        let (host, model) = {
            let config = self.shared.config.lock().unwrap();
            (config.host.clone(), config.model.clone())
        };
        match (host, model) {
            (None, _) => {
                info!("no host configured, discovering");
                let devices = discover(DiscoveryOptions::default()).await?;
                let device = devices.into_iter().next().ok_or(EiscpError::NoDevicesFound)?;
                let mut config = self.shared.config.lock().unwrap();
                config.host = Some(device.host);
                config.port = device.port;
                config.model = Some(device.model);
            }
            (Some(host), None) => {
                info!(%host, "resolving model via targeted discovery");
                let devices = discover(DiscoveryOptions::for_host(host.as_str())).await?;
                let device = devices.into_iter().next().ok_or(EiscpError::NoDevicesFound)?;
                let mut config = self.shared.config.lock().unwrap();
                config.port = device.port;
                config.model = Some(device.model);
            }
            (Some(_), Some(_)) => {}
        }
        Ok(())
    }

    /// Tear the session down: close the transport, cancel any reconnect
    /// timer, and stay disconnected.
    pub fn disconnect(&self) {
        if let Some(cancel) = self.session_cancel.lock().unwrap().take() {
            cancel.cancel();
        }
    }

    /// Alias for [`disconnect`](Self::disconnect).
    pub fn close(&self) {
        self.disconnect();
    }

    /// Queue a raw command message and wait for its transmission.
    ///
    /// Completion acknowledges that the bytes were written and the
    /// inter-command delay elapsed; it says nothing about the device's
    /// reaction. Fails immediately with `NotConnected` when no session is
    /// established.
    pub async fn raw(&self, command: impl Into<String>) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.queue
            .send(QueueItem {
                raw: command.into(),
                ack,
            })
            .map_err(|_| EiscpError::QueueClosed)?;
        done.await.map_err(|_| EiscpError::QueueClosed)?
    }

    /// Queue a command given as code and argument, e.g. `("PWR", "01")`.
    ///
    /// No validation of the code against device models is performed.
    pub async fn command(&self, code: &str, argument: &str) -> Result<()> {
        self.raw(format!("{code}{argument}")).await
    }
}

impl Drop for EiscpSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// The session task: connect, pump inbound frames, tear down, maybe
/// reconnect.
async fn run_session(shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        let (host, port, model, reconnect, reconnect_delay) = {
            let config = shared.config.lock().unwrap();
            (
                config.host.clone().unwrap_or_default(),
                config.port,
                config.model.clone(),
                config.reconnect,
                config.reconnect_delay,
            )
        };

        shared.set_state(ConnectionState::Connecting);
        shared.emit(Event::Debug(format!("connecting to {host}:{port}")));
        info!(%host, port, "connecting");

        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            attempt = TcpStream::connect((host.as_str(), port)) => attempt,
        };

        match attempt {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                shared.set_state(ConnectionState::Connected);
                shared.emit(Event::Connect {
                    host: host.clone(),
                    port,
                    model: model.clone(),
                });
                info!(%host, port, "connected");

                let (read_half, write_half) = stream.into_split();
                *shared.writer.lock().await = Some(FramedWrite::new(write_half, EiscpCodec));
                let conn_cancel = cancel.child_token();
                *shared.conn_cancel.lock().unwrap() = Some(conn_cancel.clone());

                let mut frames = FramedRead::new(read_half, EiscpCodec);
                loop {
                    tokio::select! {
                        _ = conn_cancel.cancelled() => break,
                        next = frames.try_next() => match next {
                            Ok(Some(text)) => {
                                shared.dispatch(&host, port, model.as_deref(), text);
                            }
                            Ok(None) => {
                                info!(%host, "connection closed by device");
                                break;
                            }
                            Err(e) => {
                                error!(%host, error = %e, "read failed");
                                shared.emit(Event::Error(format!("read failed: {e}")));
                                break;
                            }
                        }
                    }
                }

                *shared.writer.lock().await = None;
                shared.cancel_connection();
                shared.set_state(ConnectionState::Disconnected);
                shared.emit(Event::Close);
            }
            Err(e) => {
                error!(%host, port, error = %e, "connect failed");
                shared.emit(Event::Error(format!("connect to {host}:{port} failed: {e}")));
                shared.set_state(ConnectionState::Disconnected);
                shared.emit(Event::Close);
            }
        }

        if cancel.is_cancelled() || !reconnect {
            break;
        }
        shared.emit(Event::Debug(format!(
            "reconnecting in {}ms",
            reconnect_delay.as_millis()
        )));
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(reconnect_delay) => {}
        }
    }

    shared.set_state(ConnectionState::Disconnected);
    debug!("session task finished");
}
