//! Socket connection manager.
//!
//! One manager owns at most one live socket. A background driver task runs
//! `Connecting → Open → Closed` and schedules reconnects with exponential
//! backoff until `disconnect()` is called, the attempt budget runs out, or
//! the server reports that a newer connection replaced this one.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Once, PoisonError, Weak};

use futures_util::{SinkExt, StreamExt};
use progress_core::{Classified, EventEmitter, HandlerId, InboundMessage, OutboundMessage};
use progress_logging::{progress_debug, progress_error, progress_info, progress_warn};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffPolicy;
use crate::types::{
    ConnectionError, ConnectionEvent, ConnectionEventKind, ConnectionState, DisconnectReason,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub backoff: BackoffPolicy,
    /// Reconnects scheduled without an intervening successful open before a
    /// terminal error is raised.
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            max_reconnect_attempts: 5,
        }
    }
}

struct Shared {
    settings: ConnectionSettings,
    state: Mutex<ConnectionState>,
    listeners: Mutex<EventEmitter<ConnectionEvent>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    cancel: Mutex<Option<CancellationToken>>,
    /// Bumped whenever a driver is started; replaced drivers compare against
    /// it before touching state or emitting.
    generation: AtomicU64,
    attempt: AtomicU32,
    superseded: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `wss://` handshakes need a process-wide rustls crypto provider.
fn install_tls_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            progress_debug!("TLS crypto provider already installed");
        }
    });
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = lock(&self.state);
        if *state != next {
            progress_debug!("Connection state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        let handlers = lock(&self.listeners).snapshot(event.kind());
        for handler in handlers {
            handler(&event);
        }
    }
}

/// Handle to the connection; clones share one socket and one subscriber
/// list.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

/// Non-owning handle, for handlers that need to call back into the manager
/// without keeping it alive.
#[derive(Clone)]
pub struct WeakConnectionManager {
    shared: Weak<Shared>,
}

impl WeakConnectionManager {
    pub fn upgrade(&self) -> Option<ConnectionManager> {
        self.shared.upgrade().map(|shared| ConnectionManager { shared })
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(ConnectionSettings::default())
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("reconnect_attempt", &self.reconnect_attempt())
            .field("superseded", &self.is_superseded())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                state: Mutex::new(ConnectionState::Idle),
                listeners: Mutex::new(EventEmitter::new()),
                outbound: Mutex::new(None),
                cancel: Mutex::new(None),
                generation: AtomicU64::new(0),
                attempt: AtomicU32::new(0),
                superseded: AtomicBool::new(false),
            }),
        }
    }

    pub fn downgrade(&self) -> WeakConnectionManager {
        WeakConnectionManager {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Starts the driver for `endpoint_url` on the current tokio runtime,
    /// replacing any running driver. Never fails: connect errors are
    /// reported through `Error` events and retried.
    pub fn initialize(&self, endpoint_url: &str) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                progress_error!("Cannot start connection to {}: {}", endpoint_url, err);
                self.shared
                    .emit(ConnectionEvent::Error(ConnectionError::NoRuntime));
                return;
            }
        };

        install_tls_provider();
        let cancel = CancellationToken::new();
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(previous) = lock(&self.shared.cancel).replace(cancel.clone()) {
            progress_info!("Replacing running connection driver");
            previous.cancel();
        }
        lock(&self.shared.outbound).take();
        self.shared.attempt.store(0, Ordering::SeqCst);
        self.shared.superseded.store(false, Ordering::SeqCst);
        self.shared.set_state(ConnectionState::Connecting);

        let driver = Driver {
            shared: Arc::clone(&self.shared),
            generation,
            url: endpoint_url.to_string(),
            cancel,
        };
        runtime.spawn(driver.run());
    }

    /// Registers `handler` for one event kind. Handlers run synchronously,
    /// in registration order, on the driver task.
    pub fn on(
        &self,
        kind: ConnectionEventKind,
        handler: impl Fn(&ConnectionEvent) + Send + Sync + 'static,
    ) -> HandlerId {
        lock(&self.shared.listeners).on(kind, handler)
    }

    pub fn off(&self, kind: ConnectionEventKind, id: HandlerId) -> bool {
        lock(&self.shared.listeners).off(kind, id)
    }

    /// Forwards every lifecycle event into a channel.
    pub fn event_stream(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        for kind in ConnectionEventKind::ALL {
            let tx = tx.clone();
            self.on(kind, move |event| {
                let _ = tx.send(event.clone());
            });
        }
        rx
    }

    /// Serializes `payload` as JSON and hands it to the open socket.
    ///
    /// While the connection is not open the payload is logged and dropped;
    /// nothing is queued. Returns whether the frame was handed over.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(err) => {
                progress_warn!("Cannot serialize outbound payload: {}", err);
                return false;
            }
        };

        let sent = lock(&self.shared.outbound)
            .as_ref()
            .map(|tx| tx.send(Message::Text(text)).is_ok());
        match sent {
            Some(true) => true,
            _ => {
                progress_warn!(
                    "Dropping outbound message while connection is {:?}",
                    self.state()
                );
                false
            }
        }
    }

    /// Sends the authorization handshake. Call after `Connected`.
    pub fn authenticate(&self, id_token: &str) -> bool {
        self.send(&OutboundMessage::Authorize {
            id_token: id_token.to_string(),
        })
    }

    /// Closes the socket and stops any pending or future reconnect.
    ///
    /// The running driver still reports `Disconnected { reason: Requested }`
    /// if a socket was open.
    pub fn disconnect(&self) {
        if let Some(cancel) = lock(&self.shared.cancel).take() {
            progress_info!("Disconnect requested");
            cancel.cancel();
        }
        lock(&self.shared.outbound).take();
        if self.shared.state() != ConnectionState::Idle {
            self.shared.set_state(ConnectionState::Closed);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.shared.attempt.load(Ordering::SeqCst)
    }

    /// True after the server reported a newer connection for this identity.
    /// Cleared by the next `initialize`.
    pub fn is_superseded(&self) -> bool {
        self.shared.superseded.load(Ordering::SeqCst)
    }
}

struct Driver {
    shared: Arc<Shared>,
    generation: u64,
    url: String,
    cancel: CancellationToken,
}

impl Driver {
    fn is_current(&self) -> bool {
        self.shared.generation.load(Ordering::SeqCst) == self.generation
    }

    fn set_state(&self, state: ConnectionState) {
        if self.is_current() {
            self.shared.set_state(state);
        }
    }

    /// A driver replaced by a newer `initialize` stays silent.
    fn emit(&self, event: ConnectionEvent) {
        if self.is_current() {
            self.shared.emit(event);
        } else {
            progress_debug!("Suppressing {:?} from replaced driver", event.kind());
        }
    }

    async fn run(self) {
        progress_info!("Connecting to {}", self.url);
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.set_state(ConnectionState::Connecting);

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = connect_async(self.url.as_str()) => result,
            };

            match connected {
                Ok((socket, _response)) if !self.cancel.is_cancelled() => {
                    let reason = self.run_session(socket).await;
                    self.set_state(ConnectionState::Closed);
                    progress_info!("Disconnected from {}: {}", self.url, reason);
                    let reconnect = reason.allows_reconnect();
                    self.emit(ConnectionEvent::Disconnected { reason });
                    if !reconnect {
                        break;
                    }
                }
                Ok(_) => break,
                Err(err) => {
                    self.set_state(ConnectionState::Closed);
                    progress_warn!("Connect to {} failed: {}", self.url, err);
                    self.emit(ConnectionEvent::Error(ConnectionError::Connect(
                        err.to_string(),
                    )));
                }
            }

            if !self.wait_before_retry().await {
                break;
            }
        }
        self.set_state(ConnectionState::Closed);
    }

    /// Sleeps out the backoff for the next attempt. Returns `false` when the
    /// driver should stop instead.
    async fn wait_before_retry(&self) -> bool {
        let attempt = self.shared.attempt.load(Ordering::SeqCst);
        let max_attempts = self.shared.settings.max_reconnect_attempts;
        if attempt >= max_attempts {
            progress_error!(
                "Giving up on {} after {} reconnect attempts",
                self.url,
                attempt
            );
            self.emit(ConnectionEvent::Error(ConnectionError::ReconnectExhausted {
                attempts: attempt,
            }));
            return false;
        }

        let delay = self.shared.settings.backoff.delay_for(attempt);
        self.shared.attempt.store(attempt + 1, Ordering::SeqCst);
        progress_info!(
            "Reconnecting to {} in {:?} (attempt {}/{})",
            self.url,
            delay,
            attempt + 1,
            max_attempts
        );

        tokio::select! {
            _ = self.cancel.cancelled() => return false,
            _ = tokio::time::sleep(delay) => {}
        }
        // The timer may have outlived a disconnect or a newer driver.
        !self.cancel.is_cancelled() && self.is_current()
    }

    async fn run_session(&self, socket: Socket) -> DisconnectReason {
        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel();

        if !self.is_current() || self.cancel.is_cancelled() {
            let _ = sink.send(Message::Close(None)).await;
            return DisconnectReason::Requested;
        }
        *lock(&self.shared.outbound) = Some(tx);
        self.shared.attempt.store(0, Ordering::SeqCst);
        self.shared.superseded.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Open);
        progress_info!("Connected to {}", self.url);
        self.emit(ConnectionEvent::Connected);

        let reason = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break DisconnectReason::Requested;
                }
                Some(frame) = rx.recv() => {
                    if let Err(err) = sink.send(frame).await {
                        progress_warn!("Send to {} failed: {}", self.url, err);
                        break self.end_reason(DisconnectReason::Transport(err.to_string()));
                    }
                }
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => self.handle_text(&text),
                        Err(err) => self.report_malformed(err.to_string()),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        progress_debug!("Close frame from {}: {:?}", self.url, frame);
                        break self.end_reason(DisconnectReason::ClosedByServer);
                    }
                    // Ping/pong replies are handled by tungstenite.
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        break self.end_reason(DisconnectReason::Transport(err.to_string()));
                    }
                    None => break self.end_reason(DisconnectReason::ClosedByServer),
                },
            }
        };

        if self.is_current() {
            lock(&self.shared.outbound).take();
        }
        reason
    }

    fn end_reason(&self, fallback: DisconnectReason) -> DisconnectReason {
        if self.shared.superseded.load(Ordering::SeqCst) {
            DisconnectReason::Superseded
        } else {
            fallback
        }
    }

    fn handle_text(&self, text: &str) {
        match InboundMessage::from_frame(text) {
            Ok(message) => {
                if matches!(message, InboundMessage::ConnectionReplaced) && self.is_current() {
                    progress_info!(
                        "Connection to {} replaced by a newer session; not reconnecting",
                        self.url
                    );
                    self.shared.superseded.store(true, Ordering::SeqCst);
                }
                self.emit(ConnectionEvent::Message(message));
            }
            Err(err) => self.report_malformed(err.to_string()),
        }
    }

    fn report_malformed(&self, detail: String) {
        progress_warn!("Malformed frame from {}: {}", self.url, detail);
        self.emit(ConnectionEvent::Error(ConnectionError::MalformedFrame(detail)));
    }
}
