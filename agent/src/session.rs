//! Transport session: connection state machine and reliable handoff.
//!
//! One spawned task owns the broker client and the delivery queue; every
//! transition runs through its single select loop, so handlers never re-enter
//! each other. The handle side is fire-and-forget: `send` pushes a command
//! over an unbounded channel and never blocks or errs toward the caller.
//!
//! `Disconnected -> Connecting -> Connected -> Disconnected (retry pending)`,
//! no terminal state: connect failures retry after a fixed delay, connection
//! losses re-dial immediately, indefinitely. The agent has no user-facing
//! failure channel; losing records is preferred to blocking the host page.

use std::time::Duration;

use async_trait::async_trait;
use rand::{distributions::Alphanumeric, Rng};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::models::record::EventRecord;
use crate::queue::DeliveryQueue;

/// Delivery-guarantee level offered by the pub/sub transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl Qos {
    /// Numeric QoS level as configured by integrations (0, 1, 2).
    /// Anything else falls back to best effort.
    pub fn from_level(level: u8) -> Self {
        match level {
            1 => Qos::AtLeastOnce,
            2 => Qos::ExactlyOnce,
            _ => Qos::AtMostOnce,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("not connected")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Notification surfaced by the broker client between publishes.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// Connection dropped. Code 0 is a clean, expected close; anything else
    /// is abnormal. Both are handled identically (the session always
    /// re-dials).
    ConnectionLost { code: i32, reason: Option<String> },
    /// Message arrived on a subscribed topic.
    Message { topic: String, payload: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub use_ssl: bool,
}

/// The abstract broker-client capability the session drives.
///
/// `next_event` must be cancel-safe: the session polls it inside a select
/// loop alongside the command channel.
///
/// `publish` must complete without `next_event` being polled concurrently.
/// The session hands off a whole queue back-to-back before returning to its
/// event loop, so a client multiplexing one connection has to drive it from
/// a task of its own rather than from `next_event`.
#[async_trait]
pub trait BrokerClient: Send {
    async fn connect(&mut self, opts: &ConnectOptions) -> Result<(), BrokerError>;
    async fn publish(&mut self, topic: &str, payload: &[u8], qos: Qos) -> Result<(), BrokerError>;
    async fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError>;
    async fn next_event(&mut self) -> Option<BrokerEvent>;
    fn is_connected(&self) -> bool;
}

/// Message arrived on the inbound topic, forwarded to the host when
/// inbound listening is enabled.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

enum SessionCommand {
    Send(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    RetryPending,
}

/// Cloneable sending side of the session. `send` serializes the record and
/// hands it to the session task; it never blocks and never raises.
#[derive(Clone)]
pub struct SessionHandle {
    commands_tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn send(&self, record: &EventRecord) {
        match serde_json::to_string(record) {
            Ok(payload) => self.send_serialized(payload),
            Err(err) => warn!(%err, "record serialization failed, record dropped"),
        }
    }

    pub fn send_serialized(&self, payload: String) {
        if self.commands_tx.send(SessionCommand::Send(payload)).is_err() {
            warn!("session task gone, record dropped");
        }
    }
}

/// Session = (state-machine task) + (channels for the host).
pub struct TransportSession {
    join: JoinHandle<()>,
    commands_tx: mpsc::UnboundedSender<SessionCommand>,
    shutdown: CancellationToken,
    inbound_rx: Option<mpsc::UnboundedReceiver<InboundMessage>>,
    client_id: String,
}

impl TransportSession {
    /// Spawns the session task. The client id is generated once and reused
    /// across every reconnect within this session's lifetime.
    pub fn start<B: BrokerClient + 'static>(config: AgentConfig, broker: B) -> Self {
        let client_id = generate_client_id();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = if config.listen_inbound {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let shutdown = CancellationToken::new();

        let driver = SessionDriver {
            broker,
            config,
            client_id: client_id.clone(),
            queue: DeliveryQueue::new(),
            commands_rx,
            inbound_tx,
            state: SessionState::Disconnected,
        };
        let join = tokio::spawn(driver.run(shutdown.clone()));

        Self {
            join,
            commands_tx,
            shutdown,
            inbound_rx,
            client_id,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            commands_tx: self.commands_tx.clone(),
        }
    }

    pub fn send(&self, record: &EventRecord) {
        self.handle().send(record);
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Receiver for messages arriving on the inbound topic. `None` unless
    /// the session was started with `listen_inbound`, or if already taken.
    pub fn take_inbound(&mut self) -> Option<mpsc::UnboundedReceiver<InboundMessage>> {
        self.inbound_rx.take()
    }

    /// Orderly teardown for hosts that have one (tests, demo binaries).
    /// Page unload has no counterpart here: queued records are simply lost.
    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.join.await;
    }
}

fn generate_client_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(11)
        .map(char::from)
        .collect();
    format!("rs-{}", suffix.to_lowercase())
}

struct SessionDriver<B> {
    broker: B,
    config: AgentConfig,
    client_id: String,
    queue: DeliveryQueue,
    commands_rx: mpsc::UnboundedReceiver<SessionCommand>,
    inbound_tx: Option<mpsc::UnboundedSender<InboundMessage>>,
    state: SessionState,
}

impl<B: BrokerClient> SessionDriver<B> {
    async fn run(mut self, shutdown: CancellationToken) {
        loop {
            if !self.connect_once(&shutdown).await {
                return;
            }
            if self.state != SessionState::Connected {
                continue;
            }
            if !self.connected_phase(&shutdown).await {
                return;
            }
            // Connection lost: loop around for an immediate re-dial.
        }
    }

    /// One connect attempt, bounded by the configured timeout, followed by
    /// the fixed retry delay on failure. Sends arriving meanwhile go to the
    /// queue. Returns false on shutdown.
    async fn connect_once(&mut self, shutdown: &CancellationToken) -> bool {
        self.transition(SessionState::Connecting);
        let opts = ConnectOptions {
            host: self.config.host.clone(),
            port: self.config.port,
            client_id: self.client_id.clone(),
            use_ssl: self.config.use_ssl,
        };
        info!(host = %opts.host, port = opts.port, client_id = %opts.client_id, "connecting");

        let result = {
            let connect =
                tokio::time::timeout(self.config.connect_timeout, self.broker.connect(&opts));
            tokio::pin!(connect);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return false,
                    res = &mut connect => break res,
                    cmd = self.commands_rx.recv() => match cmd {
                        // The pinned connect future holds the broker, so
                        // queue directly instead of via queue_command.
                        Some(SessionCommand::Send(payload)) => self.queue.push(payload),
                        None => return false,
                    },
                }
            }
        };

        match result {
            Ok(Ok(())) => {
                self.transition(SessionState::Connected);
                true
            }
            Ok(Err(err)) => {
                warn!(%err, host = %self.config.host, "connect attempt failed");
                self.retry_wait(shutdown).await
            }
            Err(_) => {
                warn!(timeout = ?self.config.connect_timeout, "connect attempt timed out");
                self.retry_wait(shutdown).await
            }
        }
    }

    async fn retry_wait(&mut self, shutdown: &CancellationToken) -> bool {
        self.transition(SessionState::RetryPending);
        let delay = tokio::time::sleep(self.config.reconnect_delay);
        tokio::pin!(delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return false,
                _ = &mut delay => return true,
                cmd = self.commands_rx.recv() => {
                    if !self.queue_command(cmd) {
                        return false;
                    }
                }
            }
        }
    }

    /// Steady connected state: drain first, then serve new sends and broker
    /// events. Returns false on shutdown, true when the connection dropped
    /// and the caller should re-dial.
    async fn connected_phase(&mut self, shutdown: &CancellationToken) -> bool {
        info!(queued = self.queue.len(), "connected");

        if self.config.listen_inbound {
            if let Err(err) = self.broker.subscribe(&self.config.inbound_topic).await {
                warn!(%err, topic = %self.config.inbound_topic, "inbound subscribe failed");
            }
        }

        // Drain strictly FIFO before reading new commands. Sends issued
        // during the drain wait in the command channel behind everything
        // already queued, so global submission order holds.
        if !self.drain().await {
            self.transition(SessionState::Disconnected);
            return true;
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return false,
                cmd = self.commands_rx.recv() => match cmd {
                    Some(SessionCommand::Send(payload)) => {
                        if let Err(err) = self.publish(&payload).await {
                            warn!(%err, "publish failed, record queued for redelivery");
                            self.queue.push(payload);
                            self.transition(SessionState::Disconnected);
                            return true;
                        }
                    }
                    None => return false,
                },
                event = self.broker.next_event() => match event {
                    Some(BrokerEvent::ConnectionLost { code, reason }) => {
                        if code != 0 {
                            warn!(code, reason = reason.as_deref().unwrap_or(""), "connection lost");
                        } else {
                            debug!("connection closed by broker");
                        }
                        // Clean closes get no special-casing: always re-dial.
                        self.transition(SessionState::Disconnected);
                        return true;
                    }
                    Some(BrokerEvent::Message { topic, payload }) => {
                        if let Some(tx) = &self.inbound_tx {
                            let _ = tx.send(InboundMessage { topic, payload });
                        }
                    }
                    None => {
                        debug!("broker event stream ended");
                        self.transition(SessionState::Disconnected);
                        return true;
                    }
                },
            }
        }
    }

    /// Hands queued entries to the broker in FIFO order. An entry whose
    /// handoff fails goes back to the front; nothing is dropped before a
    /// successful handoff.
    async fn drain(&mut self) -> bool {
        while let Some(payload) = self.queue.pop() {
            if let Err(err) = self.publish(&payload).await {
                warn!(%err, queued = self.queue.len() + 1, "drain interrupted");
                self.queue.push_front(payload);
                return false;
            }
        }
        true
    }

    async fn publish(&mut self, payload: &str) -> Result<(), BrokerError> {
        self.broker
            .publish(&self.config.outbound_topic, payload.as_bytes(), self.config.qos)
            .await?;
        debug!(topic = %self.config.outbound_topic, bytes = payload.len(), "record published");
        Ok(())
    }

    fn queue_command(&mut self, cmd: Option<SessionCommand>) -> bool {
        match cmd {
            Some(SessionCommand::Send(payload)) => {
                self.queue.push(payload);
                debug!(queued = self.queue.len(), "record queued while disconnected");
                true
            }
            None => false,
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "session state");
            self.state = next;
        }
    }
}
