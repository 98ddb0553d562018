//! The control channel.
//!
//! One [`ConnectionManager`] actor task owns the socket, the in-flight
//! connect, the heartbeat and the reconnect timer. Callers talk to it through
//! a cloneable [`ConnectionHandle`]. Everything the actor reacts to (socket
//! events, timer ticks, caller commands) is handled one at a time, so the
//! "at most one socket, at most one reconnect timer" invariants hold by
//! construction.

use std::future::pending;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::endpoint::Origin;
use crate::error::ClientError;
use crate::protocol::{InboundMessage, OutboundMessage};
use crate::transport::{
    ABNORMAL_CLOSURE, ConnectFuture, Connector, NORMAL_CLOSURE, Socket, SocketCommand,
    SocketEvent, TungsteniteConnector,
};

/// Receives every successfully parsed inbound message, in arrival order.
///
/// Called on the connection task; implementations must not block.
pub trait MessageHandler: Send + 'static {
    fn handle(&mut self, message: InboundMessage);
}

impl<F> MessageHandler for F
where
    F: FnMut(InboundMessage) + Send + 'static,
{
    fn handle(&mut self, message: InboundMessage) {
        self(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    /// We sent a close frame and are waiting for the peer's.
    Closing,
}

/// Observable snapshot of the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub port: Option<u16>,
    pub retry_count: u32,
    pub reconnect_scheduled: bool,
    pub heartbeat_active: bool,
    /// Reconnection exhausted its budget; only `connect` resumes it.
    pub gave_up: bool,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            port: None,
            retry_count: 0,
            reconnect_scheduled: false,
            heartbeat_active: false,
            gave_up: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Not open (or the serialised payload could not be handed to the
    /// socket); the message is gone.
    Dropped,
}

enum Command {
    Connect {
        port: u16,
        handler: Box<dyn MessageHandler>,
    },
    Send {
        message: OutboundMessage,
        respond_to: Option<oneshot::Sender<SendOutcome>>,
    },
    Disconnect,
    Status {
        respond_to: oneshot::Sender<ConnectionStatus>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a running [`ConnectionManager`].
#[derive(Clone)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
}

impl ConnectionHandle {
    /// (Re)connect to `port` on the configured origin, replacing the handler.
    ///
    /// Closes any open or connecting socket first, cancels a pending
    /// reconnect and restores the retry budget.
    pub fn connect(&self, port: u16, handler: impl MessageHandler) {
        let _ = self.commands.send(Command::Connect {
            port,
            handler: Box::new(handler),
        });
    }

    /// Send a message if the channel is open; otherwise drop it and nudge
    /// reconnection.
    pub async fn send(&self, message: OutboundMessage) -> SendOutcome {
        let (tx, rx) = oneshot::channel();
        let command = Command::Send {
            message,
            respond_to: Some(tx),
        };
        if self.commands.send(command).is_err() {
            return SendOutcome::Dropped;
        }
        rx.await.unwrap_or(SendOutcome::Dropped)
    }

    /// Fire-and-forget [`send`](Self::send), usable from message handlers.
    pub fn post(&self, message: OutboundMessage) {
        let _ = self.commands.send(Command::Send {
            message,
            respond_to: None,
        });
    }

    /// Close the socket cleanly (code 1000) without stopping the manager.
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    /// Current status, after every event already queued has been handled.
    pub async fn status(&self) -> ConnectionStatus {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Status { respond_to: tx }).is_ok() {
            if let Ok(status) = rx.await {
                return status;
            }
        }
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Close with code 1000, cancel all timers and stop the manager.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { respond_to: tx }).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// A handle that does not keep the manager alive.
    pub fn downgrade(&self) -> WeakConnectionHandle {
        WeakConnectionHandle {
            commands: self.commands.downgrade(),
            status: self.status.clone(),
        }
    }
}

/// Non-owning counterpart of [`ConnectionHandle`], for code the manager
/// itself owns (message handlers).
#[derive(Clone)]
pub struct WeakConnectionHandle {
    commands: mpsc::WeakUnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
}

impl WeakConnectionHandle {
    pub fn upgrade(&self) -> Option<ConnectionHandle> {
        Some(ConnectionHandle {
            commands: self.commands.upgrade()?,
            status: self.status.clone(),
        })
    }
}

/// The actor owning the control channel.
pub struct ConnectionManager {
    config: ConnectionConfig,
    origin: Origin,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    status_tx: watch::Sender<ConnectionStatus>,

    state: ConnectionState,
    port: Option<u16>,
    handler: Option<Box<dyn MessageHandler>>,
    socket: Option<Socket>,
    pending: Option<ConnectFuture>,
    heartbeat: Option<Interval>,
    reconnect: Option<Interval>,
    retry_count: u32,
    gave_up: bool,
    /// Set by `disconnect`; blocks reconnection until the next `connect`.
    disconnected_by_caller: bool,
}

impl ConnectionManager {
    /// Spawn a manager that dials real WebSockets.
    pub fn spawn(config: ConnectionConfig, origin: Origin) -> ConnectionHandle {
        Self::spawn_with_connector(config, origin, Arc::new(TungsteniteConnector))
    }

    pub fn spawn_with_connector(
        config: ConnectionConfig,
        origin: Origin,
        connector: Arc<dyn Connector>,
    ) -> ConnectionHandle {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());

        let actor = Self {
            config,
            origin,
            connector,
            commands: cmd_rx,
            status_tx,
            state: ConnectionState::Disconnected,
            port: None,
            handler: None,
            socket: None,
            pending: None,
            heartbeat: None,
            reconnect: None,
            retry_count: 0,
            gave_up: false,
            disconnected_by_caller: false,
        };
        tokio::spawn(actor.run());

        ConnectionHandle {
            commands: cmd_tx,
            status: status_rx,
        }
    }

    async fn run(mut self) {
        debug!("connection manager started");

        loop {
            tokio::select! {
                biased;

                event = next_socket_event(&mut self.socket) => {
                    self.on_socket_event(event);
                }

                result = poll_connect(&mut self.pending) => {
                    self.pending = None;
                    self.on_connect_result(result);
                }

                () = tick(&mut self.heartbeat) => {
                    self.on_heartbeat();
                }

                () = tick(&mut self.reconnect) => {
                    self.on_reconnect_tick();
                }

                command = self.commands.recv() => {
                    let Some(command) = command else {
                        self.teardown();
                        break;
                    };
                    if !self.on_command(command) {
                        break;
                    }
                }
            }

            self.publish_status();
        }

        self.publish_status();
        debug!("connection manager stopped");
    }

    /// Returns `false` once the manager should stop.
    fn on_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect { port, handler } => {
                self.port = Some(port);
                self.handler = Some(handler);
                self.reconnect = None;
                self.retry_count = 0;
                self.gave_up = false;
                self.disconnected_by_caller = false;
                self.begin_connect();
            }
            Command::Send {
                message,
                respond_to,
            } => {
                let outcome = self.send(&message);
                if let Some(tx) = respond_to {
                    let _ = tx.send(outcome);
                }
            }
            Command::Disconnect => {
                self.disconnected_by_caller = true;
                self.reconnect = None;
                self.heartbeat = None;
                self.pending = None;
                if let Some(socket) = &self.socket {
                    let _ = socket.send(SocketCommand::Close {
                        code: NORMAL_CLOSURE,
                    });
                    self.state = ConnectionState::Closing;
                } else {
                    self.state = ConnectionState::Disconnected;
                }
            }
            Command::Status { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
            Command::Shutdown { respond_to } => {
                info!("shutting down control channel");
                self.teardown();
                self.publish_status();
                let _ = respond_to.send(());
                return false;
            }
        }
        true
    }

    /// Open a socket with the stored configuration, replacing any existing
    /// one. Leaves the reconnect timer alone.
    fn begin_connect(&mut self) {
        let Some(port) = self.port else {
            return;
        };

        self.close_socket();
        self.pending = None;

        let url = self.origin.websocket_url(port);
        info!("connecting to {}", url);
        self.state = ConnectionState::Connecting;
        self.pending = Some(self.connector.connect(&url));

        let period = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(heartbeat);
    }

    fn on_connect_result(&mut self, result: Result<Socket, ClientError>) {
        match result {
            Ok(socket) => {
                info!(port = ?self.port, "control channel open");
                self.socket = Some(socket);
                self.state = ConnectionState::Open;
                self.retry_count = 0;
                self.gave_up = false;
                self.reconnect = None;
            }
            Err(e) => {
                warn!("connect failed: {}", e);
                self.state = ConnectionState::Disconnected;
                self.on_abnormal_close(ABNORMAL_CLOSURE);
            }
        }
    }

    fn on_socket_event(&mut self, event: Option<SocketEvent>) {
        match event {
            Some(SocketEvent::Text(text)) => match InboundMessage::parse(&text) {
                Ok(message) => {
                    self.retry_count = 0;
                    if let Some(handler) = self.handler.as_mut() {
                        handler.handle(message);
                    }
                }
                Err(e) => {
                    warn!("dropping malformed message: {}", e);
                }
            },
            Some(SocketEvent::Binary(data)) => {
                debug!(len = data.len(), "ignoring binary frame on control channel");
            }
            Some(SocketEvent::Error(e)) => {
                warn!("control channel error: {}", e);
            }
            Some(SocketEvent::Closed { code }) => self.on_closed(code),
            None => self.on_closed(ABNORMAL_CLOSURE),
        }
    }

    fn on_closed(&mut self, code: u16) {
        self.socket = None;
        let was_closing = self.state == ConnectionState::Closing;
        self.state = ConnectionState::Disconnected;

        if was_closing || code == NORMAL_CLOSURE {
            info!(code, "control channel closed");
            return;
        }
        warn!(code, "control channel closed unexpectedly");
        self.on_abnormal_close(code);
    }

    fn on_abnormal_close(&mut self, code: u16) {
        if self.reconnect.is_some()
            || self.gave_up
            || self.disconnected_by_caller
            || self.port.is_none()
        {
            return;
        }
        debug!(code, "scheduling reconnect");
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        let delay = self.config.reconnect_delay;
        let mut reconnect = tokio::time::interval_at(Instant::now() + delay, delay);
        reconnect.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.reconnect = Some(reconnect);
    }

    fn on_reconnect_tick(&mut self) {
        if self.retry_count >= self.config.max_reconnect_attempts {
            warn!(
                attempts = self.retry_count,
                "giving up on reconnecting the control channel"
            );
            self.reconnect = None;
            self.retry_count = 0;
            self.gave_up = true;
            return;
        }

        self.retry_count += 1;
        info!(
            "reconnect attempt {}/{}",
            self.retry_count, self.config.max_reconnect_attempts
        );
        self.begin_connect();
    }

    fn on_heartbeat(&mut self) {
        match self.state {
            ConnectionState::Open => {
                if let Err(e) = self.write(&OutboundMessage::heartbeat()) {
                    warn!("heartbeat failed: {}", e);
                }
            }
            ConnectionState::Connecting => {
                debug!("heartbeat skipped while connecting");
            }
            ConnectionState::Disconnected | ConnectionState::Closing => {
                debug!("heartbeat stopped");
                self.heartbeat = None;
            }
        }
    }

    fn send(&mut self, message: &OutboundMessage) -> SendOutcome {
        if self.state == ConnectionState::Open {
            return match self.write(message) {
                Ok(()) => SendOutcome::Sent,
                Err(e) => {
                    warn!("send failed: {}", e);
                    SendOutcome::Dropped
                }
            };
        }

        warn!(state = ?self.state, "control channel not open; dropping message");
        if self.reconnect.is_none()
            && self.pending.is_none()
            && self.port.is_some()
            && !self.gave_up
            && !self.disconnected_by_caller
            && self.retry_count < self.config.max_reconnect_attempts
        {
            debug!("send while closed; scheduling reconnect");
            self.schedule_reconnect();
        }
        SendOutcome::Dropped
    }

    fn write(&self, message: &OutboundMessage) -> Result<(), ClientError> {
        let socket = self.socket.as_ref().ok_or(ClientError::SocketClosed)?;
        let text = serde_json::to_string(message)?;
        socket.send(SocketCommand::Text(text))
    }

    /// Ask the socket to close cleanly and forget it; its late events are
    /// dropped with the channel.
    fn close_socket(&mut self) {
        if let Some(socket) = self.socket.take() {
            let _ = socket.send(SocketCommand::Close {
                code: NORMAL_CLOSURE,
            });
        }
    }

    fn teardown(&mut self) {
        self.close_socket();
        self.pending = None;
        self.heartbeat = None;
        self.reconnect = None;
        self.handler = None;
        self.state = ConnectionState::Disconnected;
    }

    fn snapshot(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            port: self.port,
            retry_count: self.retry_count,
            reconnect_scheduled: self.reconnect.is_some(),
            heartbeat_active: self.heartbeat.is_some(),
            gave_up: self.gave_up,
        }
    }

    fn publish_status(&self) {
        let status = self.snapshot();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

async fn next_socket_event(socket: &mut Option<Socket>) -> Option<SocketEvent> {
    match socket {
        Some(socket) => socket.inbound.recv().await,
        None => pending().await,
    }
}

async fn poll_connect(connect: &mut Option<ConnectFuture>) -> Result<Socket, ClientError> {
    match connect {
        Some(fut) => fut.as_mut().await,
        None => pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}
