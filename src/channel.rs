//! Streaming channel for fire-and-forget telemetry frames.
//!
//! The channel owns at most one live connection to the streaming endpoint.
//! A dedicated tokio task holds the connection and processes connect, send
//! and disconnect requests one at a time from an mpsc queue; callers talk to
//! it through the cloneable [`Channel`] handle and get answers over oneshot
//! channels. The current [`ChannelState`] is published on a watch channel so
//! it can be read without a round trip.
//!
//! Nothing here ever returns an error to the caller. Handshake failures,
//! write failures and peer closes are logged and surface only as `false`.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::client::Credentials;
use crate::config::Config;
use crate::transport::{FrameSink, Inbound, Transport};

/// Capacity of the command queue feeding the channel task.
const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Connection state of a [`Channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelState::Disconnected => write!(f, "disconnected"),
            ChannelState::Connecting => write!(f, "connecting"),
            ChannelState::Connected => write!(f, "connected"),
        }
    }
}

/// Timeouts applied by the channel task.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Maximum time to wait for the handshake
    pub connect_timeout: Duration,

    /// Maximum time to wait for one frame to be written
    pub send_timeout: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&Config> for ChannelOptions {
    fn from(config: &Config) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            send_timeout: config.send_timeout,
        }
    }
}

/// Build the streaming URL for a set of credentials.
///
/// Both values are percent-encoded into `?key=<apiKey>&instance=<instanceId>`.
pub fn stream_url(base: &str, credentials: &Credentials) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base)?;
    url.query_pairs_mut()
        .append_pair("key", &credentials.api_key)
        .append_pair("instance", &credentials.instance_id);
    Ok(url)
}

enum Command {
    Connect { reply: oneshot::Sender<bool> },
    Send { payload: String, reply: oneshot::Sender<bool> },
    Disconnect { reply: oneshot::Sender<()> },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Handle to a running channel task.
///
/// Cloning the handle shares the same connection. The task stops when
/// [`Channel::shutdown`] is called or every handle has been dropped.
#[derive(Debug, Clone)]
pub struct Channel {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ChannelState>,
}

impl Channel {
    /// Spawn the channel task on the current tokio runtime.
    ///
    /// No connection is opened until [`Channel::connect`] is called.
    pub fn spawn<T: Transport>(transport: T, url: Url, options: ChannelOptions) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();

        let task = ChannelTask {
            transport,
            endpoint: redacted_endpoint(&url),
            url,
            options,
            commands: command_rx,
            state: state_tx,
            closed_tx,
            closed_rx,
            connection: None,
        };
        tokio::spawn(task.run());

        Self {
            commands: command_tx,
            state: state_rx,
        }
    }

    /// Open the connection if it is not already open or opening.
    ///
    /// Returns `true` immediately while Connected or Connecting. Otherwise
    /// waits for the handshake and returns whether it reached Connected.
    pub async fn connect(&self) -> bool {
        if matches!(
            self.state(),
            ChannelState::Connected | ChannelState::Connecting
        ) {
            return true;
        }

        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Connect { reply }).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Hand one text frame to the connection.
    ///
    /// Returns `false` without connecting when the channel is not Connected,
    /// and `false` when the write fails. Frames are never buffered.
    pub async fn send(&self, payload: impl Into<String>) -> bool {
        if !self.is_connected() {
            debug!("Dropping frame, channel is not connected");
            return false;
        }

        let (reply, rx) = oneshot::channel();
        let command = Command::Send {
            payload: payload.into(),
            reply,
        };
        if self.commands.send(command).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Close the connection if one is open.
    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Disconnect { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Close the connection and stop the channel task.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Connected
    }

    /// Subscribe to state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }
}

struct LiveConnection {
    id: Uuid,
    sink: Box<dyn FrameSink>,
    reader: JoinHandle<()>,
}

struct ChannelTask<T> {
    transport: T,
    url: Url,
    endpoint: String,
    options: ChannelOptions,
    commands: mpsc::Receiver<Command>,
    state: watch::Sender<ChannelState>,
    closed_tx: mpsc::UnboundedSender<Uuid>,
    closed_rx: mpsc::UnboundedReceiver<Uuid>,
    connection: Option<LiveConnection>,
}

impl<T: Transport> ChannelTask<T> {
    async fn run(mut self) {
        debug!(endpoint = %self.endpoint, "Channel task started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Connect { reply }) => {
                        let connected = self.connect().await;
                        let _ = reply.send(connected);
                    }
                    Some(Command::Send { payload, reply }) => {
                        let sent = self.send(payload).await;
                        let _ = reply.send(sent);
                    }
                    Some(Command::Disconnect { reply }) => {
                        self.disconnect().await;
                        let _ = reply.send(());
                    }
                    Some(Command::Shutdown { reply }) => {
                        self.disconnect().await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.disconnect().await;
                        break;
                    }
                },
                Some(closed_id) = self.closed_rx.recv() => {
                    self.on_closed(closed_id);
                }
            }
        }

        debug!(endpoint = %self.endpoint, "Channel task stopped");
    }

    async fn connect(&mut self) -> bool {
        if self.connection.is_some() {
            return true;
        }

        self.state.send_replace(ChannelState::Connecting);
        let id = Uuid::new_v4();
        debug!(endpoint = %self.endpoint, connection_id = %id, "Opening streaming connection");

        match timeout(self.options.connect_timeout, self.transport.connect(&self.url)).await {
            Ok(Ok(connection)) => {
                let reader = tokio::spawn(read_inbound(
                    id,
                    connection.inbound,
                    self.closed_tx.clone(),
                ));
                self.connection = Some(LiveConnection {
                    id,
                    sink: connection.sink,
                    reader,
                });
                self.state.send_replace(ChannelState::Connected);
                info!(endpoint = %self.endpoint, connection_id = %id, "Streaming connection established");
                true
            }
            Ok(Err(e)) => {
                warn!(endpoint = %self.endpoint, error = %e, "Streaming connection failed");
                self.state.send_replace(ChannelState::Disconnected);
                false
            }
            Err(_) => {
                warn!(
                    endpoint = %self.endpoint,
                    timeout_ms = self.options.connect_timeout.as_millis() as u64,
                    "Streaming handshake timed out"
                );
                self.state.send_replace(ChannelState::Disconnected);
                false
            }
        }
    }

    async fn send(&mut self, payload: String) -> bool {
        let Some(connection) = self.connection.as_mut() else {
            debug!("Dropping frame, channel is not connected");
            return false;
        };

        let bytes = payload.len();
        match timeout(self.options.send_timeout, connection.sink.send_text(payload)).await {
            Ok(Ok(())) => {
                debug!(connection_id = %connection.id, bytes, "Frame sent");
                true
            }
            Ok(Err(e)) => {
                warn!(connection_id = %connection.id, error = %e, "Failed to send frame");
                self.drop_connection();
                false
            }
            Err(_) => {
                warn!(connection_id = %connection.id, "Timed out sending frame");
                self.drop_connection();
                false
            }
        }
    }

    async fn disconnect(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };

        if let Ok(Err(e)) = timeout(self.options.send_timeout, connection.sink.close()).await {
            debug!(connection_id = %connection.id, error = %e, "Error while closing connection");
        }
        connection.reader.abort();
        self.state.send_replace(ChannelState::Disconnected);
        info!(connection_id = %connection.id, "Streaming connection closed");
    }

    /// Forget the current connection without a close handshake.
    fn drop_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.reader.abort();
        }
        self.state.send_replace(ChannelState::Disconnected);
    }

    /// The reader of connection `id` saw the peer go away.
    fn on_closed(&mut self, id: Uuid) {
        match &self.connection {
            Some(connection) if connection.id == id => {
                self.connection = None;
                self.state.send_replace(ChannelState::Disconnected);
            }
            // A stale notification from a connection already replaced.
            _ => {}
        }
    }
}

/// Drain inbound events for one connection, reporting its end to the task.
async fn read_inbound(
    id: Uuid,
    mut inbound: futures_util::stream::BoxStream<'static, Inbound>,
    closed_tx: mpsc::UnboundedSender<Uuid>,
) {
    while let Some(event) = inbound.next().await {
        match event {
            Inbound::Message(data) => {
                debug!(connection_id = %id, bytes = data.len(), "Received message from server");
            }
            Inbound::Close { code, reason } => {
                info!(connection_id = %id, code, reason = %reason, "Server closed streaming connection");
                let _ = closed_tx.send(id);
                return;
            }
            Inbound::Error(err) => {
                warn!(connection_id = %id, error = %err, "Streaming connection error");
                let _ = closed_tx.send(id);
                return;
            }
        }
    }

    debug!(connection_id = %id, "Streaming connection ended");
    let _ = closed_tx.send(id);
}

/// Endpoint for log output, without the credential-bearing query string.
fn redacted_endpoint(url: &Url) -> String {
    let mut endpoint = url.clone();
    endpoint.set_query(None);
    endpoint.to_string()
}
