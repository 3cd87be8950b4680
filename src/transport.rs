//! Duplex transport used by the streaming channel.
//!
//! The channel never talks to a socket directly. It asks a [`Transport`] for a
//! [`Connection`], writes frames through the connection's [`FrameSink`] and
//! reads [`Inbound`] events from its stream. [`WebSocketTransport`] is the
//! production implementation; tests plug in an in-memory one.

use async_trait::async_trait;
use futures_util::stream::{BoxStream, SplitSink};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

/// Errors reported by a transport. They never leave the channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("connection closed")]
    Closed,
}

/// Something the remote end did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text or binary message.
    Message(String),
    /// The peer closed the connection.
    Close { code: u16, reason: String },
    /// Reading from the connection failed.
    Error(String),
}

/// Write half of an open connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Start a clean close of the connection.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// An open connection returned by [`Transport::connect`].
pub struct Connection {
    pub sink: Box<dyn FrameSink>,
    pub inbound: BoxStream<'static, Inbound>,
}

/// Opens duplex connections.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Perform the handshake with `url`.
    async fn connect(&self, url: &Url) -> Result<Connection, TransportError>;
}

/// WebSocket transport backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct WebSocketSink {
    inner: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.inner
            .send(Message::Text(text))
            .await
            .map_err(send_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner
            .close()
            .await
            .map_err(send_error)
    }
}

fn send_error(e: WsError) -> TransportError {
    match e {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::SendAfterClosing) => TransportError::Closed,
        other => TransportError::Send(other.to_string()),
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &Url) -> Result<Connection, TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        let (write, read) = stream.split();
        let inbound = read
            .filter_map(|message| async move {
                match message {
                    Ok(Message::Text(text)) => Some(Inbound::Message(text)),
                    Ok(Message::Binary(bytes)) => {
                        Some(Inbound::Message(String::from_utf8_lossy(&bytes).into_owned()))
                    }
                    Ok(Message::Close(frame)) => Some(match frame {
                        Some(frame) => Inbound::Close {
                            code: u16::from(frame.code),
                            reason: frame.reason.to_string(),
                        },
                        None => Inbound::Close {
                            code: 1005,
                            reason: String::new(),
                        },
                    }),
                    Ok(_) => None,
                    Err(e) => Some(Inbound::Error(e.to_string())),
                }
            })
            .boxed();

        Ok(Connection {
            sink: Box::new(WebSocketSink { inner: write }),
            inbound,
        })
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory transport for channel and session tests.

    use std::sync::{Arc, Mutex};

    use futures_util::stream;
    use tokio::sync::mpsc;

    use super::*;

    #[derive(Default)]
    struct MockState {
        sent: Vec<String>,
        connect_attempts: usize,
        urls: Vec<String>,
        fail_connect: bool,
        fail_send: bool,
        hang_connect: bool,
        hang_send: bool,
        closes: usize,
        inbound: Option<mpsc::UnboundedSender<Inbound>>,
    }

    /// Records frames and lets tests script failures and peer events.
    #[derive(Clone, Default)]
    pub(crate) struct MockTransport {
        state: Arc<Mutex<MockState>>,
    }

    impl MockTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn set_fail_connect(&self, fail: bool) {
            self.state.lock().unwrap().fail_connect = fail;
        }

        pub(crate) fn set_fail_send(&self, fail: bool) {
            self.state.lock().unwrap().fail_send = fail;
        }

        /// Make handshakes never complete.
        pub(crate) fn set_hang_connect(&self, hang: bool) {
            self.state.lock().unwrap().hang_connect = hang;
        }

        /// Make frame writes never complete.
        pub(crate) fn set_hang_send(&self, hang: bool) {
            self.state.lock().unwrap().hang_send = hang;
        }

        pub(crate) fn sent(&self) -> Vec<String> {
            self.state.lock().unwrap().sent.clone()
        }

        pub(crate) fn connect_attempts(&self) -> usize {
            self.state.lock().unwrap().connect_attempts
        }

        pub(crate) fn urls(&self) -> Vec<String> {
            self.state.lock().unwrap().urls.clone()
        }

        pub(crate) fn closes(&self) -> usize {
            self.state.lock().unwrap().closes
        }

        /// Deliver an event from the "server" on the current connection.
        pub(crate) fn push_inbound(&self, event: Inbound) {
            if let Some(tx) = &self.state.lock().unwrap().inbound {
                let _ = tx.send(event);
            }
        }
    }

    struct MockSink {
        state: Arc<Mutex<MockState>>,
    }

    #[async_trait]
    impl FrameSink for MockSink {
        async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
            let hang = self.state.lock().unwrap().hang_send;
            if hang {
                std::future::pending::<()>().await;
            }

            let mut state = self.state.lock().unwrap();
            if state.fail_send {
                return Err(TransportError::Send("broken pipe".to_string()));
            }
            state.sent.push(text);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.state.lock().unwrap().closes += 1;
            Ok(())
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&self, url: &Url) -> Result<Connection, TransportError> {
            let hang = {
                let mut state = self.state.lock().unwrap();
                state.connect_attempts += 1;
                state.urls.push(url.to_string());
                state.hang_connect
            };
            if hang {
                std::future::pending::<()>().await;
            }

            let mut state = self.state.lock().unwrap();
            if state.fail_connect {
                return Err(TransportError::Handshake("connection refused".to_string()));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            state.inbound = Some(tx);

            let inbound = stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|event| (event, rx))
            })
            .boxed();

            Ok(Connection {
                sink: Box::new(MockSink {
                    state: self.state.clone(),
                }),
                inbound,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Handshake("connection refused".to_string());
        assert_eq!(err.to_string(), "handshake failed: connection refused");
        assert_eq!(TransportError::Closed.to_string(), "connection closed");
    }

    #[tokio::test]
    async fn test_websocket_transport_sends_text_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            let first = ws.next().await.unwrap().unwrap();
            ws.send(Message::Text("ack".to_string())).await.unwrap();
            first
        });

        let url = Url::parse(&format!("ws://{}/ws?key=k&instance=i", addr)).unwrap();
        let mut connection = WebSocketTransport::new().connect(&url).await.unwrap();
        connection
            .sink
            .send_text(r#"{"type":"log"}"#.to_string())
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, Message::Text(r#"{"type":"log"}"#.to_string()));

        let reply = tokio::time::timeout(Duration::from_secs(5), connection.inbound.next())
            .await
            .unwrap();
        assert_eq!(reply, Some(Inbound::Message("ack".to_string())));
    }

    #[tokio::test]
    async fn test_websocket_send_after_close_reports_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let url = Url::parse(&format!("ws://{}/ws", addr)).unwrap();
        let mut connection = WebSocketTransport::new().connect(&url).await.unwrap();
        connection.sink.close().await.unwrap();

        let result = connection.sink.send_text("late".to_string()).await;
        assert_eq!(result, Err(TransportError::Closed));

        drop(connection);
        let _ = tokio::time::timeout(Duration::from_secs(5), server).await;
    }

    #[tokio::test]
    async fn test_websocket_transport_handshake_failure() {
        let url = Url::parse("ws://127.0.0.1:1/ws").unwrap();
        let result = WebSocketTransport::new().connect(&url).await;
        assert!(matches!(result, Err(TransportError::Handshake(_))));
    }
}
