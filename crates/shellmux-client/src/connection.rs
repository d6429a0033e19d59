//! WebSocket connection manager.
//!
//! One `Connection` owns exactly one socket for one connect attempt. The
//! socket is driven by a spawned task that reports `ConnectionEvent`s in
//! receipt order and drains queued outgoing frames in send order.
//!
//! State machine: `Idle -> Opening -> Open -> Closing -> Closed`, with
//! `Opening -> Closed` on handshake failure. Transitions are one-way; a
//! closed connection is never reopened.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use shellmux_core::codec::{decode_frame, encode_frame};
use shellmux_core::error::{ShellError, ShellResult};
use shellmux_core::frames::{ClientFrame, ServerFrame};

use crate::endpoint::{Endpoint, EndpointResolver};

/// Close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code reported when the socket dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// How long to wait for the peer's close reply after a local close.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Lifecycle of a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Opening,
    Open,
    Closing,
    Closed,
}

/// Close code and reason reported by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    pub fn is_normal(&self) -> bool {
        self.code == CLOSE_NORMAL
    }

    /// The error this close represents, if it was not a normal closure.
    pub fn to_error(&self) -> Option<ShellError> {
        (!self.is_normal()).then(|| ShellError::AbnormalClose {
            code: self.code,
            reason: self.reason.clone(),
        })
    }
}

/// Events delivered by the socket task.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The handshake completed; the socket is open.
    Opened,
    /// One inbound frame.
    Frame(ServerFrame),
    /// The socket closed. Terminal.
    Closed(CloseInfo),
    /// The handshake or the transport failed. Terminal.
    Failed(ShellError),
}

impl ConnectionEvent {
    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed(_) | Self::Failed(_))
    }
}

/// Commands from the handle to the socket task.
#[derive(Debug)]
enum Outgoing {
    Text(String),
    Close(String),
}

/// Handle to one socket.
pub struct Connection {
    state: Arc<watch::Sender<ConnectionState>>,
    outgoing_tx: mpsc::UnboundedSender<Outgoing>,
    events_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    driver_handle: Option<tokio::task::JoinHandle<()>>,
}

impl Connection {
    /// Resolve the endpoint and start opening the socket.
    ///
    /// Fails with `CredentialMissing` before any network call when `token`
    /// is absent or empty. The returned connection is `Opening`; the
    /// `Opened` event arrives once the handshake completes.
    pub async fn connect(resolver: &EndpointResolver, token: Option<&str>) -> ShellResult<Self> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or(ShellError::CredentialMissing)?;
        let endpoint = resolver.resolve(token).await?;
        Ok(Self::open(endpoint))
    }

    /// Start opening a socket to an already-resolved endpoint.
    pub fn open(endpoint: Endpoint) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let state = Arc::new(state_tx);
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        state.send_replace(ConnectionState::Opening);
        info!(endpoint = %endpoint, "opening shell socket");

        let driver_handle = {
            let state = state.clone();
            tokio::spawn(async move {
                Self::drive(endpoint, state, outgoing_rx, events_tx).await;
            })
        };

        Self {
            state,
            outgoing_tx,
            events_rx,
            driver_handle: Some(driver_handle),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Queue a frame for transmission.
    ///
    /// Silently ignored unless the socket is open.
    pub fn send(&self, frame: &ClientFrame) {
        if !self.is_open() {
            trace!(kind = frame.kind(), state = ?self.state(), "send ignored, socket not open");
            return;
        }
        match encode_frame(frame) {
            Ok(text) => {
                let _ = self.outgoing_tx.send(Outgoing::Text(text));
            }
            Err(e) => warn!("failed to encode {} frame: {}", frame.kind(), e),
        }
    }

    /// Request a graceful close. Later sends are ignored.
    ///
    /// A close requested while the socket is still opening takes effect as
    /// soon as the handshake completes.
    pub fn close(&self, reason: &str) {
        let mut requested = false;
        self.state.send_modify(|s| {
            if matches!(*s, ConnectionState::Opening | ConnectionState::Open) {
                *s = ConnectionState::Closing;
                requested = true;
            }
        });
        if requested {
            debug!(reason, "close requested");
            let _ = self.outgoing_tx.send(Outgoing::Close(reason.to_string()));
        }
    }

    /// Next event from the socket, in receipt order.
    ///
    /// Returns `None` once the terminal event has been consumed.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.events_rx.recv().await
    }

    /// The socket task: handshake, then pump frames both ways until close.
    async fn drive(
        endpoint: Endpoint,
        state: Arc<watch::Sender<ConnectionState>>,
        mut outgoing_rx: mpsc::UnboundedReceiver<Outgoing>,
        events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) {
        let ws = match connect_async(endpoint.as_str()).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "shell socket handshake failed");
                state.send_replace(ConnectionState::Closed);
                let _ = events_tx.send(ConnectionEvent::Failed(ShellError::Handshake(e.to_string())));
                return;
            }
        };

        let mut opened = false;
        state.send_modify(|s| {
            if *s == ConnectionState::Opening {
                *s = ConnectionState::Open;
                opened = true;
            }
        });

        let (mut sink, mut stream) = ws.split();

        if !opened {
            // Closed while the handshake was in flight.
            debug!("socket opened after close request, closing immediately");
            let reason = match outgoing_rx.try_recv() {
                Ok(Outgoing::Close(reason)) => reason,
                _ => String::new(),
            };
            let _ = sink.send(close_message(&reason)).await;
            state.send_replace(ConnectionState::Closed);
            let _ = events_tx.send(ConnectionEvent::Closed(CloseInfo {
                code: CLOSE_NORMAL,
                reason,
            }));
            return;
        }

        info!(endpoint = %endpoint, "shell socket open");
        let _ = events_tx.send(ConnectionEvent::Opened);

        let reason = loop {
            tokio::select! {
                cmd = outgoing_rx.recv() => match cmd {
                    Some(Outgoing::Text(text)) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            warn!(error = %e, "shell socket write failed");
                            state.send_replace(ConnectionState::Closed);
                            let _ = events_tx.send(ConnectionEvent::Failed(ShellError::Transport(e.to_string())));
                            return;
                        }
                    }
                    Some(Outgoing::Close(reason)) => {
                        let _ = sink.send(close_message(&reason)).await;
                        break reason;
                    }
                    None => {
                        // Handle dropped.
                        let _ = sink.send(close_message("")).await;
                        break String::new();
                    }
                },

                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => Self::deliver(text.as_str(), &events_tx),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => Self::deliver(text, &events_tx),
                        Err(_) => trace!("dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let info = match frame {
                            Some(f) => CloseInfo { code: u16::from(f.code), reason: f.reason.to_string() },
                            None => CloseInfo { code: CLOSE_NORMAL, reason: String::new() },
                        };
                        info!(code = info.code, reason = %info.reason, "shell socket closed by peer");
                        state.send_replace(ConnectionState::Closed);
                        let _ = events_tx.send(ConnectionEvent::Closed(info));
                        return;
                    }
                    Some(Ok(_)) => {} // ping/pong handled by tungstenite
                    Some(Err(e)) => {
                        warn!(error = %e, "shell socket read failed");
                        state.send_replace(ConnectionState::Closed);
                        let _ = events_tx.send(ConnectionEvent::Failed(ShellError::Transport(e.to_string())));
                        return;
                    }
                    None => {
                        info!("shell socket dropped without close frame");
                        state.send_replace(ConnectionState::Closed);
                        let _ = events_tx.send(ConnectionEvent::Closed(CloseInfo {
                            code: CLOSE_ABNORMAL,
                            reason: String::new(),
                        }));
                        return;
                    }
                },
            }
        };

        // Local close: give the peer a moment to answer, then finish.
        let _ = time::timeout(CLOSE_GRACE, async {
            while let Some(msg) = stream.next().await {
                if matches!(msg, Ok(Message::Close(_)) | Err(_)) {
                    break;
                }
            }
        })
        .await;

        state.send_replace(ConnectionState::Closed);
        debug!(reason = %reason, "shell socket closed locally");
        let _ = events_tx.send(ConnectionEvent::Closed(CloseInfo {
            code: CLOSE_NORMAL,
            reason,
        }));
    }

    /// Parse one inbound text frame; malformed frames are dropped.
    fn deliver(text: &str, events_tx: &mpsc::UnboundedSender<ConnectionEvent>) {
        match decode_frame::<ServerFrame>(text) {
            Ok(frame) => {
                let _ = events_tx.send(ConnectionEvent::Frame(frame));
            }
            Err(e) => trace!(error = %e, "dropping malformed frame"),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // The driver notices the closed command channel and closes the
        // socket itself; only abort if it is still stuck in the handshake.
        if let Some(h) = self.driver_handle.take() {
            if self.state() == ConnectionState::Opening {
                h.abort();
            }
        }
    }
}

fn close_message(reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: reason.to_string().into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestServer;

    #[test]
    fn close_info_normal() {
        let info = CloseInfo { code: 1000, reason: String::new() };
        assert!(info.is_normal());
        assert!(info.to_error().is_none());

        let info = CloseInfo { code: 1011, reason: "boom".into() };
        assert!(matches!(
            info.to_error(),
            Some(ShellError::AbnormalClose { code: 1011, .. })
        ));
    }

    #[tokio::test]
    async fn missing_token_fails_without_network() {
        let resolver = crate::testing::unreachable_resolver();
        let err = Connection::connect(&resolver, None).await.err().unwrap();
        assert!(matches!(err, ShellError::CredentialMissing));

        let err = Connection::connect(&resolver, Some("")).await.err().unwrap();
        assert!(matches!(err, ShellError::CredentialMissing));
    }

    #[tokio::test]
    async fn open_send_receive_in_order() {
        let mut server = TestServer::start().await;
        let mut conn = Connection::connect(&server.resolver(), Some("tok1")).await.unwrap();
        assert!(matches!(conn.next_event().await, Some(ConnectionEvent::Opened)));
        assert!(conn.is_open());

        let mut peer = server.accept().await;
        assert!(peer.uri.contains("token=tok1"));

        for key in ["l", "s", "\r"] {
            conn.send(&ClientFrame::input(key));
        }
        for key in ["l", "s", "\r"] {
            let frame = peer.recv_frame().await;
            assert_eq!(frame, ClientFrame::input(key));
        }

        peer.send_text(r#"{"type":"output","data":"one"}"#);
        peer.send_text(r#"{"type":"output","data":"two"}"#);
        for expected in ["one", "two"] {
            match conn.next_event().await {
                Some(ConnectionEvent::Frame(ServerFrame::Output { data })) => assert_eq!(data, expected),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped() {
        let mut server = TestServer::start().await;
        let mut conn = Connection::connect(&server.resolver(), Some("t")).await.unwrap();
        assert!(matches!(conn.next_event().await, Some(ConnectionEvent::Opened)));
        let peer = server.accept().await;

        peer.send_text("{not json");
        peer.send_text(r#"{"type":"mystery"}"#);
        peer.send_text(r#"{"type":"url_open","url":"https://example.com"}"#);

        match conn.next_event().await {
            Some(ConnectionEvent::Frame(ServerFrame::UrlOpen { url })) => {
                assert_eq!(url, "https://example.com")
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn send_is_ignored_unless_open() {
        let mut server = TestServer::start().await;
        let mut conn = Connection::connect(&server.resolver(), Some("t")).await.unwrap();
        assert!(matches!(conn.next_event().await, Some(ConnectionEvent::Opened)));
        let mut peer = server.accept().await;

        conn.close("bye");
        assert_eq!(conn.state(), ConnectionState::Closing);
        conn.send(&ClientFrame::input("late"));

        match conn.next_event().await {
            Some(ConnectionEvent::Closed(info)) => {
                assert!(info.is_normal());
                assert_eq!(info.reason, "bye");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(peer.recv_text().await.is_none());
    }

    #[tokio::test]
    async fn close_while_opening_closes_once_open() {
        let mut server = TestServer::start().await;
        let mut conn = Connection::connect(&server.resolver(), Some("t")).await.unwrap();
        conn.close("changed my mind");

        match conn.next_event().await {
            Some(ConnectionEvent::Closed(info)) => assert!(info.is_normal()),
            other => panic!("unexpected event: {other:?}"),
        }
        let mut peer = server.accept().await;
        assert!(peer.recv_text().await.is_none());
    }

    #[tokio::test]
    async fn abnormal_peer_close_is_reported() {
        let mut server = TestServer::start().await;
        let mut conn = Connection::connect(&server.resolver(), Some("t")).await.unwrap();
        assert!(matches!(conn.next_event().await, Some(ConnectionEvent::Opened)));
        let peer = server.accept().await;

        peer.close(4001, "session expired");
        match conn.next_event().await {
            Some(ConnectionEvent::Closed(info)) => {
                assert_eq!(info.code, 4001);
                assert_eq!(info.reason, "session expired");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn handshake_failure_is_reported() {
        let endpoint = crate::testing::dead_endpoint().await;
        let mut conn = Connection::open(endpoint);
        match conn.next_event().await {
            Some(ConnectionEvent::Failed(ShellError::Handshake(_))) => {}
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(conn.state(), ConnectionState::Closed);
    }
}
