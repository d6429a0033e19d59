//! Test doubles: a loopback shell host, a recording renderer, resizable host
//! views and a recording URL opener.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, accept_hdr_async};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use shellmux_core::codec::decode_frame;
use shellmux_core::error::ShellResult;
use shellmux_core::frames::{ClientFrame, Dimensions};

use crate::controller::UrlOpener;
use crate::endpoint::{ConfigFetcher, Endpoint, EndpointResolver, PageLocation, ServerConfig};
use crate::terminal::{CellSize, HostId, HostView, Renderer, SurfaceConfig, TerminalBinder, ViewportSize};

const WAIT: Duration = Duration::from_secs(5);

// ── Shell host ──────────────────────────────────────────────────────────

/// A loopback WebSocket server standing in for the shell host.
pub struct TestServer {
    port: u16,
    peers: mpsc::UnboundedReceiver<Peer>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
        let port = listener.local_addr().expect("local addr").port();
        let (tx, peers) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(peer) = Peer::handshake(stream).await {
                        let _ = tx.send(peer);
                    }
                });
            }
        });
        Self { port, peers, task }
    }

    /// A resolver whose configured URL points at this server.
    pub fn resolver(&self) -> EndpointResolver {
        let base = format!("ws://127.0.0.1:{}", self.port);
        let page = PageLocation::parse(&format!("http://127.0.0.1:{}", self.port)).expect("page url");
        EndpointResolver::new(Box::new(StaticConfig(base)), page)
    }

    /// The next client that completed the handshake.
    pub async fn accept(&mut self) -> Peer {
        timeout(WAIT, self.peers.recv())
            .await
            .expect("client connected in time")
            .expect("server running")
    }

    /// Assert no client connects within a short window.
    pub async fn expect_no_connection(&mut self) {
        let waited = timeout(Duration::from_millis(100), self.peers.recv()).await;
        assert!(waited.is_err(), "unexpected client connection");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// The server side of one accepted socket.
pub struct Peer {
    /// Request URI of the handshake, query included.
    pub uri: String,
    outgoing: mpsc::UnboundedSender<Message>,
    incoming: mpsc::UnboundedReceiver<String>,
}

impl Peer {
    async fn handshake(stream: TcpStream) -> Option<Self> {
        let mut uri = String::new();
        let ws = accept_hdr_async(stream, |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            uri = req.uri().to_string();
            Ok(resp)
        })
        .await
        .ok()?;

        let (mut sink, mut stream) = ws.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let (incoming_tx, incoming) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });
        // Keeps reading past a close frame so the close reply is flushed;
        // the channel ends once the socket is gone.
        tokio::spawn(async move {
            while let Some(Ok(msg)) = stream.next().await {
                if let Message::Text(text) = msg {
                    let _ = incoming_tx.send(text.to_string());
                }
            }
        });

        Some(Self { uri, outgoing, incoming })
    }

    /// Next text message, or `None` once the socket has closed.
    pub async fn recv_text(&mut self) -> Option<String> {
        timeout(WAIT, self.incoming.recv()).await.expect("message in time")
    }

    /// Next client frame.
    pub async fn recv_frame(&mut self) -> ClientFrame {
        let text = self.recv_text().await.expect("socket still open");
        decode_frame(&text).expect("well-formed client frame")
    }

    pub fn send_text(&self, text: &str) {
        let _ = self.outgoing.send(Message::Text(text.to_string().into()));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.outgoing.send(Message::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        })));
    }
}

struct StaticConfig(String);

impl ConfigFetcher for StaticConfig {
    fn fetch_config<'a>(
        &'a self,
        _token: &'a str,
    ) -> Pin<Box<dyn Future<Output = ShellResult<ServerConfig>> + Send + 'a>> {
        let config = ServerConfig { ws_url: self.0.clone() };
        Box::pin(async move { Ok(config) })
    }
}

struct NoFetch;

impl ConfigFetcher for NoFetch {
    fn fetch_config<'a>(
        &'a self,
        _token: &'a str,
    ) -> Pin<Box<dyn Future<Output = ShellResult<ServerConfig>> + Send + 'a>> {
        panic!("config must not be fetched")
    }
}

/// A resolver that panics if it is ever asked to resolve.
pub fn unreachable_resolver() -> EndpointResolver {
    let page = PageLocation::parse("http://127.0.0.1:9").expect("page url");
    EndpointResolver::new(Box::new(NoFetch), page)
}

async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    listener.local_addr().expect("local addr").port()
}

/// An endpoint nothing listens on.
pub async fn dead_endpoint() -> Endpoint {
    let port = dead_port().await;
    Endpoint::build(&format!("ws://127.0.0.1:{port}"), "/shell", "t").expect("endpoint")
}

/// A resolver pointing at a port nothing listens on.
pub async fn dead_resolver() -> EndpointResolver {
    let port = dead_port().await;
    let page = PageLocation::parse(&format!("http://127.0.0.1:{port}")).expect("page url");
    EndpointResolver::new(Box::new(StaticConfig(format!("ws://127.0.0.1:{port}"))), page)
}

/// A resolver whose host completes the handshake, reads the first frame,
/// then drops the stream without a close frame.
pub async fn dropping_resolver() -> EndpointResolver {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else { return };
        let Ok(mut ws) = accept_async(stream).await else { return };
        let _ = timeout(WAIT, ws.next()).await;
    });
    let page = PageLocation::parse(&format!("http://127.0.0.1:{port}")).expect("page url");
    EndpointResolver::new(Box::new(StaticConfig(format!("ws://127.0.0.1:{port}"))), page)
}

// ── Rendering ───────────────────────────────────────────────────────────

/// What one recording renderer has seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Screen {
    pub output: String,
    pub clears: usize,
    pub resizes: Vec<Dimensions>,
    pub attached: Option<HostId>,
    pub detached: Vec<HostId>,
    pub font_sizes: Vec<u16>,
    pub disposed: bool,
}

/// Shared log of every renderer created in a test, in creation order.
#[derive(Clone, Default)]
pub struct Screens(Rc<RefCell<Vec<Screen>>>);

impl Screens {
    pub fn get(&self, index: usize) -> Screen {
        self.0.borrow()[index].clone()
    }

    pub fn all(&self) -> Vec<Screen> {
        self.0.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }
}

/// Renderer that records every call. Cells are 10x20 pixels.
pub struct RecordingRenderer {
    screens: Screens,
    index: usize,
}

impl RecordingRenderer {
    pub fn new(screens: &Screens) -> Self {
        let mut all = screens.0.borrow_mut();
        all.push(Screen::default());
        Self {
            screens: screens.clone(),
            index: all.len() - 1,
        }
    }

    fn screen(&self) -> std::cell::RefMut<'_, Screen> {
        std::cell::RefMut::map(self.screens.0.borrow_mut(), |all| &mut all[self.index])
    }
}

impl Renderer for RecordingRenderer {
    fn write(&mut self, data: &str) {
        self.screen().output.push_str(data);
    }

    fn clear(&mut self) {
        self.screen().clears += 1;
    }

    fn resize(&mut self, dims: Dimensions) {
        self.screen().resizes.push(dims);
    }

    fn attach(&mut self, host: HostId) {
        self.screen().attached = Some(host);
    }

    fn detach(&mut self, host: HostId) {
        let mut screen = self.screen();
        screen.detached.push(host);
        if screen.attached == Some(host) {
            screen.attached = None;
        }
    }

    fn set_font_size(&mut self, px: u16) {
        self.screen().font_sizes.push(px);
    }

    fn cell_size(&self, _font_size: u16) -> CellSize {
        CellSize { width: 10, height: 20 }
    }

    fn dispose(&mut self) {
        self.screen().disposed = true;
    }
}

/// A binder whose surfaces record into `screens`.
pub fn recording_binder(screens: &Screens) -> TerminalBinder {
    let screens = screens.clone();
    TerminalBinder::new(SurfaceConfig::default(), move |_| {
        Box::new(RecordingRenderer::new(&screens)) as Box<dyn Renderer>
    })
}

/// A host view with a settable size.
#[derive(Clone)]
pub struct TestHost {
    id: u64,
    size: Rc<Cell<ViewportSize>>,
}

impl TestHost {
    pub fn new(id: u64, width: u32, height: u32) -> Self {
        Self {
            id,
            size: Rc::new(Cell::new(ViewportSize::new(width, height))),
        }
    }

    pub fn set_size(&self, width: u32, height: u32) {
        self.size.set(ViewportSize::new(width, height));
    }
}

impl HostView for TestHost {
    fn id(&self) -> HostId {
        HostId(self.id)
    }

    fn viewport(&self) -> ViewportSize {
        self.size.get()
    }
}

/// Records every URL it is asked to open.
#[derive(Clone, Default)]
pub struct RecordingOpener(Rc<RefCell<Vec<String>>>);

impl RecordingOpener {
    pub fn opened(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

impl UrlOpener for RecordingOpener {
    fn open_url(&self, url: &str) {
        self.0.borrow_mut().push(url.to_string());
    }
}
