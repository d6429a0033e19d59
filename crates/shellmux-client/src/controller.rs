//! Session controller.
//!
//! Binds one mount target (project plus optional session) to a terminal
//! surface and at most one live connection, and drives the session state
//! machine:
//!
//! ```text
//! NoSurface ──mount──▶ Initialized ──connect──▶ Connecting ──open──▶ Connected
//!     ▲                    ▲                         │                  │
//!     │                    └──────── connect ─── Disconnected ◀─────────┘
//!     └── unmount / switch_session / restart                disconnect, peer close
//! ```
//!
//! Connecting is always an explicit call. Unmounting parks the surface and
//! connection in the shared [`SessionRegistry`] so a later mount of the same
//! key resumes where it left off. Inbound connection events are handled by
//! [`SessionController::pump`] (or [`next_event`](SessionController::next_event)
//! plus [`handle_event`](SessionController::handle_event) from a `select!`).

use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

use shellmux_core::error::{ShellError, ShellResult};
use shellmux_core::frames::{ClientFrame, Dimensions, ServerFrame};
use shellmux_core::key::{MountTarget, SessionKey};

use crate::connection::{CloseInfo, Connection, ConnectionEvent, ConnectionState};
use crate::endpoint::EndpointResolver;
use crate::links::detect_urls;
use crate::registry::{SessionRecord, SessionRegistry, SessionSlot};
use crate::terminal::{HostView, TerminalBinder, TerminalSurface};

const AUTH_REQUIRED: &str = "Authentication required. Please log in first.";

/// Where the controller is in the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing mounted.
    NoSurface,
    /// A surface is mounted; no connection has been made yet.
    Initialized,
    /// Socket opening.
    Connecting,
    Connected,
    /// A connection existed and has ended.
    Disconnected,
}

/// Settling delays, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// After attach or a font change, before fitting.
    pub layout_settle_ms: u64,
    /// After reattaching a parked surface or showing a hidden one.
    pub reattach_settle_ms: u64,
    /// After the socket opens, before the first fit.
    pub open_settle_ms: u64,
    /// Between the first fit and the `init` frame.
    pub init_delay_ms: u64,
    /// Between `init` and the confirming `resize`.
    pub resize_delay_ms: u64,
    /// After a restart, before the next mount may run.
    pub restart_settle_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            layout_settle_ms: 50,
            reattach_settle_ms: 100,
            open_settle_ms: 200,
            init_delay_ms: 50,
            resize_delay_ms: 100,
            restart_settle_ms: 200,
        }
    }
}

impl Timing {
    /// No delays at all.
    pub fn immediate() -> Self {
        Self {
            layout_settle_ms: 0,
            reattach_settle_ms: 0,
            open_settle_ms: 0,
            init_delay_ms: 0,
            resize_delay_ms: 0,
            restart_settle_ms: 0,
        }
    }
}

async fn settle(ms: u64) {
    if ms > 0 {
        sleep(Duration::from_millis(ms)).await;
    }
}

/// Supplies the auth token used at connect time.
pub trait TokenProvider {
    fn token(&self) -> Option<String>;
}

/// A fixed token.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Opens URLs requested by the remote process.
pub trait UrlOpener {
    fn open_url(&self, url: &str);
}

/// Drives one mounted session.
pub struct SessionController {
    registry: SessionRegistry,
    binder: TerminalBinder,
    resolver: EndpointResolver,
    tokens: Box<dyn TokenProvider>,
    opener: Box<dyn UrlOpener>,
    timing: Timing,

    state: SessionState,
    target: Option<MountTarget>,
    host: Option<Rc<dyn HostView>>,
    surface: Option<TerminalSurface>,
    connection: Option<Connection>,
    restart_until: Option<Instant>,
}

impl SessionController {
    pub fn new(
        registry: SessionRegistry,
        binder: TerminalBinder,
        resolver: EndpointResolver,
        tokens: Box<dyn TokenProvider>,
        opener: Box<dyn UrlOpener>,
        timing: Timing,
    ) -> Self {
        Self {
            registry,
            binder,
            resolver,
            tokens,
            opener,
            timing,
            state: SessionState::NoSurface,
            target: None,
            host: None,
            surface: None,
            connection: None,
            restart_until: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether a restart is still settling.
    pub fn is_restarting(&self) -> bool {
        self.restart_until.is_some_and(|until| Instant::now() < until)
    }

    /// Key of the mounted session.
    pub fn key(&self) -> Option<SessionKey> {
        self.target.as_ref().map(MountTarget::key)
    }

    pub fn target(&self) -> Option<&MountTarget> {
        self.target.as_ref()
    }

    pub fn surface(&self) -> Option<&TerminalSurface> {
        self.surface.as_ref()
    }

    /// Size of the mounted surface.
    pub fn dimensions(&self) -> Option<Dimensions> {
        self.surface.as_ref().map(TerminalSurface::dimensions)
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    // ── Mounting ────────────────────────────────────────────────────────

    /// Mount `target` onto `host`.
    ///
    /// A record parked under the target's key is resumed: its surface is
    /// reattached and refit, and a connected session is sent its current
    /// size. Otherwise a fresh surface is created and no socket is opened.
    ///
    /// Mounting another session of the mounted project is a session switch;
    /// mounting another project parks the current session first.
    pub async fn mount(&mut self, target: MountTarget, host: Rc<dyn HostView>) -> ShellResult<()> {
        if let Some(until) = self.restart_until.take() {
            sleep_until(until).await;
        }

        if let Some(current) = &self.target {
            if current.key() == target.key() {
                debug!(key = %target.key(), "already mounted, rebinding host");
                self.host = Some(host);
                return self.reattach().await;
            }
            if current.project.name == target.project.name {
                self.switch_session(target.session.clone())?;
            } else {
                self.unmount();
            }
        }

        let key = target.key();
        let slot = {
            let binder = &mut self.binder;
            self.registry.checkout(&key, || binder.create_surface())
        };

        match slot {
            SessionSlot::Fresh(mut surface) => {
                info!(key = %key, "mounting new session");
                self.binder.attach(&mut surface, host.as_ref());
                self.surface = Some(surface);
                self.connection = None;
                self.host = Some(host);
                self.target = Some(target);
                self.state = SessionState::Initialized;
                settle(self.timing.layout_settle_ms).await;
                self.refit();
            }
            SessionSlot::Reused(record) => {
                let state = match (record.connected, record.connection.as_ref().map(Connection::state)) {
                    (true, _) => SessionState::Connected,
                    (false, Some(ConnectionState::Opening | ConnectionState::Open)) => SessionState::Connecting,
                    _ => SessionState::Initialized,
                };
                info!(key = %key, state = ?state, "resuming parked session");
                self.surface = Some(record.surface);
                self.connection = record.connection;
                self.host = Some(host);
                self.target = Some(target);
                self.state = state;
                self.reattach().await?;
            }
        }
        Ok(())
    }

    /// Attach the surface to the current host, let layout settle, refit and
    /// report the size to a connected peer.
    async fn reattach(&mut self) -> ShellResult<()> {
        let (Some(surface), Some(host)) = (self.surface.as_mut(), self.host.as_ref()) else {
            return Err(ShellError::InvalidState("nothing mounted".into()));
        };
        self.binder.attach(surface, host.as_ref());
        settle(self.timing.reattach_settle_ms).await;
        self.refit_and_report();
        Ok(())
    }

    /// Park the mounted session in the registry under its key.
    ///
    /// The socket stays open; frames arriving meanwhile are delivered after
    /// the next mount of the same key.
    pub fn unmount(&mut self) {
        let target = self.target.take();
        let surface = self.surface.take();
        if let (Some(target), Some(mut surface)) = (target, surface) {
            surface.detach();
            self.registry.put(SessionRecord {
                key: target.key(),
                surface,
                connection: self.connection.take(),
                connected: self.state == SessionState::Connected,
            });
        }
        self.connection = None;
        self.host = None;
        self.state = SessionState::NoSurface;
    }

    /// Bind the mounted project to another session.
    ///
    /// Closes the current socket, discards the current surface, and purges
    /// every parked session of the project. The caller mounts again.
    pub fn switch_session(&mut self, session: Option<String>) -> ShellResult<()> {
        let session = session.filter(|s| !s.is_empty());
        let Some(current) = &self.target else {
            return Err(ShellError::InvalidState("nothing mounted".into()));
        };
        if current.session == session {
            return Ok(());
        }
        let project = current.project.name.clone();
        info!(project = %project, from = ?current.session, to = ?session, "switching session");
        self.discard("session switched");
        self.registry.purge_project(&project);
        Ok(())
    }

    /// Throw away the mounted session and every parked session of its
    /// project. The next mount waits out the settle delay.
    ///
    /// Rejected while connected; disconnect first.
    pub fn restart(&mut self) -> ShellResult<()> {
        if self.state == SessionState::Connected {
            return Err(ShellError::InvalidState("disconnect before restarting".into()));
        }
        let Some(target) = &self.target else {
            return Err(ShellError::InvalidState("nothing mounted".into()));
        };
        let project = target.project.name.clone();
        info!(project = %project, "restarting session");
        self.registry.purge_project(&project);
        self.discard("session restarted");
        self.restart_until = Some(Instant::now() + Duration::from_millis(self.timing.restart_settle_ms));
        Ok(())
    }

    /// Close any socket and dispose the surface; back to `NoSurface`.
    fn discard(&mut self, reason: &str) {
        if let Some(connection) = self.connection.take() {
            connection.close(reason);
        }
        if let Some(surface) = self.surface.take() {
            surface.dispose();
        }
        self.target = None;
        self.host = None;
        self.state = SessionState::NoSurface;
    }

    // ── Connecting ──────────────────────────────────────────────────────

    /// Open a connection for the mounted session.
    ///
    /// Without a token an inline message is written and the state is left
    /// unchanged. Otherwise the controller enters `Connecting`; the
    /// `Opened` event completes the sequence.
    pub async fn connect(&mut self) -> ShellResult<()> {
        match self.state {
            SessionState::Initialized | SessionState::Disconnected => {}
            other => return Err(ShellError::InvalidState(format!("cannot connect while {other:?}"))),
        }
        let token = self.tokens.token();
        match Connection::connect(&self.resolver, token.as_deref()).await {
            Ok(connection) => {
                info!(key = ?self.key().map(|k| k.to_string()), "connecting");
                self.connection = Some(connection);
                self.state = SessionState::Connecting;
                Ok(())
            }
            Err(ShellError::CredentialMissing) => {
                warn!("connect attempted without an auth token");
                self.write_error(AUTH_REQUIRED);
                Err(ShellError::CredentialMissing)
            }
            Err(e) => {
                warn!(error = %e, "connect failed");
                self.write_error(&format!("Failed to connect: {e}"));
                Err(e)
            }
        }
    }

    /// Close the socket and reset the screen.
    pub fn disconnect(&mut self) -> ShellResult<()> {
        if !matches!(self.state, SessionState::Connected | SessionState::Connecting) {
            return Err(ShellError::InvalidState(format!("cannot disconnect while {:?}", self.state)));
        }
        if let Some(connection) = self.connection.take() {
            connection.close("client disconnected");
        }
        if let Some(surface) = self.surface.as_mut() {
            surface.reset_screen();
        }
        info!("disconnected");
        self.state = SessionState::Disconnected;
        Ok(())
    }

    // ── Input and display ───────────────────────────────────────────────

    /// Forward keystrokes or pasted text. Ignored unless connected.
    pub fn input(&self, data: &str) {
        if self.state != SessionState::Connected {
            return;
        }
        if let Some(connection) = &self.connection {
            connection.send(&ClientFrame::input(data));
        }
    }

    /// Send `command` followed by a carriage return.
    pub fn send_raw(&self, command: &str) {
        self.input(&format!("{command}\r"));
    }

    /// Clear the local scrollback. The session is untouched.
    pub fn clear_screen(&mut self) {
        if let Some(surface) = self.surface.as_mut() {
            surface.clear();
        }
    }

    /// Change the font size, refit, and report the new size. Returns the
    /// size applied after clamping.
    pub async fn set_font_size(&mut self, px: u16) -> ShellResult<u16> {
        let surface = self
            .surface
            .as_mut()
            .ok_or_else(|| ShellError::InvalidState("nothing mounted".into()))?;
        let applied = surface.set_font_size(px);
        settle(self.timing.layout_settle_ms).await;
        self.refit_and_report();
        Ok(applied)
    }

    /// The host view changed size. Fits at once, so the frame carries the
    /// size measured when the resize was reported.
    pub fn host_resized(&mut self) -> ShellResult<Dimensions> {
        self.refit_and_report()
            .ok_or_else(|| ShellError::InvalidState("nothing mounted".into()))
    }

    /// The host view became visible again.
    pub async fn activate(&mut self) -> ShellResult<()> {
        if self.surface.is_none() {
            return Err(ShellError::InvalidState("nothing mounted".into()));
        }
        settle(self.timing.reattach_settle_ms).await;
        self.refit_and_report();
        Ok(())
    }

    fn refit(&mut self) -> Option<Dimensions> {
        let host = self.host.as_ref()?;
        let surface = self.surface.as_mut()?;
        Some(self.binder.fit(surface, host.as_ref()))
    }

    /// Refit, and send a `resize` frame if connected.
    fn refit_and_report(&mut self) -> Option<Dimensions> {
        let dims = self.refit()?;
        if self.state == SessionState::Connected {
            self.send(ClientFrame::resize(dims));
        }
        Some(dims)
    }

    fn send(&self, frame: ClientFrame) {
        if let Some(connection) = &self.connection {
            debug!(kind = frame.kind(), "sending frame");
            connection.send(&frame);
        }
    }

    fn write_error(&mut self, message: &str) {
        if let Some(surface) = self.surface.as_mut() {
            surface.write_error(message);
        }
    }

    // ── Events ──────────────────────────────────────────────────────────

    /// Next event from the current connection, or `None` without one.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        match self.connection.as_mut() {
            Some(connection) => connection.next_event().await,
            None => None,
        }
    }

    /// Wait for one connection event and handle it. Returns `false` when
    /// there is no connection to wait on.
    pub async fn pump(&mut self) -> bool {
        match self.next_event().await {
            Some(event) => {
                self.handle_event(event).await;
                true
            }
            None => false,
        }
    }

    pub async fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => self.on_open().await,
            ConnectionEvent::Frame(frame) => self.on_frame(frame),
            ConnectionEvent::Closed(info) => self.on_close(&info),
            ConnectionEvent::Failed(error) => self.on_failure(error),
        }
    }

    /// Socket open: fit, announce the session with `init`, then confirm the
    /// size with `resize`.
    async fn on_open(&mut self) {
        if self.state != SessionState::Connecting {
            debug!(state = ?self.state, "ignoring open outside connect");
            return;
        }
        self.state = SessionState::Connected;
        info!(key = ?self.key().map(|k| k.to_string()), "connected");

        settle(self.timing.open_settle_ms).await;
        let dims = self.refit().unwrap_or_default();
        settle(self.timing.init_delay_ms).await;

        if let Some(target) = &self.target {
            let init = ClientFrame::init(target.project.working_dir(), target.session.clone(), dims);
            self.send(init);
        }

        settle(self.timing.resize_delay_ms).await;
        self.refit_and_report();
    }

    fn on_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::Output { data } => {
                for url in detect_urls(&data) {
                    debug!(url = %url, "url in output");
                }
                if let Some(surface) = self.surface.as_mut() {
                    surface.write(&data);
                }
            }
            ServerFrame::UrlOpen { url } => {
                info!(url = %url, "opening url");
                self.opener.open_url(&url);
            }
        }
    }

    fn on_close(&mut self, info: &CloseInfo) {
        info!(code = info.code, reason = %info.reason, "session closed");
        self.connection = None;
        self.state = SessionState::Disconnected;
        if let Some(surface) = self.surface.as_mut() {
            surface.reset_screen();
            if !info.is_normal() {
                surface.write_error(&close_message(info));
            }
        }
    }

    fn on_failure(&mut self, error: ShellError) {
        warn!(error = %error, "connection failed");
        self.connection = None;
        self.state = SessionState::Disconnected;
        let Some(surface) = self.surface.as_mut() else {
            return;
        };
        match error {
            ShellError::Handshake(reason) => surface.write_error(&format!("Failed to connect: {reason}")),
            ShellError::Transport(reason) => {
                surface.reset_screen();
                surface.write_error(&format!("Connection error: {reason}"));
            }
            other => {
                surface.reset_screen();
                surface.write_error(&format!("Connection error: {other}"));
            }
        }
    }
}

fn close_message(info: &CloseInfo) -> String {
    if info.reason.is_empty() {
        format!("Connection closed: Unknown error (code: {})", info.code)
    } else {
        format!("Connection closed: {}", info.reason)
    }
}
