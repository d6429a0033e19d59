//! shellmux-client: persistent terminal sessions over WebSocket.
//!
//! A `SessionController` mounts a project session onto a host view, connects
//! it to the shell host on request, and parks it in a shared
//! `SessionRegistry` when unmounted so the next mount resumes the same
//! surface and socket.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::rc::Rc;
//! use shellmux_client::{
//!     EndpointResolver, HttpConfigFetcher, PageLocation, SessionController, SessionRegistry,
//!     StaticToken, TerminalBinder, Timing,
//! };
//! use shellmux_core::{MountTarget, Project};
//! # use shellmux_client::{HostView, Renderer, SurfaceConfig, UrlOpener};
//!
//! # async fn example(
//! #     host: Rc<dyn HostView>,
//! #     make_renderer: fn(&SurfaceConfig) -> Box<dyn Renderer>,
//! #     opener: Box<dyn UrlOpener>,
//! # ) -> shellmux_core::ShellResult<()> {
//! let resolver = EndpointResolver::new(
//!     Box::new(HttpConfigFetcher::new("https://dev.example.com/api/config")),
//!     PageLocation::parse("https://dev.example.com")?,
//! );
//! let mut ctl = SessionController::new(
//!     SessionRegistry::new(),
//!     TerminalBinder::new(SurfaceConfig::default(), make_renderer),
//!     resolver,
//!     Box::new(StaticToken::new("token")),
//!     opener,
//!     Timing::default(),
//! );
//!
//! ctl.mount(MountTarget::new(Project::new("demo", "/work/demo"), None), host).await?;
//! ctl.connect().await?;
//! while ctl.pump().await {}
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod controller;
pub mod endpoint;
pub mod links;
pub mod palette;
pub mod registry;
pub mod terminal;

#[cfg(test)]
mod testing;

pub use connection::{CloseInfo, Connection, ConnectionEvent, ConnectionState};
pub use controller::{SessionController, SessionState, StaticToken, Timing, TokenProvider, UrlOpener};
pub use endpoint::{
    ConfigFetcher, Endpoint, EndpointConfig, EndpointResolver, HttpConfigFetcher, PageLocation,
};
pub use registry::{SessionRecord, SessionRegistry, SessionSlot};
pub use terminal::{HostId, HostView, Renderer, SurfaceConfig, TerminalBinder, TerminalSurface, ViewportSize};

pub use shellmux_core::{ShellError, ShellResult};
