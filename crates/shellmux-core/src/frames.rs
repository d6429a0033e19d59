//! Frames exchanged with the shell host.
//!
//! Every frame is one JSON text message carrying a `type` tag:
//!
//! | direction | type | payload |
//! |---|---|---|
//! | client → server | `init` | `{projectPath, sessionId?, hasSession, cols, rows}` |
//! | client → server | `input` | `{data}` |
//! | client → server | `resize` | `{cols, rows}` |
//! | server → client | `output` | `{data}` |
//! | server → client | `url_open` | `{url}` |

use serde::{Deserialize, Serialize};

/// Terminal size in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub cols: u16,
    pub rows: u16,
}

impl Dimensions {
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl Default for Dimensions {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// First frame after the socket opens.
    #[serde(rename_all = "camelCase")]
    Init {
        project_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        has_session: bool,
        cols: u16,
        rows: u16,
    },
    /// Keystrokes or pasted text, forwarded verbatim.
    Input { data: String },
    /// Terminal size after a fit.
    Resize { cols: u16, rows: u16 },
}

impl ClientFrame {
    /// Build an `init` frame for the given working directory and session.
    pub fn init(project_path: impl Into<String>, session_id: Option<String>, dims: Dimensions) -> Self {
        Self::Init {
            project_path: project_path.into(),
            has_session: session_id.is_some(),
            session_id,
            cols: dims.cols,
            rows: dims.rows,
        }
    }

    pub fn input(data: impl Into<String>) -> Self {
        Self::Input { data: data.into() }
    }

    pub fn resize(dims: Dimensions) -> Self {
        Self::Resize {
            cols: dims.cols,
            rows: dims.rows,
        }
    }

    /// The wire tag of this frame.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Input { .. } => "input",
            Self::Resize { .. } => "resize",
        }
    }
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Bytes produced by the remote process.
    Output { data: String },
    /// The remote process asks the client to open a URL.
    UrlOpen { url: String },
}
