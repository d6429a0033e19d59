//! The local terminal as a host view and renderer.
//!
//! The local terminal already keeps its own buffer and scrollback, so the
//! renderer passes output straight through. Sizes are measured in character
//! cells: the window reports its size in cells and each glyph is one cell.

use std::io::{self, Write};

use anyhow::{Context, Result};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{self, Clear, ClearType};
use tracing::{trace, warn};

use shellmux_client::terminal::CellSize;
use shellmux_client::{HostId, HostView, Renderer, ViewportSize};
use shellmux_core::Dimensions;

/// RAII guard that restores the terminal to cooked mode on drop.
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    pub fn enter() -> Result<Self> {
        terminal::enable_raw_mode().context("failed to enable raw terminal mode")?;
        Ok(Self { _private: () })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// The window the CLI runs in.
pub struct TerminalWindow;

impl HostView for TerminalWindow {
    fn id(&self) -> HostId {
        HostId(0)
    }

    fn viewport(&self) -> ViewportSize {
        match terminal::size() {
            Ok((cols, rows)) => ViewportSize::new(u32::from(cols), u32::from(rows)),
            Err(e) => {
                warn!("cannot read terminal size: {e}");
                ViewportSize::default()
            }
        }
    }
}

/// Writes session output to stdout.
#[derive(Default)]
pub struct StdoutRenderer;

impl Renderer for StdoutRenderer {
    fn write(&mut self, data: &str) {
        let mut out = io::stdout().lock();
        if let Err(e) = out.write_all(data.as_bytes()).and_then(|()| out.flush()) {
            warn!("stdout write failed: {e}");
        }
    }

    fn clear(&mut self) {
        if let Err(e) = crossterm::execute!(io::stdout(), Clear(ClearType::Purge)) {
            warn!("clearing scrollback failed: {e}");
        }
    }

    fn resize(&mut self, dims: Dimensions) {
        trace!(cols = dims.cols, rows = dims.rows, "window fitted");
    }

    fn attach(&mut self, _host: HostId) {}

    fn detach(&mut self, _host: HostId) {}

    fn cell_size(&self, _font_size: u16) -> CellSize {
        CellSize { width: 1, height: 1 }
    }
}

/// Ctrl+] leaves the session.
pub fn is_escape(event: &KeyEvent) -> bool {
    event.modifiers.contains(KeyModifiers::CONTROL) && event.code == KeyCode::Char(']')
}

/// Convert a key event to the text a terminal would send for it.
pub fn key_event_to_input(event: &KeyEvent) -> Option<String> {
    let seq = match event.code {
        KeyCode::Char(c) => {
            if event.modifiers.contains(KeyModifiers::CONTROL) && c.is_ascii_alphabetic() {
                // Ctrl+A = 0x01 ... Ctrl+Z = 0x1a
                let byte = (c.to_ascii_lowercase() as u8) - b'a' + 1;
                return Some(char::from(byte).to_string());
            }
            if event.modifiers.contains(KeyModifiers::ALT) {
                return Some(format!("\x1b{c}"));
            }
            return Some(c.to_string());
        }
        KeyCode::Enter => "\r",
        KeyCode::Backspace => "\x7f",
        KeyCode::Tab => "\t",
        KeyCode::BackTab => "\x1b[Z",
        KeyCode::Esc => "\x1b",
        KeyCode::Up => "\x1b[A",
        KeyCode::Down => "\x1b[B",
        KeyCode::Right => "\x1b[C",
        KeyCode::Left => "\x1b[D",
        KeyCode::Home => "\x1b[H",
        KeyCode::End => "\x1b[F",
        KeyCode::PageUp => "\x1b[5~",
        KeyCode::PageDown => "\x1b[6~",
        KeyCode::Insert => "\x1b[2~",
        KeyCode::Delete => "\x1b[3~",
        KeyCode::F(n) => match n {
            1 => "\x1bOP",
            2 => "\x1bOQ",
            3 => "\x1bOR",
            4 => "\x1bOS",
            5 => "\x1b[15~",
            6 => "\x1b[17~",
            7 => "\x1b[18~",
            8 => "\x1b[19~",
            9 => "\x1b[20~",
            10 => "\x1b[21~",
            11 => "\x1b[23~",
            12 => "\x1b[24~",
            _ => return None,
        },
        _ => return None,
    };
    Some(seq.to_string())
}
