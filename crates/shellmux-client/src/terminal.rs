//! Terminal binder: surfaces, host views, and fitting.
//!
//! A `TerminalSurface` wraps an opaque `Renderer` (buffer, cursor,
//! scrollback, drawing) together with its configuration and current size.
//! A surface is attached to at most one `HostView` at a time. Fitting is
//! never automatic: callers fit after attach, after a host resize, and
//! after a font change.

use serde::{Deserialize, Serialize};
use tracing::debug;

use shellmux_core::frames::Dimensions;

use crate::palette::Palette;

/// Clear screen and move the cursor home.
pub const RESET_SCREEN: &str = "\x1b[2J\x1b[H";

pub const MIN_FONT_SIZE: u16 = 8;
pub const MAX_FONT_SIZE: u16 = 24;

/// Fewest columns a fit will produce.
pub const MIN_COLS: u16 = 2;
/// Fewest rows a fit will produce.
pub const MIN_ROWS: u16 = 1;

/// Identity of a host view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostId(pub u64);

/// Measured size of a host view, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

impl ViewportSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Size of one glyph cell, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellSize {
    pub width: u32,
    pub height: u32,
}

/// The view a surface renders into.
pub trait HostView {
    fn id(&self) -> HostId;

    /// Current size; zero while hidden.
    fn viewport(&self) -> ViewportSize;
}

/// The rendering side of a terminal surface.
pub trait Renderer {
    /// Feed output bytes to the terminal buffer.
    fn write(&mut self, data: &str);

    /// Drop the scrollback, keeping the current line.
    fn clear(&mut self);

    fn resize(&mut self, dims: Dimensions);

    /// Start drawing into `host`.
    fn attach(&mut self, host: HostId);

    /// Stop drawing into `host`.
    fn detach(&mut self, host: HostId);

    fn set_font_size(&mut self, _px: u16) {}

    /// Glyph cell metrics for a font size.
    fn cell_size(&self, font_size: u16) -> CellSize {
        let px = u32::from(font_size.max(1));
        CellSize {
            width: (px * 3).div_ceil(5),
            height: (px * 6).div_ceil(5),
        }
    }

    /// Release drawing resources. The surface is not used afterwards.
    fn dispose(&mut self) {}
}

/// Configuration for new surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub font_size: u16,
    pub font_family: String,
    /// Scrollback depth in lines.
    pub scrollback: u32,
    pub cursor_blink: bool,
    pub convert_eol: bool,
    pub tab_stop_width: u8,
    pub palette: Palette,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            font_size: 14,
            font_family: "Menlo, Monaco, \"Courier New\", monospace".to_string(),
            scrollback: 10_000,
            cursor_blink: true,
            convert_eol: true,
            tab_stop_width: 4,
            palette: Palette::default(),
        }
    }
}

/// Clamp a requested font size to the supported range.
pub fn clamp_font_size(px: u16) -> u16 {
    px.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE)
}

/// One terminal surface: renderer, configuration, size, and host binding.
pub struct TerminalSurface {
    renderer: Box<dyn Renderer>,
    config: SurfaceConfig,
    dims: Dimensions,
    host: Option<HostId>,
}

impl TerminalSurface {
    pub fn new(renderer: Box<dyn Renderer>, config: SurfaceConfig) -> Self {
        Self {
            renderer,
            config,
            dims: Dimensions::default(),
            host: None,
        }
    }

    /// Size from the most recent fit.
    pub fn dimensions(&self) -> Dimensions {
        self.dims
    }

    pub fn host(&self) -> Option<HostId> {
        self.host
    }

    pub fn font_size(&self) -> u16 {
        self.config.font_size
    }

    pub fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    pub fn write(&mut self, data: &str) {
        self.renderer.write(data);
    }

    pub fn clear(&mut self) {
        self.renderer.clear();
    }

    /// Clear and home the cursor.
    pub fn reset_screen(&mut self) {
        self.renderer.clear();
        self.renderer.write(RESET_SCREEN);
    }

    /// Write a bold red message on its own line.
    pub fn write_error(&mut self, message: &str) {
        self.renderer.write(&format!("\x1b[1;31m{message}\x1b[0m\r\n"));
    }

    /// Change the font size (clamped). Returns the size applied.
    ///
    /// The surface must be refit afterwards.
    pub fn set_font_size(&mut self, px: u16) -> u16 {
        let px = clamp_font_size(px);
        if px != self.config.font_size {
            self.config.font_size = px;
            self.renderer.set_font_size(px);
        }
        px
    }

    /// Stop drawing into the current host, keeping buffer and scrollback.
    pub fn detach(&mut self) {
        if let Some(host) = self.host.take() {
            self.renderer.detach(host);
        }
    }

    /// Detach from the current host and release the renderer.
    pub fn dispose(mut self) {
        self.detach();
        self.renderer.dispose();
    }
}

/// Creates surfaces and binds them to host views.
pub struct TerminalBinder {
    config: SurfaceConfig,
    factory: Box<dyn FnMut(&SurfaceConfig) -> Box<dyn Renderer>>,
}

impl TerminalBinder {
    pub fn new(
        config: SurfaceConfig,
        factory: impl FnMut(&SurfaceConfig) -> Box<dyn Renderer> + 'static,
    ) -> Self {
        Self {
            config,
            factory: Box::new(factory),
        }
    }

    pub fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    /// Allocate a new, unattached surface.
    pub fn create_surface(&mut self) -> TerminalSurface {
        let renderer = (self.factory)(&self.config);
        TerminalSurface::new(renderer, self.config.clone())
    }

    /// Bind `surface` to `host`, detaching it from any previous host first.
    pub fn attach(&self, surface: &mut TerminalSurface, host: &dyn HostView) {
        let id = host.id();
        if surface.host == Some(id) {
            return;
        }
        if let Some(previous) = surface.host.take() {
            debug!(from = previous.0, to = id.0, "moving surface to new host");
            surface.renderer.detach(previous);
        }
        surface.renderer.attach(id);
        surface.host = Some(id);
    }

    /// Recompute the surface's rows and columns from the host size.
    ///
    /// A hidden (zero-size) host leaves the current dimensions unchanged.
    pub fn fit(&self, surface: &mut TerminalSurface, host: &dyn HostView) -> Dimensions {
        let viewport = host.viewport();
        if viewport.is_empty() {
            debug!(host = host.id().0, "host not measurable, keeping dimensions");
            return surface.dims;
        }
        let cell = surface.renderer.cell_size(surface.config.font_size);
        let cols = viewport.width / cell.width.max(1);
        let rows = viewport.height / cell.height.max(1);
        let dims = Dimensions::new(
            clamp_cells(cols).max(MIN_COLS),
            clamp_cells(rows).max(MIN_ROWS),
        );
        if dims != surface.dims {
            debug!(cols = dims.cols, rows = dims.rows, "surface fitted");
            surface.dims = dims;
            surface.renderer.resize(dims);
        }
        dims
    }
}

fn clamp_cells(n: u32) -> u16 {
    u16::try_from(n).unwrap_or(u16::MAX)
}
