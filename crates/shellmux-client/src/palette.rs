//! Fixed terminal color palette.
//!
//! Theme colors, the 16 ANSI colors, and a 16-entry extended table that
//! stands in for the 256-color range. Every color is a table lookup.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A 24-bit color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const fn hex(value: u32) -> Self {
        Self((value >> 16) as u8, (value >> 8) as u8, value as u8)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Palette {
    pub background: Rgb,
    pub foreground: Rgb,
    pub cursor: Rgb,
    pub cursor_accent: Rgb,
    pub selection: Rgb,
    pub selection_foreground: Rgb,
    /// black, red, green, yellow, blue, magenta, cyan, white, then the
    /// bright variants in the same order.
    pub ansi: [Rgb; 16],
    /// Approximation table for indices 16..=255.
    pub extended: [Rgb; 16],
}

impl Palette {
    /// Color for an SGR palette index.
    pub fn color(&self, index: u8) -> Rgb {
        match index {
            0..=15 => self.ansi[index as usize],
            _ => self.extended[(index as usize - 16) % self.extended.len()],
        }
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            background: Rgb::hex(0x1e1e1e),
            foreground: Rgb::hex(0xd4d4d4),
            cursor: Rgb::hex(0xffffff),
            cursor_accent: Rgb::hex(0x1e1e1e),
            selection: Rgb::hex(0x264f78),
            selection_foreground: Rgb::hex(0xffffff),
            ansi: [
                Rgb::hex(0x000000),
                Rgb::hex(0xcd3131),
                Rgb::hex(0x0dbc79),
                Rgb::hex(0xe5e510),
                Rgb::hex(0x2472c8),
                Rgb::hex(0xbc3fbc),
                Rgb::hex(0x11a8cd),
                Rgb::hex(0xe5e5e5),
                Rgb::hex(0x666666),
                Rgb::hex(0xf14c4c),
                Rgb::hex(0x23d18b),
                Rgb::hex(0xf5f543),
                Rgb::hex(0x3b8eea),
                Rgb::hex(0xd670d6),
                Rgb::hex(0x29b8db),
                Rgb::hex(0xffffff),
            ],
            extended: [
                Rgb::hex(0x000000),
                Rgb::hex(0x800000),
                Rgb::hex(0x008000),
                Rgb::hex(0x808000),
                Rgb::hex(0x000080),
                Rgb::hex(0x800080),
                Rgb::hex(0x008080),
                Rgb::hex(0xc0c0c0),
                Rgb::hex(0x808080),
                Rgb::hex(0xff0000),
                Rgb::hex(0x00ff00),
                Rgb::hex(0xffff00),
                Rgb::hex(0x0000ff),
                Rgb::hex(0xff00ff),
                Rgb::hex(0x00ffff),
                Rgb::hex(0xffffff),
            ],
        }
    }
}
