// src/surface.rs
//! Drawing surface handed to primitive handlers.
//!
//! A `Surface` is a short-lived view: pixel memory (either the mapped
//! framebuffer or the screen's shadow buffer) plus the per-screen state the
//! handlers are allowed to touch.

use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    /// Intersection with `[0, width) x [0, height)`, as (x, y, w, h) in
    /// surface coordinates. `None` when nothing is left.
    pub fn clip_to(&self, width: u32, height: u32) -> Option<(usize, usize, usize, usize)> {
        let x0 = (self.x as i64).max(0);
        let y0 = (self.y as i64).max(0);
        let x1 = (self.x as i64 + self.width as i64).min(width as i64);
        let y1 = (self.y as i64 + self.height as i64).min(height as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((
            x0 as usize,
            y0 as usize,
            (x1 - x0) as usize,
            (y1 - y0) as usize,
        ))
    }
}

/// Hardware cursor bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CursorState {
    pub x: i32,
    pub y: i32,
    pub visible: bool,
    /// Size of the realized cursor image, if any.
    pub realized: Option<(u32, u32)>,
}

/// Mutable per-screen state reachable from handlers.
#[derive(Debug, Clone, Default)]
pub struct SurfaceState {
    pub cursor: CursorState,
    /// Last pixmap id handed out; ids are never reused.
    pub next_pixmap: u32,
    pub live_pixmaps: BTreeSet<u32>,
    /// Drawing operations since the last wakeup flush.
    pub damage: u32,
}

pub struct Surface<'a> {
    pixels: &'a mut [u8],
    width: u32,
    height: u32,
    stride: usize,
    bytes_per_pixel: usize,
    pub state: &'a mut SurfaceState,
}

impl<'a> Surface<'a> {
    /// `pixels` must hold at least `stride * height` bytes; a shorter slice is
    /// treated as covering only its complete rows.
    pub fn new(
        pixels: &'a mut [u8],
        width: u32,
        height: u32,
        bytes_per_pixel: usize,
        state: &'a mut SurfaceState,
    ) -> Self {
        let stride = width as usize * bytes_per_pixel;
        let rows = if stride == 0 { 0 } else { pixels.len() / stride };
        Surface {
            pixels,
            width,
            height: height.min(rows as u32),
            stride,
            bytes_per_pixel,
            state,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.bytes_per_pixel
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut *self.pixels
    }

    /// Reads one pixel, little-endian, zero-extended.
    pub fn pixel_at(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.stride + x as usize * self.bytes_per_pixel;
        let mut bytes = [0u8; 4];
        let n = self.bytes_per_pixel.min(4);
        bytes[..n].copy_from_slice(&self.pixels[offset..offset + n]);
        Some(u32::from_le_bytes(bytes))
    }
}

impl fmt::Debug for Surface<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("bytes_per_pixel", &self.bytes_per_pixel)
            .finish()
    }
}
