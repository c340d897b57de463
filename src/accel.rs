// src/accel.rs
//! Native primitive handlers for the VideoCore variant.
//!
//! These operate directly on the linear surface. Anything not listed in
//! `native_handler` is left to the software rasterizer.

use crate::dispatch::{NativeHandler, PrimitiveArgs, PrimitiveOp, PrimitiveReply, SizeClass};
use crate::error::{DriverError, DriverResult};
use crate::surface::Surface;
use log::trace;

/// Largest cursor image the hardware can display.
pub const MAX_CURSOR_SIZE: u32 = 64;

/// Largest pixmap dimension accepted by the protocol.
const MAX_PIXMAP_DIMENSION: u32 = 32767;

const TILE_ALIGN: u16 = 8;

pub fn native_handler(op: PrimitiveOp) -> Option<NativeHandler> {
    let handler: NativeHandler = match op {
        PrimitiveOp::FillRectangle => fill_rectangle,
        PrimitiveOp::CopyArea => copy_area,
        PrimitiveOp::CreatePixmap => create_pixmap,
        PrimitiveOp::DestroyPixmap => destroy_pixmap,
        PrimitiveOp::CreateGc => create_gc,
        PrimitiveOp::QueryBestSize => query_best_size,
        PrimitiveOp::RealizeCursor => realize_cursor,
        PrimitiveOp::SetCursorPosition => set_cursor_position,
        PrimitiveOp::DisplayCursor => display_cursor,
        _ => return None,
    };
    Some(handler)
}

fn rejected(op: PrimitiveOp, reason: impl Into<String>) -> DriverError {
    DriverError::PrimitiveRejected {
        op,
        reason: reason.into(),
    }
}

pub fn fill_rectangle(surface: &mut Surface<'_>, args: &PrimitiveArgs<'_>) -> DriverResult<PrimitiveReply> {
    let PrimitiveArgs::Fill { pixel, rects } = *args else {
        return Err(rejected(PrimitiveOp::FillRectangle, "expected fill arguments"));
    };
    let bpp = surface.bytes_per_pixel();
    let stride = surface.stride();
    let (width, height) = (surface.width(), surface.height());
    let bytes = pixel.to_le_bytes();
    let pattern = &bytes[..bpp.min(4)];

    for rect in rects {
        let Some((x, y, w, h)) = rect.clip_to(width, height) else {
            continue;
        };
        let pixels = surface.pixels_mut();
        for row in y..y + h {
            let start = row * stride + x * bpp;
            for px in pixels[start..start + w * bpp].chunks_exact_mut(bpp) {
                px[..pattern.len()].copy_from_slice(pattern);
            }
        }
    }
    trace!("RPI: native fill of {} rect(s) with {:#x}", rects.len(), pixel);
    Ok(PrimitiveReply::Done)
}

pub fn copy_area(surface: &mut Surface<'_>, args: &PrimitiveArgs<'_>) -> DriverResult<PrimitiveReply> {
    let PrimitiveArgs::Copy { src, dst } = *args else {
        return Err(rejected(PrimitiveOp::CopyArea, "expected copy arguments"));
    };
    let bpp = surface.bytes_per_pixel();
    let stride = surface.stride();
    let (width, height) = (surface.width(), surface.height());

    // Clip the source, then shift the destination by however much was cut.
    let Some((sx, sy, w, h)) = src.clip_to(width, height) else {
        return Ok(PrimitiveReply::Done);
    };
    // The shifted origin can leave i32 range, so the destination is clipped
    // in i64 without narrowing.
    let dx0 = dst.x as i64 + (sx as i64 - src.x as i64);
    let dy0 = dst.y as i64 + (sy as i64 - src.y as i64);
    let (dx, dy) = (dx0.max(0), dy0.max(0));
    let dx1 = (dx0 + w as i64).min(width as i64);
    let dy1 = (dy0 + h as i64).min(height as i64);
    if dx1 <= dx || dy1 <= dy {
        return Ok(PrimitiveReply::Done);
    }
    let (w, h) = ((dx1 - dx) as usize, (dy1 - dy) as usize);
    let sx = sx + (dx - dx0) as usize;
    let sy = sy + (dy - dy0) as usize;
    let (dx, dy) = (dx as usize, dy as usize);

    let pixels = surface.pixels_mut();
    let row_bytes = w * bpp;
    for i in 0..h {
        // Overlapping copies downwards must walk rows bottom-up.
        let row = if dy > sy { h - 1 - i } else { i };
        let from = (sy + row) * stride + sx * bpp;
        let to = (dy + row) * stride + dx * bpp;
        pixels.copy_within(from..from + row_bytes, to);
    }
    trace!("RPI: native copy {}x{} ({},{}) -> ({},{})", w, h, sx, sy, dx, dy);
    Ok(PrimitiveReply::Done)
}

pub fn create_pixmap(surface: &mut Surface<'_>, args: &PrimitiveArgs<'_>) -> DriverResult<PrimitiveReply> {
    let PrimitiveArgs::Pixmap {
        width,
        height,
        depth,
    } = *args
    else {
        return Err(rejected(PrimitiveOp::CreatePixmap, "expected pixmap arguments"));
    };
    if width > MAX_PIXMAP_DIMENSION || height > MAX_PIXMAP_DIMENSION {
        return Err(rejected(
            PrimitiveOp::CreatePixmap,
            format!("{}x{} exceeds {}", width, height, MAX_PIXMAP_DIMENSION),
        ));
    }
    if !matches!(depth, 1 | 8 | 16 | 24 | 32) {
        return Err(rejected(PrimitiveOp::CreatePixmap, format!("depth {}", depth)));
    }
    let state = &mut *surface.state;
    state.next_pixmap += 1;
    let id = state.next_pixmap;
    state.live_pixmaps.insert(id);
    trace!("RPI: created pixmap {} ({}x{}x{})", id, width, height, depth);
    Ok(PrimitiveReply::Pixmap {
        id,
        width,
        height,
        depth,
    })
}

pub fn destroy_pixmap(surface: &mut Surface<'_>, args: &PrimitiveArgs<'_>) -> DriverResult<PrimitiveReply> {
    let PrimitiveArgs::DestroyPixmap { id } = *args else {
        return Err(rejected(PrimitiveOp::DestroyPixmap, "expected pixmap id"));
    };
    if !surface.state.live_pixmaps.remove(&id) {
        return Err(rejected(PrimitiveOp::DestroyPixmap, format!("unknown pixmap {}", id)));
    }
    trace!("RPI: destroyed pixmap {}", id);
    Ok(PrimitiveReply::Done)
}

pub fn create_gc(_surface: &mut Surface<'_>, _args: &PrimitiveArgs<'_>) -> DriverResult<PrimitiveReply> {
    trace!("RPI: CreateGC");
    Ok(PrimitiveReply::Done)
}

pub fn query_best_size(_surface: &mut Surface<'_>, args: &PrimitiveArgs<'_>) -> DriverResult<PrimitiveReply> {
    let PrimitiveArgs::BestSize {
        class,
        width,
        height,
    } = *args
    else {
        return Err(rejected(PrimitiveOp::QueryBestSize, "expected size arguments"));
    };
    let (width, height) = match class {
        SizeClass::Cursor => (
            width.min(MAX_CURSOR_SIZE as u16),
            height.min(MAX_CURSOR_SIZE as u16),
        ),
        SizeClass::Tile | SizeClass::Stipple => (align_up(width), align_up(height)),
    };
    Ok(PrimitiveReply::Size { width, height })
}

fn align_up(value: u16) -> u16 {
    let value = value.max(1);
    value
        .checked_next_multiple_of(TILE_ALIGN)
        .unwrap_or(u16::MAX - (u16::MAX % TILE_ALIGN))
}

pub fn realize_cursor(surface: &mut Surface<'_>, args: &PrimitiveArgs<'_>) -> DriverResult<PrimitiveReply> {
    let PrimitiveArgs::Cursor { width, height } = *args else {
        return Err(rejected(PrimitiveOp::RealizeCursor, "expected cursor size"));
    };
    if width == 0 || height == 0 || width > MAX_CURSOR_SIZE || height > MAX_CURSOR_SIZE {
        return Err(rejected(
            PrimitiveOp::RealizeCursor,
            format!("{}x{} cursor exceeds hardware limit", width, height),
        ));
    }
    surface.state.cursor.realized = Some((width, height));
    Ok(PrimitiveReply::Done)
}

pub fn set_cursor_position(surface: &mut Surface<'_>, args: &PrimitiveArgs<'_>) -> DriverResult<PrimitiveReply> {
    let PrimitiveArgs::CursorPosition { x, y } = *args else {
        return Err(rejected(PrimitiveOp::SetCursorPosition, "expected position"));
    };
    let cursor = &mut surface.state.cursor;
    cursor.x = x;
    cursor.y = y;
    Ok(PrimitiveReply::Done)
}

pub fn display_cursor(surface: &mut Surface<'_>, _args: &PrimitiveArgs<'_>) -> DriverResult<PrimitiveReply> {
    let cursor = &mut surface.state.cursor;
    if cursor.realized.is_none() {
        return Err(rejected(PrimitiveOp::DisplayCursor, "no cursor realized"));
    }
    cursor.visible = true;
    Ok(PrimitiveReply::Done)
}
