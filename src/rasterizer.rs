// src/rasterizer.rs
//! Outbound interface to the external software rasterizer.
//!
//! The driver never rasterizes on its own behalf; for anything it does not
//! accelerate it asks the rasterizer for a handler and forwards to it.

use crate::dispatch::{PrimitiveArgs, PrimitiveOp, PrimitiveReply, RasterHandler};
use crate::error::DriverResult;
use crate::surface::Surface;
use log::trace;
use std::rc::Rc;

/// Handler lookup by primitive identifier.
pub trait SoftwareRasterizer {
    /// `None` means the rasterizer has no implementation for `op`.
    fn lookup(&self, op: PrimitiveOp) -> Option<RasterHandler>;
}

/// Rasterizer stand-in used by the demo host: accepts every primitive and
/// only logs it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRasterizer;

impl TracingRasterizer {
    pub fn new() -> Self {
        TracingRasterizer
    }
}

impl SoftwareRasterizer for TracingRasterizer {
    fn lookup(&self, op: PrimitiveOp) -> Option<RasterHandler> {
        let handler: RasterHandler = Rc::new(
            move |surface: &mut Surface<'_>, args: &PrimitiveArgs<'_>| -> DriverResult<PrimitiveReply> {
                trace!("TracingRasterizer: {:?} on {:?} with {:?}", op, surface, args);
                Ok(match (op, *args) {
                    (PrimitiveOp::GetImage, PrimitiveArgs::Image { area, .. }) => {
                        let len = area.width as usize * area.height as usize * surface.bytes_per_pixel();
                        PrimitiveReply::Image(vec![0; len])
                    }
                    (PrimitiveOp::ResolveColor, PrimitiveArgs::Color { red, green, blue }) => {
                        PrimitiveReply::Color { red, green, blue }
                    }
                    _ => PrimitiveReply::Done,
                })
            },
        );
        Some(handler)
    }
}
