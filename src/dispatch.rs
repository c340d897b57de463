// src/dispatch.rs
//! Per-screen operation dispatch table.
//!
//! Every primitive identifier maps to exactly one `Slot`: a native handler,
//! a handler forwarded from the software rasterizer, or an explicit
//! `Unsupported` marker. Tables are assembled with `DispatchTableBuilder`,
//! which refuses to finish while any identifier is unassigned, so there is no
//! "null by omission". A finished table is immutable; rebuilding produces a
//! new table.

use crate::accel;
use crate::error::{DriverError, DriverResult};
use crate::rasterizer::SoftwareRasterizer;
use crate::surface::{Point, Rect, Surface};
use bitflags::bitflags;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Drawing primitives and screen-management hooks the host may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrimitiveOp {
    CreatePixmap,
    DestroyPixmap,
    CreateGc,
    QueryBestSize,
    FillRectangle,
    CopyArea,
    CopyPlane,
    PolyPoint,
    PolyLine,
    PolySegment,
    PolyRectangle,
    PolyArc,
    PolyText8,
    PolyText16,
    ImageText8,
    ImageText16,
    PolyGlyphBlt,
    ImageGlyphBlt,
    GetImage,
    PutImage,
    CreateColormap,
    InstallColormap,
    UninstallColormap,
    ResolveColor,
    RealizeCursor,
    SetCursorPosition,
    DisplayCursor,
    CreateWindow,
    RealizeWindow,
    PositionWindow,
    WindowExposures,
}

impl PrimitiveOp {
    pub const COUNT: usize = 31;

    pub const ALL: [PrimitiveOp; PrimitiveOp::COUNT] = [
        PrimitiveOp::CreatePixmap,
        PrimitiveOp::DestroyPixmap,
        PrimitiveOp::CreateGc,
        PrimitiveOp::QueryBestSize,
        PrimitiveOp::FillRectangle,
        PrimitiveOp::CopyArea,
        PrimitiveOp::CopyPlane,
        PrimitiveOp::PolyPoint,
        PrimitiveOp::PolyLine,
        PrimitiveOp::PolySegment,
        PrimitiveOp::PolyRectangle,
        PrimitiveOp::PolyArc,
        PrimitiveOp::PolyText8,
        PrimitiveOp::PolyText16,
        PrimitiveOp::ImageText8,
        PrimitiveOp::ImageText16,
        PrimitiveOp::PolyGlyphBlt,
        PrimitiveOp::ImageGlyphBlt,
        PrimitiveOp::GetImage,
        PrimitiveOp::PutImage,
        PrimitiveOp::CreateColormap,
        PrimitiveOp::InstallColormap,
        PrimitiveOp::UninstallColormap,
        PrimitiveOp::ResolveColor,
        PrimitiveOp::RealizeCursor,
        PrimitiveOp::SetCursorPosition,
        PrimitiveOp::DisplayCursor,
        PrimitiveOp::CreateWindow,
        PrimitiveOp::RealizeWindow,
        PrimitiveOp::PositionWindow,
        PrimitiveOp::WindowExposures,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Primitives a screen cannot come up without.
    pub fn is_core(self) -> bool {
        matches!(
            self,
            PrimitiveOp::CreatePixmap
                | PrimitiveOp::DestroyPixmap
                | PrimitiveOp::CreateGc
                | PrimitiveOp::FillRectangle
                | PrimitiveOp::CopyArea
                | PrimitiveOp::PolyText8
                | PrimitiveOp::PolyText16
                | PrimitiveOp::GetImage
                | PrimitiveOp::PutImage
                | PrimitiveOp::CreateWindow
                | PrimitiveOp::RealizeWindow
                | PrimitiveOp::PositionWindow
        )
    }

    /// Operations that change pixels and therefore produce damage.
    pub fn is_drawing(self) -> bool {
        matches!(
            self,
            PrimitiveOp::FillRectangle
                | PrimitiveOp::CopyArea
                | PrimitiveOp::CopyPlane
                | PrimitiveOp::PolyPoint
                | PrimitiveOp::PolyLine
                | PrimitiveOp::PolySegment
                | PrimitiveOp::PolyRectangle
                | PrimitiveOp::PolyArc
                | PrimitiveOp::PolyText8
                | PrimitiveOp::PolyText16
                | PrimitiveOp::ImageText8
                | PrimitiveOp::ImageText16
                | PrimitiveOp::PolyGlyphBlt
                | PrimitiveOp::ImageGlyphBlt
                | PrimitiveOp::PutImage
                | PrimitiveOp::WindowExposures
        )
    }

    /// The hardware capability a native handler for this op depends on.
    pub fn capability(self) -> Option<NativeCaps> {
        match self {
            PrimitiveOp::FillRectangle => Some(NativeCaps::SOLID_FILL),
            PrimitiveOp::CopyArea => Some(NativeCaps::COPY_AREA),
            PrimitiveOp::CreatePixmap | PrimitiveOp::DestroyPixmap => Some(NativeCaps::PIXMAPS),
            PrimitiveOp::CreateGc => Some(NativeCaps::GC),
            PrimitiveOp::QueryBestSize => Some(NativeCaps::BEST_SIZE),
            PrimitiveOp::RealizeCursor
            | PrimitiveOp::SetCursorPosition
            | PrimitiveOp::DisplayCursor => Some(NativeCaps::HW_CURSOR),
            _ => None,
        }
    }
}

bitflags! {
    /// Native capabilities of a driver variant, fixed at build time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct NativeCaps: u32 {
        const SOLID_FILL = 0x0001;
        const COPY_AREA  = 0x0002;
        const PIXMAPS    = 0x0004;
        const GC         = 0x0008;
        const BEST_SIZE  = 0x0010;
        const HW_CURSOR  = 0x0020;
    }
}

impl Default for NativeCaps {
    fn default() -> Self {
        NativeCaps::all()
    }
}

/// Size class for `QueryBestSize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Cursor,
    Tile,
    Stipple,
}

/// Arguments for one primitive invocation.
#[derive(Debug, Clone, Copy)]
pub enum PrimitiveArgs<'a> {
    None,
    Fill { pixel: u32, rects: &'a [Rect] },
    Copy { src: Rect, dst: Point },
    Points { pixel: u32, points: &'a [Point] },
    Text { origin: Point, pixel: u32, chars: &'a [u16] },
    Image { area: Rect, data: &'a [u8] },
    Pixmap { width: u32, height: u32, depth: u32 },
    DestroyPixmap { id: u32 },
    Colormap { id: u32 },
    Color { red: u16, green: u16, blue: u16 },
    Cursor { width: u32, height: u32 },
    CursorPosition { x: i32, y: i32 },
    Window { id: u32, area: Rect },
    BestSize { class: SizeClass, width: u16, height: u16 },
}

/// What a handler hands back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimitiveReply {
    Done,
    Pixmap { id: u32, width: u32, height: u32, depth: u32 },
    Size { width: u16, height: u16 },
    Color { red: u16, green: u16, blue: u16 },
    Image(Vec<u8>),
}

pub type NativeHandler = fn(&mut Surface<'_>, &PrimitiveArgs<'_>) -> DriverResult<PrimitiveReply>;

pub type RasterHandler =
    Rc<dyn Fn(&mut Surface<'_>, &PrimitiveArgs<'_>) -> DriverResult<PrimitiveReply>>;

#[derive(Clone)]
pub enum Slot {
    Native(NativeHandler),
    Forwarded(RasterHandler),
    Unsupported,
}

impl Slot {
    pub fn kind(&self) -> SlotKind {
        match self {
            Slot::Native(_) => SlotKind::Native,
            Slot::Forwarded(_) => SlotKind::Forwarded,
            Slot::Unsupported => SlotKind::Unsupported,
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Native,
    Forwarded,
    Unsupported,
}

/// Inputs that decide native vs forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    pub caps: NativeCaps,
    /// False when the `NoAccel` option is set.
    pub accel: bool,
    pub hw_cursor: bool,
}

impl DispatchPolicy {
    fn allows_native(&self, op: PrimitiveOp) -> bool {
        let Some(cap) = op.capability() else {
            return false;
        };
        // The cursor follows HWcursor; everything else follows NoAccel.
        let enabled = if cap == NativeCaps::HW_CURSOR {
            self.hw_cursor
        } else {
            self.accel
        };
        enabled && self.caps.contains(cap)
    }
}

#[derive(Debug, Default)]
pub struct DispatchTableBuilder {
    slots: BTreeMap<PrimitiveOp, Slot>,
}

impl DispatchTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, op: PrimitiveOp, slot: Slot) -> &mut Self {
        self.slots.insert(op, slot);
        self
    }

    /// Validates completeness. Fails on the first identifier without a slot
    /// and on any core primitive left `Unsupported`.
    pub fn finish(mut self) -> DriverResult<DispatchTable> {
        let mut slots = Vec::with_capacity(PrimitiveOp::COUNT);
        for op in PrimitiveOp::ALL {
            let slot = self
                .slots
                .remove(&op)
                .ok_or(DriverError::DispatchBuildFailed(op))?;
            if op.is_core() && matches!(slot, Slot::Unsupported) {
                return Err(DriverError::DispatchBuildFailed(op));
            }
            slots.push(slot);
        }
        Ok(DispatchTable { slots })
    }
}

/// Builds a complete table: native where the policy allows and a native
/// handler exists, else the rasterizer's handler, else `Unsupported`.
pub fn build(policy: &DispatchPolicy, rasterizer: &dyn SoftwareRasterizer) -> DriverResult<DispatchTable> {
    let mut builder = DispatchTableBuilder::new();
    for op in PrimitiveOp::ALL {
        let native = if policy.allows_native(op) {
            accel::native_handler(op)
        } else {
            None
        };
        let slot = match (native, rasterizer.lookup(op)) {
            (Some(handler), _) => Slot::Native(handler),
            (None, Some(handler)) => Slot::Forwarded(handler),
            (None, None) => Slot::Unsupported,
        };
        trace!("RPI: slot {:?} -> {:?}", op, slot);
        builder.assign(op, slot);
    }
    let table = builder.finish()?;
    debug!(
        "RPI: dispatch table built: {} native, {} forwarded, {} unsupported",
        table.count(SlotKind::Native),
        table.count(SlotKind::Forwarded),
        table.count(SlotKind::Unsupported)
    );
    Ok(table)
}

pub struct DispatchTable {
    slots: Vec<Slot>,
}

impl DispatchTable {
    pub fn slot(&self, op: PrimitiveOp) -> &Slot {
        &self.slots[op.index()]
    }

    pub fn count(&self, kind: SlotKind) -> usize {
        self.slots.iter().filter(|s| s.kind() == kind).count()
    }

    pub fn ops_of(&self, kind: SlotKind) -> Vec<PrimitiveOp> {
        PrimitiveOp::ALL
            .into_iter()
            .filter(|op| self.slot(*op).kind() == kind)
            .collect()
    }

    /// Runs the handler for `op`. Unsupported slots are rejected, never
    /// silently ignored.
    pub fn invoke(
        &self,
        op: PrimitiveOp,
        surface: &mut Surface<'_>,
        args: &PrimitiveArgs<'_>,
    ) -> DriverResult<PrimitiveReply> {
        match self.slot(op) {
            Slot::Native(handler) => handler(surface, args),
            Slot::Forwarded(handler) => handler(surface, args),
            Slot::Unsupported => Err(DriverError::PrimitiveUnsupported(op)),
        }
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(PrimitiveOp::ALL.iter().map(|op| (op, self.slot(*op))))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rasterizer::TracingRasterizer;
    use crate::surface::SurfaceState;
    use test_log::test;

    fn done(_: &mut Surface<'_>, _: &PrimitiveArgs<'_>) -> DriverResult<PrimitiveReply> {
        Ok(PrimitiveReply::Done)
    }

    /// Rasterizer that only knows a fixed subset of ops.
    struct PartialRasterizer(Vec<PrimitiveOp>);

    impl SoftwareRasterizer for PartialRasterizer {
        fn lookup(&self, op: PrimitiveOp) -> Option<RasterHandler> {
            if self.0.contains(&op) {
                Some(Rc::new(done))
            } else {
                None
            }
        }
    }

    fn accelerated() -> DispatchPolicy {
        DispatchPolicy {
            caps: NativeCaps::all(),
            accel: true,
            hw_cursor: true,
        }
    }

    #[test]
    fn it_should_list_every_op_once() {
        for (i, op) in PrimitiveOp::ALL.iter().enumerate() {
            assert_eq!(op.index(), i);
        }
    }

    #[test]
    fn it_should_assign_every_slot() {
        let table = build(&accelerated(), &TracingRasterizer::new()).unwrap();
        let total = table.count(SlotKind::Native)
            + table.count(SlotKind::Forwarded)
            + table.count(SlotKind::Unsupported);
        assert_eq!(total, PrimitiveOp::COUNT);
        assert_eq!(table.count(SlotKind::Unsupported), 0);
    }

    #[test]
    fn it_should_use_native_handlers_when_accelerated() {
        let table = build(&accelerated(), &TracingRasterizer::new()).unwrap();
        assert_eq!(table.slot(PrimitiveOp::FillRectangle).kind(), SlotKind::Native);
        assert_eq!(table.slot(PrimitiveOp::CopyArea).kind(), SlotKind::Native);
        assert_eq!(table.slot(PrimitiveOp::SetCursorPosition).kind(), SlotKind::Native);
        assert_eq!(table.slot(PrimitiveOp::PolyArc).kind(), SlotKind::Forwarded);
    }

    #[test]
    fn it_should_forward_everything_but_the_cursor_with_no_accel() {
        let policy = DispatchPolicy {
            accel: false,
            ..accelerated()
        };
        let table = build(&policy, &TracingRasterizer::new()).unwrap();
        assert_eq!(
            table.ops_of(SlotKind::Native),
            vec![
                PrimitiveOp::RealizeCursor,
                PrimitiveOp::SetCursorPosition,
                PrimitiveOp::DisplayCursor
            ]
        );
    }

    #[test]
    fn it_should_forward_ops_missing_from_the_variant() {
        let policy = DispatchPolicy {
            caps: NativeCaps::all() - NativeCaps::COPY_AREA,
            ..accelerated()
        };
        let table = build(&policy, &TracingRasterizer::new()).unwrap();
        assert_eq!(table.slot(PrimitiveOp::CopyArea).kind(), SlotKind::Forwarded);
        assert_eq!(table.slot(PrimitiveOp::FillRectangle).kind(), SlotKind::Native);
    }

    #[test]
    fn it_should_mark_non_core_gaps_unsupported() {
        let core: Vec<PrimitiveOp> = PrimitiveOp::ALL.into_iter().filter(|op| op.is_core()).collect();
        let policy = DispatchPolicy {
            accel: false,
            hw_cursor: false,
            ..accelerated()
        };
        let table = build(&policy, &PartialRasterizer(core)).unwrap();
        assert_eq!(table.slot(PrimitiveOp::PolyArc).kind(), SlotKind::Unsupported);

        let mut pixels = vec![0u8; 16];
        let mut state = SurfaceState::default();
        let mut surface = Surface::new(&mut pixels, 2, 2, 4, &mut state);
        let err = table
            .invoke(PrimitiveOp::PolyArc, &mut surface, &PrimitiveArgs::None)
            .unwrap_err();
        assert!(matches!(err, DriverError::PrimitiveUnsupported(PrimitiveOp::PolyArc)));
    }

    #[test]
    fn it_should_refuse_a_table_with_an_unsupported_core_op() {
        let policy = DispatchPolicy {
            accel: false,
            ..accelerated()
        };
        let err = build(&policy, &PartialRasterizer(vec![])).unwrap_err();
        assert!(matches!(err, DriverError::DispatchBuildFailed(PrimitiveOp::CreatePixmap)));
    }

    #[test]
    fn it_should_refuse_to_finish_with_an_unassigned_slot() {
        let mut builder = DispatchTableBuilder::new();
        for op in PrimitiveOp::ALL.into_iter().filter(|op| *op != PrimitiveOp::WindowExposures) {
            builder.assign(op, Slot::Native(accel::fill_rectangle));
        }
        let err = builder.finish().unwrap_err();
        assert!(matches!(err, DriverError::DispatchBuildFailed(PrimitiveOp::WindowExposures)));
    }
}
