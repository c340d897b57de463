// src/error.rs
//! Error kinds surfaced by the driver core.
//!
//! Every lifecycle transition returns `Result<_, DriverError>`; the host-facing
//! layer in `host.rs` turns these into a diagnostic plus a `false` return.

use crate::driver::LifecycleState;
use crate::dispatch::PrimitiveOp;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("No native configuration matches the requested pixel profile")]
    NoMatchingConfiguration,
    #[error("Native display unavailable: {0}")]
    DisplayUnavailable(String),
    #[error("Rendering context creation failed: {0}")]
    ContextCreationFailed(String),
    #[error("Unsupported pixel depth: {bpp} bits per pixel (supported: {supported:?})")]
    UnsupportedPixelDepth { bpp: u32, supported: Vec<u32> },
    #[error("Mode resolution failed: {0}")]
    ModeResolutionFailed(String),
    #[error("Dispatch table build failed: no usable slot for {0:?}")]
    DispatchBuildFailed(PrimitiveOp),
    #[error("Driver module already registered")]
    AlreadyRegistered,
    #[error("{op} is not valid in state {from:?}")]
    InvalidTransition {
        from: LifecycleState,
        op: &'static str,
    },
    #[error("Unknown device instance {0}")]
    UnknownInstance(usize),
    #[error("Mode {width}x{height} is not in the instance mode list")]
    ModeNotInList { width: u32, height: u32 },
    #[error("Framebuffer mapping failed: {0}")]
    FramebufferMapFailed(String),
    #[error("Visual initialization failed: {0}")]
    VisualInitFailed(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Primitive {0:?} is not supported by this screen")]
    PrimitiveUnsupported(PrimitiveOp),
    #[error("Primitive {op:?} rejected: {reason}")]
    PrimitiveRejected { op: PrimitiveOp, reason: String },
}

pub type DriverResult<T> = Result<T, DriverError>;
