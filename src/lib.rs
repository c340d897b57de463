// src/lib.rs

//! Video driver core for the Raspberry Pi display adapter.
//!
//! The host display server loads the module once (`ModuleRegistry::setup`),
//! then drives each claimed device through the lifecycle in `driver`
//! via the callback set in `host`. Native graphics and the software
//! rasterizer are reached through the traits in `native` and `rasterizer`.

pub mod accel;
pub mod config;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod host;
pub mod modes;
pub mod native;
pub mod negotiator;
pub mod options;
pub mod rasterizer;
pub mod resources;
pub mod screen;
pub mod surface;

pub use config::HostConfig;
pub use driver::{Driver, InstanceId, LifecycleState, ModuleRegistry};
pub use error::{DriverError, DriverResult};
pub use host::DriverCallbacks;
