// In src/main.rs

//! Demo host: loads the driver module and walks one device through its whole
//! lifecycle, the way a display server would at startup, on a VT switch and
//! at shutdown.

use anyhow::{bail, Context};
use log::{info, warn};
use rpi_video::dispatch::{PrimitiveArgs, PrimitiveOp, SizeClass};
use rpi_video::native::NativeGraphics;
use rpi_video::rasterizer::TracingRasterizer;
use rpi_video::surface::{Point, Rect};
use rpi_video::{Driver, DriverCallbacks, HostConfig, InstanceId, ModuleRegistry};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

static MODULE_REGISTRY: ModuleRegistry = ModuleRegistry::new();

#[cfg(feature = "glx")]
fn native_backend() -> anyhow::Result<Rc<dyn NativeGraphics>> {
    Ok(Rc::new(rpi_video::native::GlxNative::new(None)?))
}

#[cfg(not(feature = "glx"))]
fn native_backend() -> anyhow::Result<Rc<dyn NativeGraphics>> {
    Ok(Rc::new(rpi_video::native::HeadlessNative::new()))
}

fn load_config() -> anyhow::Result<HostConfig> {
    match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => HostConfig::load(&path),
        None => {
            info!("No configuration given, using defaults.");
            Ok(HostConfig::default())
        }
    }
}

fn exercise(host: &mut dyn DriverCallbacks, id: InstanceId) {
    let rects = [Rect::new(0, 0, 64, 64), Rect::new(32, 32, 128, 16)];
    let chars: Vec<u16> = "RPI".encode_utf16().collect();
    let requests = [
        (PrimitiveOp::CreateGc, PrimitiveArgs::None),
        (
            PrimitiveOp::FillRectangle,
            PrimitiveArgs::Fill {
                pixel: 0x00ff_8000,
                rects: &rects,
            },
        ),
        (
            PrimitiveOp::CopyArea,
            PrimitiveArgs::Copy {
                src: Rect::new(0, 0, 32, 32),
                dst: Point { x: 100, y: 100 },
            },
        ),
        (
            PrimitiveOp::PolyText16,
            PrimitiveArgs::Text {
                origin: Point { x: 10, y: 20 },
                pixel: 0x00ff_ffff,
                chars: &chars,
            },
        ),
        (
            PrimitiveOp::QueryBestSize,
            PrimitiveArgs::BestSize {
                class: SizeClass::Cursor,
                width: 100,
                height: 100,
            },
        ),
    ];
    for (op, args) in &requests {
        match host.primitive(id, *op, args) {
            Some(reply) => info!("{:?} -> {:?}", op, reply),
            None => warn!("{:?} was rejected", op),
        }
    }

    let mut timeout = Some(Duration::from_secs(1));
    host.block_handler(&mut timeout);
    info!("Event loop would block for {:?}", timeout);
    host.wakeup_handler(0);
}

fn main() -> anyhow::Result<()> {
    // Initialize the logger. Default filter is "info" if RUST_LOG is not set.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    info!("Starting rpi-video host...");

    let config = load_config().context("Failed to load host configuration")?;
    let registration = MODULE_REGISTRY
        .setup()
        .context("Failed to register the rpi module")?;
    let native = native_backend().context("Failed to create native graphics backend")?;
    info!("Native backend: {}", native.name());

    let mut driver = Driver::new(registration, config, native, Rc::new(TracingRasterizer::new()));
    let host: &mut dyn DriverCallbacks = &mut driver;

    for chipset in host.identify() {
        info!("Chipset {:#06x}: {}", chipset.token, chipset.name);
    }
    for option in host.available_options() {
        info!("Option {} ({:?}, default {})", option.name, option.value_type, option.default);
    }

    let found = host.probe("rpi");
    if found == 0 {
        bail!("No device section uses the rpi driver");
    }

    let mut active = Vec::new();
    for id in (0..found).map(InstanceId) {
        if !host.pre_init(id) {
            warn!("Instance {} failed PreInit, skipping", id.0);
            continue;
        }
        if !host.screen_init(id) || !host.enter_vt(id) {
            warn!("Instance {} failed to come up, skipping", id.0);
            host.free_screen(id);
            continue;
        }
        active.push(id);
    }
    if active.is_empty() {
        bail!("No usable rpi device");
    }

    for &id in &active {
        exercise(host, id);
        host.adjust_frame(id, 16, 16);

        info!("Switching away from VT...");
        host.leave_vt(id);
        if !host.enter_vt(id) {
            warn!("Instance {} did not come back after VT switch", id.0);
        }
        exercise(host, id);
    }

    for &id in &active {
        host.close_screen(id);
    }
    info!("rpi-video host exiting.");
    Ok(())
}
