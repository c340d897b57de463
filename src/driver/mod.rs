// src/driver/mod.rs

//! Driver module registration and the device lifecycle.
//!
//! A `Driver` owns every device instance it probed, keyed by `InstanceId`
//! into an arena. Each lifecycle entry point checks the instance state first
//! and returns `InvalidTransition` when called out of order. Multi-step
//! transitions build into locals and only commit at the end, so a failure
//! drops whatever was acquired so far and the instance lands in a failure
//! state holding nothing.

#[cfg(test)]
mod tests;

use crate::config::{DeviceSection, HostConfig};
use crate::dispatch::{
    DispatchPolicy, DispatchTable, NativeCaps, PrimitiveArgs, PrimitiveOp, PrimitiveReply,
};
use crate::error::{DriverError, DriverResult};
use crate::modes::{self, Mode, ModeList, ModeRequest};
use crate::native::{ContextHandle, DisplayHandle, NativeGraphics};
use crate::negotiator::ChannelMasks;
use crate::options::{DriverOptions, OptionInfo, RPI_OPTIONS};
use crate::rasterizer::SoftwareRasterizer;
use crate::resources::ResourceBundle;
use crate::screen::{build_screen, ScreenParams, ScreenState, Viewport};
use log::{debug, error, info, trace, warn};
use once_cell::sync::OnceCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// Prefix used for the chipset table and diagnostics.
pub const RPI_NAME: &str = "RPI";
/// Name device sections use to select this driver.
pub const DRIVER_NAME: &str = "rpi";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiClass {
    VideoDriver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleVersion {
    pub name: &'static str,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub abi_class: AbiClass,
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.{}.{}", self.name, self.major, self.minor, self.patch)
    }
}

pub const MODULE_VERSION: ModuleVersion = ModuleVersion {
    name: DRIVER_NAME,
    major: 0,
    minor: 0,
    patch: 1,
    abi_class: AbiClass::VideoDriver,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chipset {
    pub token: u32,
    pub name: &'static str,
}

pub const CHIPSETS: [Chipset; 1] = [Chipset {
    token: 0x0314,
    name: "Raspberry Pi (BCM2835)",
}];

/// Process-wide "module loaded" record. Passed explicitly to whoever loads
/// the driver; the first `setup` wins and later ones fail.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    loaded: OnceCell<ModuleVersion>,
}

impl ModuleRegistry {
    pub const fn new() -> Self {
        ModuleRegistry {
            loaded: OnceCell::new(),
        }
    }

    pub fn setup(&self) -> DriverResult<Registration> {
        self.loaded
            .set(MODULE_VERSION)
            .map_err(|_| DriverError::AlreadyRegistered)?;
        info!("{}: module {} registered", RPI_NAME, MODULE_VERSION);
        Ok(Registration {
            version: MODULE_VERSION,
        })
    }

    pub fn is_registered(&self) -> bool {
        self.loaded.get().is_some()
    }
}

/// Proof of a successful `setup`; required to construct a `Driver`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    version: ModuleVersion,
}

impl Registration {
    pub fn version(&self) -> ModuleVersion {
        self.version
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Unregistered,
    Identified,
    Probed,
    PreInitialized,
    ScreenActive,
    Suspended,
    TornDown,
    PreInitFailed,
    ScreenInitFailed,
}

impl LifecycleState {
    /// States an instance never leaves on its own; only a fresh Probe
    /// reclaims the slot.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LifecycleState::TornDown | LifecycleState::PreInitFailed | LifecycleState::ScreenInitFailed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(pub usize);

/// Host entity claimed by Probe for one device section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityHandle(pub u32);

/// Driver-private state allocated by PreInit.
#[derive(Debug)]
struct PrivateState {
    options: DriverOptions,
    bits_per_pixel: u32,
    depth: u32,
    masks: ChannelMasks,
    modes: ModeList,
    bundle: ResourceBundle,
}

#[derive(Debug)]
struct DeviceInstance {
    entity: EntityHandle,
    section: usize,
    state: LifecycleState,
    private: Option<PrivateState>,
    screen: Option<ScreenState>,
    /// EnterVT already seen since the last ScreenInit or LeaveVT.
    vt_entered: bool,
}

impl DeviceInstance {
    fn expect_state(&self, allowed: &[LifecycleState], op: &'static str) -> DriverResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(DriverError::InvalidTransition { from: self.state, op })
        }
    }

    fn transition(&mut self, id: InstanceId, to: LifecycleState) {
        debug!("{}({}): {:?} -> {:?}", RPI_NAME, id.0, self.state, to);
        self.state = to;
    }

    /// Drops screen and private state, releasing the bundle.
    fn release_all(&mut self) {
        self.screen.take();
        if let Some(mut private) = self.private.take() {
            private.bundle.release();
        }
    }
}

pub struct Driver {
    registration: Registration,
    config: HostConfig,
    native: Rc<dyn NativeGraphics>,
    rasterizer: Rc<dyn SoftwareRasterizer>,
    module_state: LifecycleState,
    instances: Vec<Option<DeviceInstance>>,
    next_entity: u32,
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("registration", &self.registration)
            .field("native", &self.native.name())
            .field("module_state", &self.module_state)
            .field("instances", &self.instances)
            .finish()
    }
}

impl Driver {
    pub fn new(
        registration: Registration,
        config: HostConfig,
        native: Rc<dyn NativeGraphics>,
        rasterizer: Rc<dyn SoftwareRasterizer>,
    ) -> Self {
        Driver {
            registration,
            config,
            native,
            rasterizer,
            module_state: LifecycleState::Unregistered,
            instances: Vec::new(),
            next_entity: 1,
        }
    }

    /// `Unregistered` until the host called Identify, `Identified` after.
    pub fn module_state(&self) -> LifecycleState {
        self.module_state
    }

    /// Advertises the supported chipsets. Holds no state beyond noting that
    /// it happened; repeatable.
    pub fn identify(&mut self) -> &'static [Chipset] {
        for chipset in &CHIPSETS {
            info!("{}: driver for {} ({:#06x})", RPI_NAME, chipset.name, chipset.token);
        }
        self.module_state = LifecycleState::Identified;
        &CHIPSETS
    }

    pub fn available_options(&self) -> &'static [OptionInfo] {
        &RPI_OPTIONS
    }

    /// Claims every unclaimed device section whose driver is `requested_name`
    /// and creates a `Probed` instance for each. A section held by an
    /// instance in a terminal state counts as unclaimed; that instance is
    /// reclaimed first. Returns the new instances. When nothing matches the
    /// result is empty and no instance is touched.
    pub fn probe(&mut self, requested_name: &str) -> Vec<InstanceId> {
        if !requested_name.eq_ignore_ascii_case(DRIVER_NAME) {
            debug!("{}: probe for \"{}\" ignored", RPI_NAME, requested_name);
            return Vec::new();
        }

        let claimable: Vec<usize> = self
            .config
            .device_sections
            .iter()
            .enumerate()
            .filter(|(_, section)| section.driver.eq_ignore_ascii_case(requested_name))
            .filter(|(index, section)| {
                let claimed = self
                    .instances
                    .iter()
                    .flatten()
                    .any(|inst| inst.section == *index && !inst.state.is_terminal());
                if claimed {
                    trace!("{}: section \"{}\" already claimed", RPI_NAME, section.identifier);
                }
                !claimed
            })
            .map(|(index, _)| index)
            .collect();

        if claimable.is_empty() {
            warn!("{}: no matching device section for \"{}\"", RPI_NAME, requested_name);
            return Vec::new();
        }

        self.reclaim_terminal();
        claimable.into_iter().map(|section| self.claim(section)).collect()
    }

    fn claim(&mut self, section: usize) -> InstanceId {
        let entity = EntityHandle(self.next_entity);
        self.next_entity += 1;
        let instance = DeviceInstance {
            entity,
            section,
            state: LifecycleState::Probed,
            private: None,
            screen: None,
            vt_entered: false,
        };
        let id = match self.instances.iter().position(Option::is_none) {
            Some(slot) => {
                self.instances[slot] = Some(instance);
                InstanceId(slot)
            }
            None => {
                self.instances.push(Some(instance));
                InstanceId(self.instances.len() - 1)
            }
        };
        let identifier = self
            .config
            .device_sections
            .get(section)
            .map_or("", |s| s.identifier.as_str());
        info!(
            "{}({}): claimed section \"{}\" as entity {}",
            RPI_NAME, id.0, identifier, entity.0
        );
        id
    }

    fn reclaim_terminal(&mut self) {
        for (index, slot) in self.instances.iter_mut().enumerate() {
            if slot.as_ref().is_some_and(|inst| inst.state.is_terminal()) {
                debug!("{}({}): reclaiming instance slot", RPI_NAME, index);
                *slot = None;
            }
        }
    }

    fn instance(&self, id: InstanceId) -> DriverResult<&DeviceInstance> {
        self.instances
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(DriverError::UnknownInstance(id.0))
    }

    fn instance_mut(&mut self, id: InstanceId) -> DriverResult<&mut DeviceInstance> {
        self.instances
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(DriverError::UnknownInstance(id.0))
    }

    /// Resolves options, acquires the resource bundle, maps the framebuffer
    /// if configured, resolves modes and checks the pixel depth. Any failure
    /// releases everything acquired so far and leaves `PreInitFailed`.
    pub fn pre_init(&mut self, id: InstanceId) -> DriverResult<()> {
        let section = {
            let instance = self.instance(id)?;
            instance.expect_state(&[LifecycleState::Probed], "PreInit")?;
            self.config
                .device_sections
                .get(instance.section)
                .cloned()
                .ok_or_else(|| {
                    DriverError::InvalidConfig(format!("device section {} vanished", instance.section))
                })?
        };

        let result = self.build_private(id, &section);
        let instance = self.instance_mut(id)?;
        match result {
            Ok(private) => {
                info!(
                    "{}({}): PreInit done, {} bpp depth {}, mode {}",
                    RPI_NAME,
                    id.0,
                    private.bits_per_pixel,
                    private.depth,
                    private.modes.current()
                );
                instance.private = Some(private);
                instance.transition(id, LifecycleState::PreInitialized);
                Ok(())
            }
            Err(e) => {
                error!("{}({}): PreInit failed: {}", RPI_NAME, id.0, e);
                instance.release_all();
                instance.transition(id, LifecycleState::PreInitFailed);
                Err(e)
            }
        }
    }

    fn build_private(&self, id: InstanceId, section: &DeviceSection) -> DriverResult<PrivateState> {
        let options = DriverOptions::resolve(&section.options);
        debug!(
            "{}({}): variant {}, options {:?}",
            RPI_NAME, id.0, self.config.variant.name, options
        );

        let mut bundle = ResourceBundle::acquire(&self.native, &self.config.profile)?;
        if let Some(fb) = &self.config.framebuffer {
            bundle.map_framebuffer(&fb.path, fb.size)?;
        }

        let display = bundle
            .display()
            .ok_or_else(|| DriverError::DisplayUnavailable("bundle has no display".to_string()))?;
        let request = ModeRequest {
            source: self.config.mode_source,
            database: &self.config.modes,
            limits: &self.config.monitor,
        };
        let modes = modes::resolve(display, &request)?;

        let config = bundle
            .config()
            .ok_or(DriverError::NoMatchingConfiguration)?;
        let bits_per_pixel = config.bits_per_pixel();
        let depths = &self.config.variant.depths;
        if !depths.contains(&bits_per_pixel) {
            return Err(DriverError::UnsupportedPixelDepth {
                bpp: bits_per_pixel,
                supported: depths.clone(),
            });
        }

        Ok(PrivateState {
            options,
            bits_per_pixel,
            depth: config.depth(),
            masks: config.masks(),
            modes,
            bundle,
        })
    }

    /// Builds the screen: visuals, default colormap, dispatch table and
    /// pixel storage. On failure the instance lands in `ScreenInitFailed`
    /// with its bundle released.
    pub fn screen_init(&mut self, id: InstanceId) -> DriverResult<()> {
        let rasterizer = Rc::clone(&self.rasterizer);
        let caps = self.config.variant.caps;
        let instance = self.instance_mut(id)?;
        instance.expect_state(&[LifecycleState::PreInitialized], "ScreenInit")?;

        let result = match &instance.private {
            Some(private) => screen_for(private, caps, rasterizer.as_ref()),
            None => Err(DriverError::InvalidTransition {
                from: instance.state,
                op: "ScreenInit",
            }),
        };
        match result {
            Ok(screen) => {
                instance.screen = Some(screen);
                instance.vt_entered = false;
                instance.transition(id, LifecycleState::ScreenActive);
                Ok(())
            }
            Err(e) => {
                error!("{}({}): ScreenInit failed: {}", RPI_NAME, id.0, e);
                instance.release_all();
                instance.transition(id, LifecycleState::ScreenInitFailed);
                Err(e)
            }
        }
    }

    /// Makes `mode` current. The dispatch table is left alone.
    pub fn switch_mode(&mut self, id: InstanceId, mode: Mode) -> DriverResult<()> {
        let instance = self.instance_mut(id)?;
        instance.expect_state(&[LifecycleState::ScreenActive], "SwitchMode")?;
        let (Some(private), Some(screen)) = (instance.private.as_mut(), instance.screen.as_mut()) else {
            return Err(DriverError::InvalidTransition {
                from: instance.state,
                op: "SwitchMode",
            });
        };
        private.modes.select(&mode)?;
        screen.set_mode(private.modes.current());
        info!("{}({}): switched to {}", RPI_NAME, id.0, private.modes.current());
        Ok(())
    }

    pub fn adjust_frame(&mut self, id: InstanceId, x: i32, y: i32) -> DriverResult<Viewport> {
        let instance = self.instance_mut(id)?;
        instance.expect_state(&[LifecycleState::ScreenActive], "AdjustFrame")?;
        let screen = instance.screen.as_mut().ok_or(DriverError::InvalidTransition {
            from: LifecycleState::ScreenActive,
            op: "AdjustFrame",
        })?;
        let viewport = screen.adjust_frame(x, y);
        trace!("{}({}): frame at {},{}", RPI_NAME, id.0, viewport.x, viewport.y);
        Ok(viewport)
    }

    /// Resumes a suspended instance, or acknowledges the first EnterVT after
    /// ScreenInit. Nested EnterVT calls are rejected.
    pub fn enter_vt(&mut self, id: InstanceId) -> DriverResult<()> {
        let instance = self.instance_mut(id)?;
        let state = instance.state;
        match state {
            LifecycleState::Suspended => instance.transition(id, LifecycleState::ScreenActive),
            LifecycleState::ScreenActive if !instance.vt_entered => {
                debug!("{}({}): EnterVT after ScreenInit", RPI_NAME, id.0)
            }
            from => return Err(DriverError::InvalidTransition { from, op: "EnterVT" }),
        }
        instance.vt_entered = true;
        Ok(())
    }

    /// Gives up the display without releasing anything, so EnterVT resumes
    /// on the same handles.
    pub fn leave_vt(&mut self, id: InstanceId) -> DriverResult<()> {
        let instance = self.instance_mut(id)?;
        instance.expect_state(&[LifecycleState::ScreenActive], "LeaveVT")?;
        instance.vt_entered = false;
        instance.transition(id, LifecycleState::Suspended);
        Ok(())
    }

    pub fn free_screen(&mut self, id: InstanceId) -> DriverResult<()> {
        self.teardown(id, "FreeScreen")
    }

    pub fn close_screen(&mut self, id: InstanceId) -> DriverResult<()> {
        self.teardown(id, "CloseScreen")
    }

    fn teardown(&mut self, id: InstanceId, op: &'static str) -> DriverResult<()> {
        let instance = self.instance_mut(id)?;
        if instance.state == LifecycleState::TornDown {
            trace!("{}({}): {} on torn down instance", RPI_NAME, id.0, op);
            return Ok(());
        }
        info!("{}({}): {}", RPI_NAME, id.0, op);
        instance.release_all();
        instance.transition(id, LifecycleState::TornDown);
        Ok(())
    }

    /// Called before the host blocks. Shrinks the wait to the poll interval
    /// while any active screen has undelivered damage; never extends it.
    pub fn block_handler(&self, timeout: Option<Duration>) -> Option<Duration> {
        let pending = self
            .instances
            .iter()
            .flatten()
            .filter(|inst| inst.state == LifecycleState::ScreenActive)
            .filter_map(|inst| inst.screen.as_ref())
            .any(|screen| screen.pending_damage() > 0);
        if !pending {
            return timeout;
        }
        let poll = self.config.poll_interval();
        Some(timeout.map_or(poll, |t| t.min(poll)))
    }

    /// Called after the host's wait returns. Flushes damage; never blocks.
    pub fn wakeup_handler(&mut self, ready: usize) {
        for (index, instance) in self.instances.iter_mut().enumerate() {
            let Some(instance) = instance else { continue };
            if instance.state != LifecycleState::ScreenActive {
                continue;
            }
            if let Some(screen) = instance.screen.as_mut() {
                let damage = screen.take_damage();
                if damage > 0 {
                    trace!("{}({}): flushed {} damaged ops ({} ready)", RPI_NAME, index, damage, ready);
                }
            }
        }
    }

    /// Runs one primitive through the instance's dispatch table.
    pub fn dispatch(
        &mut self,
        id: InstanceId,
        op: PrimitiveOp,
        args: &PrimitiveArgs<'_>,
    ) -> DriverResult<PrimitiveReply> {
        let instance = self.instance_mut(id)?;
        instance.expect_state(&[LifecycleState::ScreenActive], "dispatch")?;
        let (Some(private), Some(screen)) = (instance.private.as_mut(), instance.screen.as_mut()) else {
            return Err(DriverError::InvalidTransition {
                from: instance.state,
                op: "dispatch",
            });
        };
        screen.dispatch(private.bundle.framebuffer_mut(), op, args)
    }

    /// `Unregistered` for ids that were never probed or have been reclaimed.
    pub fn instance_state(&self, id: InstanceId) -> LifecycleState {
        self.instance(id)
            .map(|inst| inst.state)
            .unwrap_or(LifecycleState::Unregistered)
    }

    pub fn instance_ids(&self) -> Vec<InstanceId> {
        self.instances
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| InstanceId(index))
            .collect()
    }

    pub fn entity(&self, id: InstanceId) -> Option<EntityHandle> {
        self.instance(id).ok().map(|inst| inst.entity)
    }

    pub fn options(&self, id: InstanceId) -> Option<DriverOptions> {
        self.private(id).map(|p| p.options)
    }

    pub fn bits_per_pixel(&self, id: InstanceId) -> Option<u32> {
        self.private(id).map(|p| p.bits_per_pixel)
    }

    pub fn channel_masks(&self, id: InstanceId) -> Option<ChannelMasks> {
        self.private(id).map(|p| p.masks)
    }

    pub fn mode_list(&self, id: InstanceId) -> Option<&ModeList> {
        self.private(id).map(|p| &p.modes)
    }

    /// Display and context handles currently held by the instance's bundle.
    pub fn bundle_handles(&self, id: InstanceId) -> Option<(DisplayHandle, ContextHandle)> {
        let bundle = &self.private(id)?.bundle;
        Some((bundle.display()?.handle(), bundle.context()?.handle()))
    }

    pub fn has_framebuffer(&self, id: InstanceId) -> bool {
        self.private(id).is_some_and(|p| p.bundle.framebuffer().is_some())
    }

    pub fn screen(&self, id: InstanceId) -> Option<&ScreenState> {
        self.instance(id).ok()?.screen.as_ref()
    }

    pub fn dispatch_table(&self, id: InstanceId) -> Option<&DispatchTable> {
        self.screen(id).map(ScreenState::table)
    }

    fn private(&self, id: InstanceId) -> Option<&PrivateState> {
        self.instance(id).ok()?.private.as_ref()
    }
}

fn screen_for(
    private: &PrivateState,
    caps: NativeCaps,
    rasterizer: &dyn SoftwareRasterizer,
) -> DriverResult<ScreenState> {
    let config = private
        .bundle
        .config()
        .ok_or(DriverError::NoMatchingConfiguration)?;
    let policy = DispatchPolicy {
        caps,
        accel: !private.options.no_accel,
        hw_cursor: private.options.hw_cursor,
    };
    build_screen(&ScreenParams {
        config,
        modes: &private.modes,
        policy,
        rasterizer,
        framebuffer_len: private.bundle.framebuffer().map(|fb| fb.len()),
    })
}
