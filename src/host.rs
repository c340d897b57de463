// src/host.rs

//! The callback set the host display server drives the driver through.
//!
//! Every entry point has the host's return convention: `bool` for calls that
//! can fail, nothing for notifications. Failures are logged here, once, with
//! the driver prefix; the host only learns success or failure.

use crate::dispatch::{PrimitiveArgs, PrimitiveOp, PrimitiveReply};
use crate::driver::{Chipset, Driver, InstanceId, RPI_NAME};
use crate::error::DriverResult;
use crate::modes::Mode;
use crate::options::OptionInfo;
use log::{error, warn};
use std::time::Duration;

pub trait DriverCallbacks {
    fn identify(&mut self) -> &'static [Chipset];

    /// Returns the number of instances claimed; zero means failure.
    fn probe(&mut self, requested_name: &str) -> usize;

    fn available_options(&self) -> &'static [OptionInfo];

    fn pre_init(&mut self, id: InstanceId) -> bool;

    fn screen_init(&mut self, id: InstanceId) -> bool;

    fn switch_mode(&mut self, id: InstanceId, mode: Mode) -> bool;

    fn adjust_frame(&mut self, id: InstanceId, x: i32, y: i32);

    fn enter_vt(&mut self, id: InstanceId) -> bool;

    fn leave_vt(&mut self, id: InstanceId);

    fn free_screen(&mut self, id: InstanceId);

    fn close_screen(&mut self, id: InstanceId) -> bool;

    /// May shrink `timeout`; never grows it.
    fn block_handler(&mut self, timeout: &mut Option<Duration>);

    fn wakeup_handler(&mut self, result: usize);

    /// A dispatch-table slot. `None` means the request was rejected.
    fn primitive(&mut self, id: InstanceId, op: PrimitiveOp, args: &PrimitiveArgs<'_>) -> Option<PrimitiveReply>;
}

fn report<T>(id: InstanceId, call: &str, result: DriverResult<T>) -> Option<T> {
    result
        .map_err(|e| error!("{}({}): {} failed: {}", RPI_NAME, id.0, call, e))
        .ok()
}

impl DriverCallbacks for Driver {
    fn identify(&mut self) -> &'static [Chipset] {
        Driver::identify(self)
    }

    fn probe(&mut self, requested_name: &str) -> usize {
        Driver::probe(self, requested_name).len()
    }

    fn available_options(&self) -> &'static [OptionInfo] {
        Driver::available_options(self)
    }

    fn pre_init(&mut self, id: InstanceId) -> bool {
        report(id, "PreInit", Driver::pre_init(self, id)).is_some()
    }

    fn screen_init(&mut self, id: InstanceId) -> bool {
        report(id, "ScreenInit", Driver::screen_init(self, id)).is_some()
    }

    fn switch_mode(&mut self, id: InstanceId, mode: Mode) -> bool {
        report(id, "SwitchMode", Driver::switch_mode(self, id, mode)).is_some()
    }

    fn adjust_frame(&mut self, id: InstanceId, x: i32, y: i32) {
        report(id, "AdjustFrame", Driver::adjust_frame(self, id, x, y));
    }

    fn enter_vt(&mut self, id: InstanceId) -> bool {
        report(id, "EnterVT", Driver::enter_vt(self, id)).is_some()
    }

    fn leave_vt(&mut self, id: InstanceId) {
        report(id, "LeaveVT", Driver::leave_vt(self, id));
    }

    fn free_screen(&mut self, id: InstanceId) {
        report(id, "FreeScreen", Driver::free_screen(self, id));
    }

    fn close_screen(&mut self, id: InstanceId) -> bool {
        report(id, "CloseScreen", Driver::close_screen(self, id)).is_some()
    }

    fn block_handler(&mut self, timeout: &mut Option<Duration>) {
        *timeout = Driver::block_handler(self, *timeout);
    }

    fn wakeup_handler(&mut self, result: usize) {
        Driver::wakeup_handler(self, result);
    }

    fn primitive(&mut self, id: InstanceId, op: PrimitiveOp, args: &PrimitiveArgs<'_>) -> Option<PrimitiveReply> {
        match Driver::dispatch(self, id, op, args) {
            Ok(reply) => Some(reply),
            Err(e) => {
                warn!("{}({}): {:?} rejected: {}", RPI_NAME, id.0, op, e);
                None
            }
        }
    }
}
