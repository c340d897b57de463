// src/driver/tests.rs

use super::*;
use crate::config::DeviceSection;
use crate::dispatch::SlotKind;
use crate::modes::ModeSource;
use crate::native::headless::FailurePlan;
use crate::native::HeadlessNative;
use crate::rasterizer::TracingRasterizer;
use crate::surface::{Point, Rect};
use std::collections::BTreeMap;
use test_log::test;

fn driver_with(config: HostConfig, native: &Rc<HeadlessNative>) -> Driver {
    let registry = ModuleRegistry::new();
    let registration = registry.setup().unwrap();
    let shared: Rc<dyn NativeGraphics> = native.clone();
    Driver::new(registration, config, shared, Rc::new(TracingRasterizer::new()))
}

fn small_native() -> Rc<HeadlessNative> {
    let native = Rc::new(HeadlessNative::new());
    native.set_geometry(64, 48);
    native
}

fn active(driver: &mut Driver) -> InstanceId {
    let ids = driver.probe(DRIVER_NAME);
    assert_eq!(ids.len(), 1);
    driver.pre_init(ids[0]).unwrap();
    driver.screen_init(ids[0]).unwrap();
    driver.enter_vt(ids[0]).unwrap();
    ids[0]
}

#[test]
fn it_should_refuse_a_second_setup() {
    let registry = ModuleRegistry::new();
    assert!(!registry.is_registered());
    let registration = registry.setup().unwrap();
    assert_eq!(registration.version().to_string(), "rpi 0.0.1");
    assert!(matches!(registry.setup(), Err(DriverError::AlreadyRegistered)));
    assert!(registry.is_registered());
}

#[test]
fn it_should_identify_the_chipset() {
    let native = small_native();
    let mut driver = driver_with(HostConfig::default(), &native);
    assert_eq!(driver.module_state(), LifecycleState::Unregistered);
    let chipsets = driver.identify();
    assert_eq!(chipsets[0].token, 0x0314);
    assert_eq!(driver.identify().len(), 1);
    assert_eq!(driver.module_state(), LifecycleState::Identified);
    assert_eq!(driver.available_options().len(), 2);
}

#[test]
fn it_should_probe_only_matching_sections() {
    let native = small_native();
    let config = HostConfig {
        device_sections: vec![
            DeviceSection::default(),
            DeviceSection {
                identifier: "Other".to_string(),
                driver: "fbdev".to_string(),
                options: BTreeMap::new(),
            },
            DeviceSection {
                identifier: "Second Pi".to_string(),
                ..DeviceSection::default()
            },
        ],
        ..HostConfig::default()
    };
    let mut driver = driver_with(config, &native);

    assert!(driver.probe("fbdev").is_empty());
    let ids = driver.probe("rpi");
    assert_eq!(ids, vec![InstanceId(0), InstanceId(1)]);
    assert_ne!(driver.entity(ids[0]), driver.entity(ids[1]));
    for id in &ids {
        assert_eq!(driver.instance_state(*id), LifecycleState::Probed);
    }
    // Already claimed.
    assert!(driver.probe("rpi").is_empty());
    assert_eq!(native.open_displays(), 0);
}

#[test]
fn it_should_pre_init_with_resolved_options() {
    let native = small_native();
    let mut section = DeviceSection::default();
    section.options.insert("NoAccel".to_string(), "true".to_string());
    let config = HostConfig {
        device_sections: vec![section],
        ..HostConfig::default()
    };
    let mut driver = driver_with(config, &native);
    let id = driver.probe(DRIVER_NAME)[0];
    driver.pre_init(id).unwrap();

    assert_eq!(driver.instance_state(id), LifecycleState::PreInitialized);
    assert_eq!(
        driver.options(id),
        Some(DriverOptions {
            hw_cursor: false,
            no_accel: true
        })
    );
    assert_eq!(driver.bits_per_pixel(id), Some(32));
    assert_eq!(driver.channel_masks(id).map(|m| m.green), Some(0x0000_ff00));
    let modes = driver.mode_list(id).unwrap();
    assert_eq!(modes.current(), Mode::new(64, 48));
    assert!(modes.is_zoom_locked());
    assert_eq!(native.open_displays(), 1);
    assert_eq!(native.live_contexts(), 1);
}

#[test]
fn it_should_roll_back_when_context_creation_fails() {
    let native = small_native();
    native.set_failures(FailurePlan {
        create_context: true,
        ..FailurePlan::default()
    });
    let mut driver = driver_with(HostConfig::default(), &native);
    let id = driver.probe(DRIVER_NAME)[0];
    let err = driver.pre_init(id).unwrap_err();
    assert!(matches!(err, DriverError::ContextCreationFailed(_)));
    assert_eq!(driver.instance_state(id), LifecycleState::PreInitFailed);
    assert_eq!(driver.bundle_handles(id), None);
    assert_eq!(native.open_displays(), 0);

    // Unusable until probed again.
    assert!(matches!(
        driver.screen_init(id),
        Err(DriverError::InvalidTransition {
            from: LifecycleState::PreInitFailed,
            ..
        })
    ));
}

#[test]
fn it_should_roll_back_when_mode_resolution_fails() {
    let native = small_native();
    native.set_failures(FailurePlan {
        query_geometry: true,
        ..FailurePlan::default()
    });
    let mut driver = driver_with(HostConfig::default(), &native);
    let id = driver.probe(DRIVER_NAME)[0];
    assert!(matches!(driver.pre_init(id), Err(DriverError::ModeResolutionFailed(_))));
    assert_eq!(native.open_displays(), 0);
    assert_eq!(native.live_contexts(), 0);
}

#[test]
fn it_should_reclaim_failed_instances_on_probe() {
    let native = small_native();
    native.set_failures(FailurePlan {
        open_display: true,
        ..FailurePlan::default()
    });
    let mut driver = driver_with(HostConfig::default(), &native);
    let first = driver.probe(DRIVER_NAME)[0];
    assert!(matches!(driver.pre_init(first), Err(DriverError::DisplayUnavailable(_))));

    native.set_failures(FailurePlan::default());
    let second = driver.probe(DRIVER_NAME)[0];
    assert_eq!(second, first);
    assert_eq!(driver.instance_state(second), LifecycleState::Probed);
    driver.pre_init(second).unwrap();
    assert_eq!(driver.instance_ids(), vec![second]);
}

#[test]
fn it_should_leave_failed_instances_alone_when_probe_finds_nothing() {
    let native = small_native();
    native.set_failures(FailurePlan {
        open_display: true,
        ..FailurePlan::default()
    });
    let mut driver = driver_with(HostConfig::default(), &native);
    let id = driver.probe(DRIVER_NAME)[0];
    assert!(driver.pre_init(id).is_err());
    assert_eq!(driver.instance_state(id), LifecycleState::PreInitFailed);

    assert!(driver.probe("nv").is_empty());
    assert_eq!(driver.instance_state(id), LifecycleState::PreInitFailed);
    assert_eq!(driver.instance_ids(), vec![id]);
}

#[test]
fn it_should_reclaim_only_the_freed_section() {
    let native = small_native();
    let config = HostConfig {
        device_sections: vec![
            DeviceSection::default(),
            DeviceSection {
                identifier: "Second Pi".to_string(),
                ..DeviceSection::default()
            },
        ],
        ..HostConfig::default()
    };
    let mut driver = driver_with(config, &native);
    let ids = driver.probe(DRIVER_NAME);
    driver.free_screen(ids[0]).unwrap();
    driver.pre_init(ids[1]).unwrap();

    // Section 0 is free again, so this probe reclaims and reuses slot 0.
    assert_eq!(driver.probe(DRIVER_NAME), vec![ids[0]]);
    assert_eq!(driver.instance_state(ids[0]), LifecycleState::Probed);
    assert_eq!(driver.instance_state(ids[1]), LifecycleState::PreInitialized);
    assert_eq!(native.open_displays(), 1);
}

#[test]
fn it_should_build_a_screen() {
    let native = small_native();
    let mut driver = driver_with(HostConfig::default(), &native);
    let id = active(&mut driver);

    assert_eq!(driver.instance_state(id), LifecycleState::ScreenActive);
    let table = driver.dispatch_table(id).unwrap();
    assert_eq!(table.count(SlotKind::Unsupported), 0);
    assert_eq!(table.slot(PrimitiveOp::FillRectangle).kind(), SlotKind::Native);
    assert_eq!(table.slot(PrimitiveOp::RealizeCursor).kind(), SlotKind::Forwarded);
    assert!(driver.screen(id).unwrap().has_shadow());
}

#[test]
fn it_should_reject_out_of_order_calls() {
    let native = small_native();
    let mut driver = driver_with(HostConfig::default(), &native);
    let id = driver.probe(DRIVER_NAME)[0];

    assert!(matches!(
        driver.screen_init(id),
        Err(DriverError::InvalidTransition {
            from: LifecycleState::Probed,
            op: "ScreenInit"
        })
    ));
    assert!(driver.switch_mode(id, Mode::new(64, 48)).is_err());
    assert!(driver.enter_vt(id).is_err());
    assert!(driver.leave_vt(id).is_err());
    assert!(driver.dispatch(id, PrimitiveOp::CreateGc, &PrimitiveArgs::None).is_err());
    assert!(matches!(
        driver.pre_init(InstanceId(7)),
        Err(DriverError::UnknownInstance(7))
    ));
    assert_eq!(driver.instance_state(InstanceId(7)), LifecycleState::Unregistered);
}

#[test]
fn it_should_reject_nested_enter_vt() {
    let native = small_native();
    let mut driver = driver_with(HostConfig::default(), &native);
    let id = active(&mut driver);

    assert!(matches!(
        driver.enter_vt(id),
        Err(DriverError::InvalidTransition {
            from: LifecycleState::ScreenActive,
            op: "EnterVT"
        })
    ));
    driver.leave_vt(id).unwrap();
    assert_eq!(driver.instance_state(id), LifecycleState::Suspended);
    assert!(driver.leave_vt(id).is_err());
    assert!(driver.dispatch(id, PrimitiveOp::CreateGc, &PrimitiveArgs::None).is_err());
    driver.enter_vt(id).unwrap();
    assert_eq!(driver.instance_state(id), LifecycleState::ScreenActive);
}

#[test]
fn it_should_switch_only_to_listed_modes() {
    let native = small_native();
    let config = HostConfig {
        mode_source: ModeSource::Database,
        modes: vec![Mode::new(1024, 768), Mode::new(800, 600), Mode::new(4096, 4096)],
        ..HostConfig::default()
    };
    let mut driver = driver_with(config, &native);
    let id = active(&mut driver);
    assert_eq!(driver.mode_list(id).unwrap().len(), 2);

    driver.switch_mode(id, Mode::new(800, 600)).unwrap();
    assert_eq!(driver.mode_list(id).unwrap().current(), Mode::new(800, 600));
    assert_eq!(driver.screen(id).unwrap().mode(), Mode::new(800, 600));

    let err = driver.switch_mode(id, Mode::new(4096, 4096)).unwrap_err();
    assert!(matches!(err, DriverError::ModeNotInList { width: 4096, height: 4096 }));
    assert_eq!(driver.mode_list(id).unwrap().current(), Mode::new(800, 600));

    let viewport = driver.adjust_frame(id, 1000, 1000).unwrap();
    assert_eq!(viewport, Viewport { x: 224, y: 168 });
}

#[test]
fn it_should_switch_by_geometry_regardless_of_refresh() {
    let native = small_native();
    let config = HostConfig {
        mode_source: ModeSource::Database,
        modes: vec![
            Mode::new(1024, 768),
            Mode {
                width: 800,
                height: 600,
                refresh_hz: 72,
            },
        ],
        ..HostConfig::default()
    };
    let mut driver = driver_with(config, &native);
    let id = active(&mut driver);

    driver.switch_mode(id, Mode::new(800, 600)).unwrap();
    let current = driver.mode_list(id).unwrap().current();
    assert_eq!((current.width, current.height, current.refresh_hz), (800, 600, 72));
    assert_eq!(driver.screen(id).unwrap().mode(), current);
}

#[test]
fn it_should_accept_the_native_mode_when_zoom_locked() {
    let native = small_native();
    let mut driver = driver_with(HostConfig::default(), &native);
    let id = active(&mut driver);
    driver.switch_mode(id, Mode::new(64, 48)).unwrap();
    assert!(driver.switch_mode(id, Mode::new(32, 24)).is_err());
}

#[test]
fn it_should_tear_down_idempotently() {
    let native = small_native();
    let mut driver = driver_with(HostConfig::default(), &native);
    let id = active(&mut driver);
    assert_eq!(native.live_contexts(), 1);

    driver.close_screen(id).unwrap();
    assert_eq!(driver.instance_state(id), LifecycleState::TornDown);
    assert!(driver.dispatch_table(id).is_none());
    assert_eq!(native.live_contexts(), 0);
    assert_eq!(native.open_displays(), 0);

    driver.close_screen(id).unwrap();
    driver.free_screen(id).unwrap();
    assert_eq!(driver.instance_state(id), LifecycleState::TornDown);
}

#[test]
fn it_should_free_a_probed_instance() {
    let native = small_native();
    let mut driver = driver_with(HostConfig::default(), &native);
    let id = driver.probe(DRIVER_NAME)[0];
    driver.free_screen(id).unwrap();
    assert_eq!(driver.instance_state(id), LifecycleState::TornDown);
}

#[test]
fn it_should_fail_screen_init_on_a_short_framebuffer() {
    let native = small_native();
    let path = std::env::temp_dir().join(format!("rpi-video-driver-fb-{}", std::process::id()));
    std::fs::write(&path, vec![0u8; 64]).unwrap();
    let config = HostConfig {
        framebuffer: Some(crate::config::FramebufferConfig {
            path: path.clone(),
            size: 64,
        }),
        ..HostConfig::default()
    };
    let mut driver = driver_with(config, &native);
    let id = driver.probe(DRIVER_NAME)[0];
    driver.pre_init(id).unwrap();
    assert!(driver.has_framebuffer(id));

    let err = driver.screen_init(id).unwrap_err();
    assert!(matches!(err, DriverError::FramebufferMapFailed(_)));
    assert_eq!(driver.instance_state(id), LifecycleState::ScreenInitFailed);
    assert!(driver.dispatch_table(id).is_none());
    assert_eq!(native.open_displays(), 0);
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn it_should_shrink_the_wait_only_while_damaged() {
    let native = small_native();
    let mut driver = driver_with(HostConfig::default(), &native);
    let id = active(&mut driver);
    let long = Some(Duration::from_secs(5));

    assert_eq!(driver.block_handler(long), long);
    assert_eq!(driver.block_handler(None), None);

    let rects = [Rect::new(0, 0, 8, 8)];
    driver
        .dispatch(id, PrimitiveOp::FillRectangle, &PrimitiveArgs::Fill { pixel: 1, rects: &rects })
        .unwrap();
    assert_eq!(driver.block_handler(long), Some(Duration::from_millis(16)));
    assert_eq!(driver.block_handler(None), Some(Duration::from_millis(16)));
    let short = Some(Duration::from_millis(2));
    assert_eq!(driver.block_handler(short), short);

    driver.wakeup_handler(0);
    assert_eq!(driver.screen(id).unwrap().pending_damage(), 0);
    assert_eq!(driver.block_handler(long), long);
}

#[test]
fn it_should_draw_into_the_framebuffer_when_mapped() {
    let native = small_native();
    let path = std::env::temp_dir().join(format!("rpi-video-driver-fb-ok-{}", std::process::id()));
    let len = 64 * 48 * 4;
    std::fs::write(&path, vec![0u8; len]).unwrap();
    let config = HostConfig {
        framebuffer: Some(crate::config::FramebufferConfig {
            path: path.clone(),
            size: len,
        }),
        ..HostConfig::default()
    };
    let mut driver = driver_with(config, &native);
    let id = active(&mut driver);
    assert!(!driver.screen(id).unwrap().has_shadow());

    let rects = [Rect::new(0, 0, 1, 1)];
    driver
        .dispatch(
            id,
            PrimitiveOp::FillRectangle,
            &PrimitiveArgs::Fill {
                pixel: 0x0102_0304,
                rects: &rects,
            },
        )
        .unwrap();
    driver.close_screen(id).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..4], &[0x04, 0x03, 0x02, 0x01]);
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn it_should_survive_a_copy_shifted_out_of_range() {
    let native = small_native();
    let mut driver = driver_with(HostConfig::default(), &native);
    let id = active(&mut driver);
    let reply = driver
        .dispatch(
            id,
            PrimitiveOp::CopyArea,
            &PrimitiveArgs::Copy {
                src: Rect::new(i32::MIN, 0, u32::MAX, 1),
                dst: Point { x: i32::MAX, y: 0 },
            },
        )
        .unwrap();
    assert_eq!(reply, PrimitiveReply::Done);
    assert_eq!(driver.instance_state(id), LifecycleState::ScreenActive);
}
