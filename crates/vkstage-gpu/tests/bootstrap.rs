//! Instance, device and swapchain bootstrap.

mod common;

use ash::vk;
use common::{assert_clean, backend_with, ready_backend_with, shaders, FrameLoop};
use vkstage_gpu::mock::{MockCall, MockDriver, MockPhysicalDevice, ObjectKind};
use vkstage_gpu::{Backend, BackendBuilder, GpuError};

fn validating(driver: MockDriver) -> Backend<MockDriver> {
    common::init_tracing();
    BackendBuilder::new()
        .app_name("bootstrap")
        .validation(true)
        .build(driver)
        .with_shader_loader(shaders())
}

fn instance_call(driver: &MockDriver) -> (Vec<String>, Vec<String>, vk::InstanceCreateFlags) {
    driver
        .calls()
        .iter()
        .find_map(|call| match call {
            MockCall::CreateInstance {
                extensions,
                layers,
                flags,
            } => Some((extensions.clone(), layers.clone(), *flags)),
            _ => None,
        })
        .expect("instance was created")
}

fn device_call(driver: &MockDriver) -> (vk::PhysicalDevice, Vec<u32>, Vec<String>) {
    driver
        .calls()
        .iter()
        .find_map(|call| match call {
            MockCall::CreateDevice {
                physical_device,
                queue_families,
                extensions,
            } => Some((*physical_device, queue_families.clone(), extensions.clone())),
            _ => None,
        })
        .expect("device was created")
}

fn swapchain_call(driver: &MockDriver) -> (u32, vk::Extent2D, vk::PresentModeKHR) {
    driver
        .calls()
        .iter()
        .rev()
        .find_map(|call| match call {
            MockCall::CreateSwapchain {
                min_image_count,
                extent,
                present_mode,
                ..
            } => Some((*min_image_count, *extent, *present_mode)),
            _ => None,
        })
        .expect("swapchain was created")
}

fn initialized(driver: MockDriver) -> Backend<MockDriver> {
    let mut backend = backend_with(driver, false);
    backend.create_instance(&["VK_KHR_surface"]).unwrap();
    backend.init(2).unwrap();
    backend
}

#[test]
fn missing_instance_extension_is_fatal() {
    let mut backend = backend_with(MockDriver::new(), false);
    let err = backend
        .create_instance(&["VK_KHR_surface", "VK_KHR_wayland_surface"])
        .unwrap_err();
    match err {
        GpuError::ExtensionNotSupported(name) => assert_eq!(name, "VK_KHR_wayland_surface"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(backend.driver().calls().is_empty());
    assert!(!backend.driver().instance_alive());
}

#[test]
fn validation_enables_layers_and_debug_report() {
    let mut backend = validating(MockDriver::new());
    backend.create_instance(&["VK_KHR_surface"]).unwrap();

    let (extensions, layers, flags) = instance_call(backend.driver());
    assert_eq!(layers, vec!["VK_LAYER_KHRONOS_validation".to_string()]);
    assert_eq!(
        extensions,
        vec![
            "VK_KHR_surface".to_string(),
            "VK_KHR_get_physical_device_properties2".to_string(),
            "VK_EXT_debug_report".to_string(),
        ]
    );
    assert_eq!(flags, vk::InstanceCreateFlags::empty());
    assert_eq!(backend.driver().live_of(ObjectKind::DebugCallback), 1);

    backend.init(2).unwrap();
    backend.shutdown().unwrap();
    assert_clean(backend.driver());
}

#[test]
fn validation_without_layers_skips_debug_report() {
    let mut driver = MockDriver::new();
    driver.instance_layers.clear();
    let mut backend = validating(driver);
    backend.create_instance(&["VK_KHR_surface"]).unwrap();

    let (extensions, layers, _) = instance_call(backend.driver());
    assert!(layers.is_empty());
    assert!(!extensions.iter().any(|e| e == "VK_EXT_debug_report"));
    assert_eq!(backend.driver().live_of(ObjectKind::DebugCallback), 0);
}

#[test]
fn debug_callback_failure_is_not_fatal() {
    let mut driver = MockDriver::new();
    driver.fail_debug_callback = true;
    let mut backend = validating(driver);
    backend.create_instance(&["VK_KHR_surface"]).unwrap();
    assert!(backend.driver().instance_alive());
    assert_eq!(backend.driver().live_of(ObjectKind::DebugCallback), 0);

    backend.init(2).unwrap();
    backend.shutdown().unwrap();
    assert_clean(backend.driver());
}

#[test]
fn optional_extensions_are_not_duplicated() {
    let mut backend = backend_with(MockDriver::new(), false);
    backend
        .create_instance(&["VK_KHR_get_physical_device_properties2", "VK_KHR_surface"])
        .unwrap();
    let (extensions, layers, _) = instance_call(backend.driver());
    assert_eq!(
        extensions
            .iter()
            .filter(|e| *e == "VK_KHR_get_physical_device_properties2")
            .count(),
        1
    );
    assert!(layers.is_empty());
}

#[test]
fn portability_enumeration_sets_the_flag() {
    let mut driver = MockDriver::new();
    driver
        .instance_extensions
        .push("VK_KHR_portability_enumeration".to_string());
    let mut backend = backend_with(driver, false);
    backend
        .create_instance(&["VK_KHR_surface", "VK_KHR_portability_enumeration"])
        .unwrap();

    let (_, _, flags) = instance_call(backend.driver());
    assert_eq!(flags, vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);
}

#[test]
fn devices_without_swapchain_support_are_skipped() {
    let no_swapchain = MockPhysicalDevice {
        extensions: Vec::new(),
        ..Default::default()
    };
    let backend = initialized(MockDriver::with_devices(vec![
        no_swapchain,
        MockPhysicalDevice::default(),
    ]));

    let (physical_device, families, extensions) = device_call(backend.driver());
    assert_eq!(physical_device, MockDriver::physical_device_handle(1));
    assert_eq!(families, vec![0]);
    assert_eq!(extensions, vec!["VK_KHR_swapchain".to_string()]);
    assert_eq!(
        backend.device().unwrap().physical_device,
        MockDriver::physical_device_handle(1)
    );
}

#[test]
fn portability_subset_is_enabled_when_present() {
    let mut device = MockPhysicalDevice::default();
    device
        .extensions
        .push("VK_KHR_portability_subset".to_string());
    let backend = initialized(MockDriver::with_devices(vec![device]));

    let (_, _, extensions) = device_call(backend.driver());
    assert_eq!(
        extensions,
        vec![
            "VK_KHR_swapchain".to_string(),
            "VK_KHR_portability_subset".to_string(),
        ]
    );
}

#[test]
fn no_suitable_device() {
    let headless = MockPhysicalDevice {
        present_families: Vec::new(),
        ..Default::default()
    };
    let no_modes = MockPhysicalDevice {
        present_modes: Vec::new(),
        ..Default::default()
    };
    let cases = [
        Vec::new(),
        vec![MockPhysicalDevice {
            extensions: Vec::new(),
            ..Default::default()
        }],
        vec![no_modes],
        vec![headless],
    ];

    for devices in cases {
        let mut backend = backend_with(MockDriver::with_devices(devices), false);
        backend.create_instance(&[]).unwrap();
        let err = backend.init(2).unwrap_err();
        assert!(matches!(err, GpuError::NoSuitableDevice), "{err}");
        assert!(!backend.driver().device_alive());

        backend.shutdown().unwrap();
        assert_clean(backend.driver());
    }
}

#[test]
fn bootstrap_steps_run_once_and_in_order() {
    let mut backend = backend_with(MockDriver::new(), false);
    assert!(matches!(backend.init(2), Err(GpuError::InvalidState(_))));
    assert!(matches!(
        backend.create_swapchain(),
        Err(GpuError::InvalidState(_))
    ));

    backend.create_instance(&[]).unwrap();
    assert!(matches!(
        backend.create_instance(&[]),
        Err(GpuError::InvalidState(_))
    ));

    backend.init(2).unwrap();
    assert!(matches!(backend.init(2), Err(GpuError::InvalidState(_))));
    backend.create_sync_objects().unwrap();
    assert!(matches!(
        backend.create_sync_objects(),
        Err(GpuError::InvalidState(_))
    ));

    backend.set_width_height(320, 240);
    backend.create_swapchain().unwrap();
    assert!(matches!(
        backend.create_swapchain(),
        Err(GpuError::InvalidState(_))
    ));

    backend.shutdown().unwrap();
    assert_clean(backend.driver());
}

#[test]
fn present_family_may_differ_from_graphics() {
    let device = MockPhysicalDevice {
        queue_families: vec![
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER,
                queue_count: 1,
                ..Default::default()
            },
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::TRANSFER,
                queue_count: 1,
                ..Default::default()
            },
        ],
        present_families: vec![1],
        ..Default::default()
    };
    let mut backend = ready_backend_with(MockDriver::with_devices(vec![device]), false, 2);
    let slot = backend.create_pipeline(common::triangle()).unwrap();
    backend.create_sync_objects().unwrap();

    let context = backend.device().unwrap();
    assert_eq!(context.families.graphics, 0);
    assert_eq!(context.families.present, 1);
    assert_eq!(context.present_queue, MockDriver::queue_handle(1));
    assert_eq!(device_call(backend.driver()).1, vec![0, 1]);

    let mut frames = FrameLoop::new(2);
    frames.render(&mut backend, slot).unwrap();
    backend.shutdown().unwrap();
    assert_clean(backend.driver());
}

#[test]
fn depth_format_falls_back_in_preference_order() {
    let device = MockPhysicalDevice {
        depth_formats: vec![vk::Format::D24_UNORM_S8_UINT, vk::Format::D32_SFLOAT_S8_UINT],
        ..Default::default()
    };
    let backend = ready_backend_with(MockDriver::with_devices(vec![device]), false, 2);
    assert_eq!(
        backend.swapchain().unwrap().depth.format,
        vk::Format::D32_SFLOAT_S8_UINT
    );
}

#[test]
fn missing_depth_format_releases_partial_swapchain() {
    let device = MockPhysicalDevice {
        depth_formats: Vec::new(),
        ..Default::default()
    };
    let mut backend = initialized(MockDriver::with_devices(vec![device]));
    backend.set_width_height(800, 600);

    let err = backend.create_swapchain().unwrap_err();
    assert!(matches!(err, GpuError::SwapchainCreation(_)), "{err}");
    assert!(backend.swapchain().is_none());
    assert_eq!(backend.driver().live_count(), 1, "only the command pool remains");

    backend.shutdown().unwrap();
    assert_clean(backend.driver());
}

#[test]
fn image_count_respects_surface_limits() {
    let cases = [((2, 8), 3), ((2, 2), 2), ((2, 0), 3), ((4, 0), 4), ((1, 1), 1)];
    for ((min, max), expected) in cases {
        let mut device = MockPhysicalDevice::default();
        device.capabilities.min_image_count = min;
        device.capabilities.max_image_count = max;
        let backend = ready_backend_with(MockDriver::with_devices(vec![device]), false, 2);

        assert_eq!(swapchain_call(backend.driver()).0, expected, "{min}..{max}");
        assert_eq!(backend.swapchain().unwrap().image_count(), expected as usize);
        assert_eq!(backend.swapchain().unwrap().framebuffers.len(), expected as usize);
    }
}

#[test]
fn fixed_surface_extent_overrides_request() {
    let mut driver = MockDriver::new();
    driver.set_current_extent(1280, 720);
    let backend = ready_backend_with(driver, false, 2);

    let extent = vk::Extent2D {
        width: 1280,
        height: 720,
    };
    assert_eq!(swapchain_call(backend.driver()).1, extent);
    assert_eq!(backend.swapchain().unwrap().extent, extent);
}

#[test]
fn present_mode_follows_vsync() {
    let backend = ready_backend_with(MockDriver::new(), false, 2);
    assert_eq!(swapchain_call(backend.driver()).2, vk::PresentModeKHR::MAILBOX);

    let mut backend = BackendBuilder::new()
        .validation(false)
        .vsync(true)
        .build(MockDriver::new())
        .with_shader_loader(shaders());
    backend.create_instance(&[]).unwrap();
    backend.init(2).unwrap();
    backend.set_width_height(800, 600);
    backend.create_swapchain().unwrap();
    assert_eq!(backend.swapchain().unwrap().present_mode, vk::PresentModeKHR::FIFO);

    let immediate = MockPhysicalDevice {
        present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE],
        ..Default::default()
    };
    let backend = ready_backend_with(MockDriver::with_devices(vec![immediate]), false, 2);
    assert_eq!(
        backend.swapchain().unwrap().present_mode,
        vk::PresentModeKHR::IMMEDIATE
    );
}
