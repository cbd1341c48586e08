//! Frame loop behaviour against the simulated GPU.

use std::collections::HashMap;

use frameloop_platform::{WindowGeometry, WindowRect};
use frameloop_renderer::{PresentationController, RenderLoop};
use frameloop_rhi::headless::{GpuEvent, HeadlessConfig, HeadlessGpu, RecordedCommand};
use frameloop_rhi::{ClearColor, Extent, FenceValue, PresentRequest, PresentStatus};

fn render_loop(config: HeadlessConfig) -> (HeadlessGpu, RenderLoop<HeadlessGpu>) {
    let gpu = HeadlessGpu::new(config);
    let chain = gpu.swapchain();
    let render_loop = RenderLoop::new(gpu.clone(), chain, ClearColor::default()).unwrap();
    (gpu, render_loop)
}

/// Checks that no allocator was reset before the fence passed the value
/// signaled after its previous submission.
fn assert_allocator_resets_follow_completion(events: &[GpuEvent]) {
    let mut last_allocator = None;
    let mut watermarks: HashMap<usize, FenceValue> = HashMap::new();

    for event in events {
        match event {
            GpuEvent::Execute { allocator, .. } => last_allocator = Some(*allocator),
            GpuEvent::Signal { value } => {
                if let Some(allocator) = last_allocator.take() {
                    watermarks.insert(allocator, *value);
                }
            }
            GpuEvent::AllocatorReset {
                allocator,
                completed,
            } => {
                let watermark = watermarks.get(allocator).copied().unwrap_or(0);
                assert!(
                    *completed >= watermark,
                    "allocator {allocator} reset at {completed} before {watermark} completed"
                );
            }
            _ => {}
        }
    }
}

fn presents(events: &[GpuEvent]) -> Vec<(usize, PresentRequest)> {
    events
        .iter()
        .filter_map(|event| match event {
            GpuEvent::Present { image, request } => Some((*image, *request)),
            _ => None,
        })
        .collect()
}

fn cleared_images(events: &[GpuEvent]) -> Vec<usize> {
    events
        .iter()
        .filter_map(|event| match event {
            GpuEvent::Execute { commands, .. } => {
                commands.iter().find_map(|command| match command {
                    RecordedCommand::Clear { image, .. } => Some(*image),
                    RecordedCommand::Transition { .. } => None,
                })
            }
            _ => None,
        })
        .collect()
}

#[test]
fn test_steady_state_fence_values_and_slot_reuse() {
    let (gpu, mut render_loop) = render_loop(HeadlessConfig::default());
    assert_eq!(render_loop.frame_count(), 2);

    for frame in 1..=5u64 {
        let slot = render_loop.current_index();
        let watermark = render_loop.watermark(slot).unwrap();
        assert!(render_loop.completed_value().unwrap() >= watermark);

        assert_eq!(
            render_loop.render(true).unwrap(),
            PresentStatus::Presented
        );
        assert_eq!(render_loop.fence_value(), frame);
        assert_eq!(render_loop.watermark(slot).unwrap(), frame);
    }

    assert_eq!(render_loop.frames_rendered(), 5);
    assert_eq!(cleared_images(&gpu.events()), vec![0, 1, 0, 1, 0]);
    assert_allocator_resets_follow_completion(&gpu.events());
}

#[test]
fn test_cpu_stays_within_one_frame_per_slot() {
    let (gpu, mut render_loop) = render_loop(HeadlessConfig {
        latency: 8,
        ..Default::default()
    });

    for _ in 0..6 {
        render_loop.render(true).unwrap();
        let next = render_loop.current_index();
        assert!(render_loop.completed_value().unwrap() >= render_loop.watermark(next).unwrap());
    }
    assert_allocator_resets_follow_completion(&gpu.events());
}

#[test]
fn test_resize_to_zero_clamps_to_one_pixel() {
    let (gpu, mut render_loop) = render_loop(HeadlessConfig::default());
    render_loop.render(true).unwrap();

    assert!(render_loop.resize(0, 0).unwrap());
    assert_eq!(render_loop.extent(), Extent::new(1, 1));
    assert!(gpu.events().contains(&GpuEvent::Recreate {
        extent: Extent::new(1, 1),
        image_count: 2,
    }));

    render_loop.render(true).unwrap();
}

#[test]
fn test_resize_to_same_size_does_nothing() {
    let (gpu, mut render_loop) = render_loop(HeadlessConfig::default());
    render_loop.render(true).unwrap();
    gpu.clear_events();

    assert!(!render_loop.resize(1280, 720).unwrap());
    assert_eq!(render_loop.recreate_count(), 0);
    assert!(gpu.events().is_empty());
}

#[test]
fn test_vsync_off_without_tearing_support_presents_synchronized() {
    let (gpu, mut render_loop) = render_loop(HeadlessConfig {
        tearing_supported: false,
        ..Default::default()
    });
    let mut controller = PresentationController::new(true);

    assert!(!controller.toggle_vsync());
    render_loop.render(controller.vsync()).unwrap();
    render_loop.render(controller.vsync()).unwrap();

    for (_, request) in presents(&gpu.events()) {
        assert_eq!(request.sync_interval, 1);
        assert!(!request.allow_tearing);
    }
}

#[test]
fn test_vsync_off_with_tearing_support_presents_immediately() {
    let (gpu, mut render_loop) = render_loop(HeadlessConfig {
        tearing_supported: true,
        ..Default::default()
    });

    render_loop.render(false).unwrap();
    render_loop.render(true).unwrap();

    let requests = presents(&gpu.events());
    assert_eq!(
        requests[0].1,
        PresentRequest {
            sync_interval: 0,
            allow_tearing: true
        }
    );
    assert_eq!(requests[1].1, PresentRequest::VSYNC);
}

#[test]
fn test_resize_between_submit_and_present_drains_first() {
    let (gpu, mut render_loop) = render_loop(HeadlessConfig::default());
    render_loop.render(true).unwrap();
    gpu.clear_events();

    let slot = render_loop.submit_frame().unwrap();
    assert!(render_loop.resize(800, 600).unwrap());

    let events = gpu.events();
    let present = events
        .iter()
        .position(|event| matches!(event, GpuEvent::Present { image, .. } if *image == slot))
        .unwrap();
    let recreate = events
        .iter()
        .position(|event| matches!(event, GpuEvent::Recreate { .. }))
        .unwrap();
    assert!(present < recreate);

    // The last signal before the rebuild was waited for
    let flushed = events[..recreate]
        .iter()
        .rev()
        .find_map(|event| match event {
            GpuEvent::Signal { value } => Some(*value),
            _ => None,
        })
        .unwrap();
    assert!(events[..recreate].contains(&GpuEvent::Wait {
        value: flushed,
        reached: true
    }));
    assert_eq!(render_loop.completed_value().unwrap(), flushed);

    assert_eq!(render_loop.extent(), Extent::new(800, 600));
    render_loop.render(true).unwrap();
}

#[test]
fn test_next_image_follows_presentation_engine() {
    let (gpu, mut render_loop) = render_loop(HeadlessConfig {
        image_count: 3,
        ..Default::default()
    });
    gpu.set_present_order(vec![2, 2, 1, 0]);

    for _ in 0..5 {
        render_loop.render(true).unwrap();
    }

    let events = gpu.events();
    assert_eq!(cleared_images(&events), vec![0, 2, 2, 1, 0]);
    assert_allocator_resets_follow_completion(&events);
}

#[test]
fn test_stale_present_rebuilds_with_new_image_count() {
    let (gpu, mut render_loop) = render_loop(HeadlessConfig::default());
    render_loop.render(true).unwrap();

    gpu.set_image_count_on_rebuild(3);
    gpu.mark_out_of_date();
    assert_eq!(render_loop.render(true).unwrap(), PresentStatus::Stale);

    assert_eq!(render_loop.recreate_count(), 1);
    assert_eq!(render_loop.frame_count(), 3);
    assert_eq!(render_loop.extent(), Extent::new(1280, 720));

    for _ in 0..4 {
        render_loop.render(true).unwrap();
    }
    assert_eq!(render_loop.frames_rendered(), 6);
    assert_allocator_resets_follow_completion(&gpu.events());
}

#[test]
fn test_shrinking_image_count_keeps_rendering() {
    let (gpu, mut render_loop) = render_loop(HeadlessConfig {
        image_count: 3,
        ..Default::default()
    });
    render_loop.render(true).unwrap();

    gpu.set_image_count_on_rebuild(2);
    assert!(render_loop.resize(640, 480).unwrap());
    assert_eq!(render_loop.frame_count(), 2);

    for _ in 0..3 {
        render_loop.render(true).unwrap();
    }
}

fn executes(events: &[GpuEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, GpuEvent::Execute { .. }))
        .count()
}

#[test]
fn test_resize_retries_rebuild_without_acquired_image() {
    let (gpu, mut render_loop) = render_loop(HeadlessConfig::default());
    render_loop.render(true).unwrap();

    gpu.set_stale_rebuilds(1);
    assert!(render_loop.resize(800, 600).unwrap());
    assert_eq!(
        render_loop.render(true).unwrap(),
        PresentStatus::Presented
    );

    assert_eq!(render_loop.recreate_count(), 2);
    assert_eq!(render_loop.extent(), Extent::new(800, 600));
    assert_allocator_resets_follow_completion(&gpu.events());
}

#[test]
fn test_stale_present_then_stale_rebuild_recovers_next_frame() {
    let (gpu, mut render_loop) = render_loop(HeadlessConfig::default());
    render_loop.render(true).unwrap();

    gpu.mark_out_of_date();
    gpu.set_stale_rebuilds(1);
    assert_eq!(render_loop.render(true).unwrap(), PresentStatus::Stale);
    assert_eq!(render_loop.recreate_count(), 1);

    assert_eq!(
        render_loop.render(true).unwrap(),
        PresentStatus::Presented
    );
    assert_eq!(render_loop.recreate_count(), 2);
    assert_eq!(render_loop.frames_rendered(), 3);
}

#[test]
fn test_persistently_stale_chain_skips_frames() {
    let (gpu, mut render_loop) = render_loop(HeadlessConfig::default());
    render_loop.render(true).unwrap();

    gpu.set_stale_rebuilds(10);
    assert!(render_loop.resize(640, 480).unwrap());
    gpu.clear_events();

    assert_eq!(render_loop.render(true).unwrap(), PresentStatus::Stale);
    assert_eq!(render_loop.render(true).unwrap(), PresentStatus::Stale);
    assert_eq!(executes(&gpu.events()), 0);
    assert_eq!(render_loop.frames_rendered(), 1);

    gpu.set_stale_rebuilds(0);
    assert_eq!(
        render_loop.render(true).unwrap(),
        PresentStatus::Presented
    );
    assert_eq!(executes(&gpu.events()), 1);
    assert_eq!(render_loop.frames_rendered(), 2);
}

struct FakeWindow {
    rect: WindowRect,
    decorated: bool,
}

impl WindowGeometry for FakeWindow {
    fn rect(&self) -> WindowRect {
        self.rect
    }

    fn set_rect(&mut self, rect: WindowRect) -> Option<(u32, u32)> {
        self.rect = rect;
        None
    }

    fn set_decorated(&mut self, decorated: bool) {
        self.decorated = decorated;
    }

    fn monitor_rect(&self) -> Option<WindowRect> {
        Some(WindowRect {
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
        })
    }
}

#[test]
fn test_fullscreen_round_trip_resizes_swapchain() {
    let (_gpu, mut render_loop) = render_loop(HeadlessConfig::default());
    let mut controller = PresentationController::default();
    let windowed = WindowRect {
        x: 320,
        y: 180,
        width: 1280,
        height: 720,
    };
    let mut window = FakeWindow {
        rect: windowed,
        decorated: true,
    };

    render_loop.render(true).unwrap();

    let change = controller.toggle_fullscreen(&mut window).unwrap();
    assert_eq!(change.applied_size, None);
    assert!(!window.decorated);
    assert!(render_loop
        .resize(window.rect.width, window.rect.height)
        .unwrap());
    assert_eq!(render_loop.extent(), Extent::new(1920, 1080));
    render_loop.render(true).unwrap();

    assert!(controller.toggle_fullscreen(&mut window).is_some());
    assert!(window.decorated);
    assert_eq!(window.rect, windowed);
    assert!(render_loop
        .resize(window.rect.width, window.rect.height)
        .unwrap());
    assert_eq!(render_loop.extent(), Extent::new(1280, 720));
    assert_eq!(render_loop.recreate_count(), 2);
}
