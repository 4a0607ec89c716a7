//! Offscreen swapchain tests: image counts, acquire indices, semaphore
//! signaling, present validation and teardown.
//!
//! Run with: cargo test -p retrace-replay --test offscreen_test -- --nocapture

mod common;

use ash::vk;
use ash::vk::Handle;
use common::{pattern, queue_family_of, transcoder, FakeDriver};
use retrace_core::{CapturedId, CoreError, ObjectKind};
use retrace_replay::driver::{DeviceDriver, LiveResource};
use retrace_replay::offscreen::SwapchainParams;
use retrace_replay::state::{ResourceState, SubresourceState};
use retrace_replay::{OffscreenSwapchain, ReplayError};

fn params(id: u64) -> SwapchainParams {
    SwapchainParams {
        id: CapturedId(id),
        surface: OffscreenSwapchain::create_surface(CapturedId(id + 1000)),
        format: vk::Format::B8G8R8A8_UNORM,
        extent: vk::Extent2D {
            width: 32,
            height: 16,
        },
        array_layers: 1,
        usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        queue_family: 0,
        queue_index: 0,
    }
}

fn setup(id: u64) -> (std::sync::Arc<FakeDriver>, OffscreenSwapchain, vk::SwapchainKHR) {
    let driver = FakeDriver::new();
    let mut offscreen = OffscreenSwapchain::new(driver.as_dyn());
    let swapchain = offscreen.create_swapchain(&params(id)).expect("create swapchain");
    (driver, offscreen, swapchain)
}

#[test]
fn test_surface_handle_is_captured_identity() {
    let surface = OffscreenSwapchain::create_surface(CapturedId(0xabc));
    assert_eq!(surface.as_raw(), 0xabc);
    assert_eq!(surface, OffscreenSwapchain::create_surface(CapturedId(0xabc)));
}

#[test]
fn test_create_defers_images() {
    let (driver, offscreen, swapchain) = setup(7);
    assert_eq!(swapchain.as_raw(), 7);
    assert!(offscreen.contains(swapchain));
    assert_eq!(offscreen.len(), 1);
    assert_eq!(driver.live_images(), 0);
}

#[test]
fn test_duplicate_create_rejected() {
    let (_driver, mut offscreen, _) = setup(7);
    match offscreen.create_swapchain(&params(7)) {
        Err(ReplayError::Core(CoreError::DuplicateHandle {
            kind: ObjectKind::Swapchain,
            id: CapturedId(7),
        })) => println!("duplicate swapchain rejected"),
        other => panic!("expected DuplicateHandle, got {:?}", other),
    }
    assert_eq!(offscreen.len(), 1);
}

#[test]
fn test_get_images_query_then_fill() {
    let (driver, mut offscreen, swapchain) = setup(1);

    let count = offscreen.get_images(swapchain, 3, None).expect("query");
    assert_eq!(count, 3);
    assert_eq!(driver.live_images(), 0);

    let mut images = [vk::Image::null(); 3];
    let written = offscreen
        .get_images(swapchain, 3, Some(&mut images))
        .expect("fill");
    assert_eq!(written, 3);
    assert!(images.iter().all(|i| *i != vk::Image::null()));
    assert!(images[0] != images[1] && images[1] != images[2] && images[0] != images[2]);
    assert_eq!(driver.live_images(), 3);
    println!("swapchain images: {:?}", images);
}

#[test]
fn test_query_count_is_always_captured_count() {
    let (_driver, mut offscreen, swapchain) = setup(1);
    for captured in [1, 2, 3, 5, 8, 16] {
        let count = offscreen.get_images(swapchain, captured, None).expect("query");
        assert_eq!(count, captured);
    }
}

#[test]
fn test_fill_is_stable_and_bounded_by_output() {
    let (driver, mut offscreen, swapchain) = setup(1);

    let mut short = [vk::Image::null(); 2];
    let written = offscreen
        .get_images(swapchain, 3, Some(&mut short))
        .expect("fill");
    assert_eq!(written, 2);
    assert_eq!(driver.live_images(), 3);

    let mut full = [vk::Image::null(); 4];
    let written = offscreen
        .get_images(swapchain, 3, Some(&mut full))
        .expect("fill");
    assert_eq!(written, 3);
    assert_eq!(full[..2], short[..]);
    assert_eq!(full[3], vk::Image::null());
    assert_eq!(driver.live_images(), 3);
}

#[test]
fn test_backing_images_are_copyable() {
    let (driver, mut offscreen, swapchain) = setup(1);
    let mut images = [vk::Image::null(); 1];
    offscreen
        .get_images(swapchain, 1, Some(&mut images))
        .expect("fill");

    match driver.resource_desc(LiveResource::Image(images[0])) {
        Ok(retrace_replay::driver::ResourceDesc::Image(desc)) => {
            assert!(desc.usage.contains(vk::ImageUsageFlags::TRANSFER_SRC));
            assert!(desc.usage.contains(vk::ImageUsageFlags::TRANSFER_DST));
            assert!(desc.usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
            assert_eq!(desc.format, vk::Format::B8G8R8A8_UNORM);
            assert_eq!(desc.extent.width, 32);
        }
        other => panic!("expected an image description, got {:?}", other),
    }
    assert!(driver.bound_memory(LiveResource::Image(images[0])).is_some());
}

#[test]
fn test_acquire_returns_captured_index() {
    let (driver, offscreen, swapchain) = setup(1);
    for index in [0, 2, 1, 2, 0, 7] {
        let acquired = offscreen
            .acquire_next_image(swapchain, index, vk::Semaphore::null(), vk::Fence::null())
            .expect("acquire");
        assert_eq!(acquired, index);
    }
    // Nothing to signal, nothing submitted.
    assert_eq!(driver.stats().submits, 0);
}

#[test]
fn test_acquire_signals_semaphore() {
    let (driver, offscreen, swapchain) = setup(1);
    let semaphore = driver.create_semaphore().expect("semaphore");

    let index = offscreen
        .acquire_next_image(swapchain, 2, semaphore, vk::Fence::null())
        .expect("acquire");
    assert_eq!(index, 2);
    assert!(driver.semaphore_signaled(semaphore));

    let stats = driver.stats();
    assert_eq!(stats.submits, 1);
    assert_eq!(stats.wait_idles, 1);
}

#[test]
fn test_acquire_signals_fence() {
    let (driver, offscreen, swapchain) = setup(1);
    let fence = driver.create_fence(false).expect("fence");

    offscreen
        .acquire_next_image(swapchain, 0, vk::Semaphore::null(), fence)
        .expect("acquire");
    assert!(driver.fence_signaled(fence));
}

#[test]
fn test_acquire_skips_signaled_fence() {
    let (driver, offscreen, swapchain) = setup(1);
    let fence = driver.create_fence(true).expect("fence");

    // Fence alone: nothing left to signal, nothing submitted.
    offscreen
        .acquire_next_image(swapchain, 1, vk::Semaphore::null(), fence)
        .expect("acquire");
    assert_eq!(driver.stats().submits, 0);

    let semaphore = driver.create_semaphore().expect("semaphore");
    let index = offscreen
        .acquire_next_image(swapchain, 2, semaphore, fence)
        .expect("acquire with signaled fence");
    assert_eq!(index, 2);
    assert!(driver.semaphore_signaled(semaphore));
    assert!(driver.fence_signaled(fence));

    let stats = driver.stats();
    assert_eq!(stats.submits, 1);
    assert_eq!(stats.invalid_submits, 0);
}

#[test]
fn test_present_consumes_wait_semaphores() {
    let (driver, offscreen, swapchain) = setup(1);
    let first = driver.create_semaphore().expect("semaphore");
    let second = driver.create_semaphore().expect("semaphore");
    offscreen
        .acquire_next_image(swapchain, 0, first, vk::Fence::null())
        .expect("acquire");
    offscreen
        .acquire_next_image(swapchain, 1, second, vk::Fence::null())
        .expect("acquire");
    driver.reset_stats();

    offscreen
        .present(vk::Queue::null(), &[swapchain], &[0], &[first, second])
        .expect("present");

    assert!(!driver.semaphore_signaled(first));
    assert!(!driver.semaphore_signaled(second));
    assert_eq!(driver.stats().submits, 1);
}

#[test]
fn test_present_on_queue_of_another_family() {
    let (driver, offscreen, swapchain) = setup(1);
    let semaphore = driver.create_semaphore().expect("semaphore");
    offscreen
        .acquire_next_image(swapchain, 0, semaphore, vk::Fence::null())
        .expect("acquire");
    driver.reset_stats();

    let other_family = driver.get_queue(1, 0);
    assert_eq!(queue_family_of(other_family), 1);
    offscreen
        .present(other_family, &[swapchain], &[0], &[semaphore])
        .expect("present on family 1");

    assert!(!driver.semaphore_signaled(semaphore));
    let stats = driver.stats();
    assert_eq!(stats.submits, 1);
    assert_eq!(stats.invalid_submits, 0);
}

#[test]
fn test_present_without_semaphores_submits_nothing() {
    let (driver, offscreen, swapchain) = setup(1);
    offscreen
        .present(driver.get_queue(0, 0), &[swapchain], &[0], &[])
        .expect("present");
    assert_eq!(driver.stats().submits, 0);
}

#[test]
fn test_present_validates_every_swapchain_first() {
    let (driver, offscreen, swapchain) = setup(1);
    let semaphore = driver.create_semaphore().expect("semaphore");
    offscreen
        .acquire_next_image(swapchain, 0, semaphore, vk::Fence::null())
        .expect("acquire");
    driver.reset_stats();

    let unknown = vk::SwapchainKHR::from_raw(99);
    match offscreen.present(vk::Queue::null(), &[swapchain, unknown], &[0, 0], &[semaphore]) {
        Err(ReplayError::MissingSwapchain { id: CapturedId(99) }) => println!("unknown swapchain rejected"),
        other => panic!("expected MissingSwapchain, got {:?}", other),
    }
    assert_eq!(driver.stats().submits, 0);
    assert!(driver.semaphore_signaled(semaphore));
}

#[test]
fn test_present_index_count_mismatch() {
    let (_driver, offscreen, swapchain) = setup(1);
    match offscreen.present(vk::Queue::null(), &[swapchain], &[0, 1], &[]) {
        Err(ReplayError::RegionCount { expected: 1, got: 2 }) => {}
        other => panic!("expected RegionCount, got {:?}", other),
    }
}

#[test]
fn test_missing_swapchain_operations() {
    let (_driver, mut offscreen, _) = setup(1);
    let unknown = vk::SwapchainKHR::from_raw(55);

    match offscreen.acquire_next_image(unknown, 0, vk::Semaphore::null(), vk::Fence::null()) {
        Err(ReplayError::MissingSwapchain { .. }) => {}
        other => panic!("expected MissingSwapchain, got {:?}", other),
    }
    match offscreen.get_images(unknown, 3, None) {
        Err(ReplayError::MissingSwapchain { .. }) => {}
        other => panic!("expected MissingSwapchain, got {:?}", other),
    }
    assert!(!offscreen.destroy_swapchain(unknown));
}

#[test]
fn test_destroy_releases_images() {
    let (driver, mut offscreen, swapchain) = setup(1);
    let mut images = [vk::Image::null(); 3];
    offscreen
        .get_images(swapchain, 3, Some(&mut images))
        .expect("fill");
    let allocations = driver.live_allocations();

    assert!(offscreen.destroy_swapchain(swapchain));
    assert_eq!(driver.live_images(), 0);
    assert_eq!(driver.live_allocations(), allocations - 3);
    assert_eq!(driver.live_pools(), 0);
    assert!(offscreen.is_empty());
    assert!(!offscreen.destroy_swapchain(swapchain));
}

#[test]
fn test_drop_releases_all_swapchains() {
    let driver = FakeDriver::new();
    {
        let mut offscreen = OffscreenSwapchain::new(driver.as_dyn());
        for id in [1, 2] {
            let swapchain = offscreen.create_swapchain(&params(id)).expect("create");
            let mut images = [vk::Image::null(); 2];
            offscreen
                .get_images(swapchain, 2, Some(&mut images))
                .expect("fill");
        }
        assert_eq!(driver.live_images(), 4);
    }
    assert_eq!(driver.live_images(), 0);
    assert_eq!(driver.live_allocations(), 0);
    assert_eq!(driver.live_pools(), 0);
}

#[test]
fn test_read_image_returns_backing_contents() {
    let (driver, mut offscreen, swapchain) = setup(1);
    let mut images = [vk::Image::null(); 2];
    offscreen
        .get_images(swapchain, 2, Some(&mut images))
        .expect("fill");

    let mut t = transcoder(&driver);
    let layout = t.copy_layout(LiveResource::Image(images[1])).expect("layout");
    let contents = pattern(layout.total_size as usize, 21);
    driver.fill(LiveResource::Image(images[1]), &contents);

    let present = SubresourceState::Stable(ResourceState::PRESENT);
    let result = offscreen
        .read_image(&mut t, swapchain, 1, present)
        .expect("read image");
    assert_eq!(result.data, contents[..layout.sizes[0] as usize]);
    assert_eq!(result.states, vec![present]);

    match offscreen.read_image(&mut t, swapchain, 2, present) {
        Err(ReplayError::OutOfRange { offset: 2, .. }) => {}
        other => panic!("expected OutOfRange, got {:?}", other),
    }
}
