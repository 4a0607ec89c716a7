//! Swapchains backed by ordinary images, for headless replay.
//!
//! No presentation engine exists. Acquire hands back the captured index and
//! present only consumes wait semaphores. Sync objects the application
//! expects to be signaled are signaled by submitting an empty command
//! buffer and waiting for the queue to go idle.

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use retrace_core::{CapturedId, CoreError, ObjectKind};
use tracing::{debug, error, info, warn};

use crate::driver::{DeviceDriver, ImageDesc, LiveResource, SubmitBatch};
use crate::error::{ReplayError, VkResultExt};
use crate::reconcile::find_memory_type;
use crate::state::{StateInfo, SubresourceState};
use crate::transcoder::{ReadRegion, ReadResult, ResourceTranscoder, StateTransition};

/// What the replayed create call asked for.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainParams {
    pub id: CapturedId,
    pub surface: vk::SurfaceKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub array_layers: u32,
    pub usage: vk::ImageUsageFlags,
    /// Queue used for synthetic signal submissions.
    pub queue_family: u32,
    pub queue_index: u32,
}

#[derive(Debug, Clone, Copy)]
struct BackingImage {
    image: vk::Image,
    memory: vk::DeviceMemory,
}

struct SwapchainState {
    id: CapturedId,
    desc: ImageDesc,
    queue: vk::Queue,
    command_pool: vk::CommandPool,
    /// Recorded once, empty. Submitted to signal semaphores and fences.
    empty_commands: vk::CommandBuffer,
    images: Vec<BackingImage>,
}

pub struct OffscreenSwapchain {
    driver: Arc<dyn DeviceDriver>,
    swapchains: HashMap<vk::SwapchainKHR, SwapchainState>,
}

impl OffscreenSwapchain {
    pub fn new(driver: Arc<dyn DeviceDriver>) -> Self {
        Self {
            driver,
            swapchains: HashMap::new(),
        }
    }

    /// Surface handle derived from the captured identity. Never fails.
    pub fn create_surface(id: CapturedId) -> vk::SurfaceKHR {
        vk::SurfaceKHR::from_raw(id.raw())
    }

    pub fn contains(&self, swapchain: vk::SwapchainKHR) -> bool {
        self.swapchains.contains_key(&swapchain)
    }

    pub fn len(&self) -> usize {
        self.swapchains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.swapchains.is_empty()
    }

    /// Register a swapchain. Backing images are created on the first
    /// fill-mode [`get_images`](Self::get_images).
    pub fn create_swapchain(&mut self, params: &SwapchainParams) -> Result<vk::SwapchainKHR, ReplayError> {
        let handle = vk::SwapchainKHR::from_raw(params.id.raw());
        if self.swapchains.contains_key(&handle) {
            return Err(CoreError::DuplicateHandle {
                kind: ObjectKind::Swapchain,
                id: params.id,
            }
            .into());
        }

        let driver = &self.driver;
        let queue = driver.get_queue(params.queue_family, params.queue_index);
        let command_pool = driver
            .create_command_pool(params.queue_family)
            .vk_op("vkCreateCommandPool")?;
        let empty_commands = match record_empty(driver.as_ref(), command_pool) {
            Ok(cb) => cb,
            Err(e) => {
                driver.destroy_command_pool(command_pool);
                return Err(e);
            }
        };

        let mut desc = ImageDesc::simple_2d(
            params.format,
            params.extent.width,
            params.extent.height,
            params.usage | vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST,
        );
        desc.array_layers = params.array_layers.max(1);

        self.swapchains.insert(
            handle,
            SwapchainState {
                id: params.id,
                desc,
                queue,
                command_pool,
                empty_commands,
                images: Vec::new(),
            },
        );
        info!(
            "offscreen swapchain {} created ({}x{} {:?})",
            params.id, params.extent.width, params.extent.height, params.format
        );
        Ok(handle)
    }

    /// Query mode (`out == None`) returns `captured_count` unchanged. Fill
    /// mode creates the backing images on first use and writes as many
    /// handles as fit in `out`, returning how many were written.
    pub fn get_images(
        &mut self,
        swapchain: vk::SwapchainKHR,
        captured_count: u32,
        out: Option<&mut [vk::Image]>,
    ) -> Result<u32, ReplayError> {
        let state = lookup_mut(&mut self.swapchains, swapchain)?;
        let Some(out) = out else {
            return Ok(captured_count);
        };

        while state.images.len() < captured_count as usize {
            let backing = create_backing_image(self.driver.as_ref(), &state.desc)?;
            state.images.push(backing);
        }
        debug!(
            "swapchain {}: {} backing images",
            state.id,
            state.images.len()
        );

        let written = out.len().min(captured_count as usize);
        for (slot, backing) in out.iter_mut().zip(&state.images).take(written) {
            *slot = backing.image;
        }
        Ok(written as u32)
    }

    /// Always returns `captured_index`. Signals `semaphore` and `fence` when
    /// they are not null. A fence that is already signaled is left alone.
    pub fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        captured_index: u32,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<u32, ReplayError> {
        let state = lookup(&self.swapchains, swapchain)?;
        let mut fence = fence;
        if fence != vk::Fence::null()
            && self.driver.fence_status(fence).vk_op("vkGetFenceStatus")?
        {
            warn!(
                "swapchain {}: acquire fence {:?} is already signaled, not submitting it",
                state.id, fence
            );
            fence = vk::Fence::null();
        }
        if semaphore != vk::Semaphore::null() || fence != vk::Fence::null() {
            let mut batch = SubmitBatch {
                command_buffers: vec![state.empty_commands],
                ..Default::default()
            };
            if semaphore != vk::Semaphore::null() {
                batch.signal_semaphores.push(semaphore);
            }
            self.submit_and_idle(state.queue, &batch, fence)?;
        }
        Ok(captured_index)
    }

    /// Consume `wait_semaphores` with one submission on `queue` (or the
    /// first swapchain's queue when null). The submission carries no command
    /// buffers, so `queue` may belong to any family. Every swapchain is
    /// validated before anything is submitted.
    pub fn present(
        &self,
        queue: vk::Queue,
        swapchains: &[vk::SwapchainKHR],
        image_indices: &[u32],
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<(), ReplayError> {
        if image_indices.len() != swapchains.len() {
            return Err(ReplayError::RegionCount {
                expected: swapchains.len(),
                got: image_indices.len(),
            });
        }
        let mut first = None;
        for (swapchain, index) in swapchains.iter().zip(image_indices) {
            let state = lookup(&self.swapchains, *swapchain)?;
            debug!("present swapchain {} image {}", state.id, index);
            first.get_or_insert(state);
        }

        let (Some(state), false) = (first, wait_semaphores.is_empty()) else {
            return Ok(());
        };
        let queue = if queue == vk::Queue::null() {
            state.queue
        } else {
            queue
        };
        let batch = SubmitBatch {
            wait_semaphores: wait_semaphores
                .iter()
                .map(|s| (*s, vk::PipelineStageFlags::ALL_COMMANDS))
                .collect(),
            command_buffers: Vec::new(),
            signal_semaphores: Vec::new(),
        };
        self.submit_and_idle(queue, &batch, vk::Fence::null())
    }

    /// Read back one backing image, e.g. for a screenshot.
    pub fn read_image(
        &self,
        transcoder: &mut ResourceTranscoder,
        swapchain: vk::SwapchainKHR,
        index: u32,
        state: SubresourceState,
    ) -> Result<ReadResult, ReplayError> {
        let swapchain_state = lookup(&self.swapchains, swapchain)?;
        let Some(backing) = swapchain_state.images.get(index as usize) else {
            return Err(ReplayError::OutOfRange {
                offset: index as u64,
                size: 1,
                available: swapchain_state.images.len() as u64,
            });
        };
        let all = (0..swapchain_state.desc.subresource_count()).collect();
        transcoder.read_range(
            LiveResource::Image(backing.image),
            ReadRegion::Subresources(all),
            StateTransition::new(&[state], &[StateInfo::new(state.target())]),
            false,
        )
    }

    /// Release backing images and command resources. Returns false if the
    /// swapchain was not tracked.
    pub fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR) -> bool {
        let Some(state) = self.swapchains.remove(&swapchain) else {
            return false;
        };
        self.release(state);
        true
    }

    fn release(&self, state: SwapchainState) {
        if let Err(e) = self.driver.queue_wait_idle(state.queue) {
            error!("swapchain {}: queue wait before teardown failed: {:?}", state.id, e);
        }
        for backing in &state.images {
            self.driver.destroy_resource(LiveResource::Image(backing.image));
            self.driver.free_memory(backing.memory);
        }
        self.driver.destroy_command_pool(state.command_pool);
        debug!("swapchain {} released", state.id);
    }

    fn submit_and_idle(
        &self,
        queue: vk::Queue,
        batch: &SubmitBatch,
        fence: vk::Fence,
    ) -> Result<(), ReplayError> {
        self.driver
            .queue_submit(queue, batch, fence)
            .vk_op("vkQueueSubmit")?;
        self.driver.queue_wait_idle(queue).vk_op("vkQueueWaitIdle")
    }
}

impl Drop for OffscreenSwapchain {
    fn drop(&mut self) {
        let states: Vec<SwapchainState> = self.swapchains.drain().map(|(_, s)| s).collect();
        for state in states {
            self.release(state);
        }
    }
}

fn lookup(
    swapchains: &HashMap<vk::SwapchainKHR, SwapchainState>,
    handle: vk::SwapchainKHR,
) -> Result<&SwapchainState, ReplayError> {
    swapchains.get(&handle).ok_or_else(|| missing(handle))
}

fn lookup_mut(
    swapchains: &mut HashMap<vk::SwapchainKHR, SwapchainState>,
    handle: vk::SwapchainKHR,
) -> Result<&mut SwapchainState, ReplayError> {
    swapchains.get_mut(&handle).ok_or_else(|| missing(handle))
}

fn missing(handle: vk::SwapchainKHR) -> ReplayError {
    let id = CapturedId(handle.as_raw());
    error!("no offscreen bookkeeping for swapchain {}", id);
    ReplayError::MissingSwapchain { id }
}

fn record_empty(driver: &dyn DeviceDriver, pool: vk::CommandPool) -> Result<vk::CommandBuffer, ReplayError> {
    let cb = driver
        .allocate_command_buffer(pool)
        .vk_op("vkAllocateCommandBuffers")?;
    driver.begin_command_buffer(cb).vk_op("vkBeginCommandBuffer")?;
    driver.end_command_buffer(cb).vk_op("vkEndCommandBuffer")?;
    Ok(cb)
}

fn create_backing_image(driver: &dyn DeviceDriver, desc: &ImageDesc) -> Result<BackingImage, ReplayError> {
    let image = driver.create_image(desc).vk_op("vkCreateImage")?;
    let resource = LiveResource::Image(image);

    let bind = || -> Result<vk::DeviceMemory, ReplayError> {
        let requirements = driver
            .memory_requirements(resource)
            .vk_op("vkGetImageMemoryRequirements")?;
        let properties = driver.memory_properties();
        let type_index = find_memory_type(
            &properties,
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .or_else(|| {
            find_memory_type(
                &properties,
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::empty(),
            )
        })
        .ok_or(ReplayError::NoMemoryType("swapchain image"))?;
        let memory = driver
            .allocate_memory(requirements.size, type_index)
            .vk_op("vkAllocateMemory")?;
        if let Err(result) = driver.bind_memory(resource, memory, 0) {
            driver.free_memory(memory);
            return Err(ReplayError::Driver {
                op: "vkBindImageMemory",
                result,
            });
        }
        Ok(memory)
    };

    match bind() {
        Ok(memory) => Ok(BackingImage { image, memory }),
        Err(e) => {
            driver.destroy_resource(resource);
            Err(e)
        }
    }
}
