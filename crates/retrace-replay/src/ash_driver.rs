use std::collections::HashMap;
use std::ffi::CStr;
use std::time::Duration;

use ash::vk;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::driver::{
    merge_depth_stencil_planes, BoundMemory, DeviceDriver, FootprintSet, ImageDesc, ImageRegion,
    LiveResource, ResourceBarrier, ResourceDesc, SubmitBatch, SubresourceFootprint, VkResult,
};
use crate::error::{ReplayError, VkResultExt};
use crate::format;
use crate::state::{BarrierPhase, ResourceState};

struct ResourceRecord {
    desc: ResourceDesc,
    binding: Option<(vk::DeviceMemory, u64)>,
}

#[derive(Debug, Clone, Copy)]
struct Allocation {
    size: u64,
    flags: vk::MemoryPropertyFlags,
}

/// [`DeviceDriver`] on a real Vulkan device through `ash`.
pub struct AshDriver {
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    limits: vk::PhysicalDeviceLimits,
    /// Destroy device and instance on drop.
    owned: bool,

    // ── Tracking ────────────────────────────────────────────
    resources: Mutex<HashMap<LiveResource, ResourceRecord>>,
    allocations: Mutex<HashMap<vk::DeviceMemory, Allocation>>,
}

/// Queue family picked for a headless device.
#[derive(Debug, Clone, Copy)]
pub struct HeadlessQueue {
    pub family: u32,
    pub index: u32,
}

impl AshDriver {
    /// Wrap an existing device. The caller keeps ownership of it.
    pub fn from_parts(
        instance: ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
    ) -> Self {
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let limits = unsafe { instance.get_physical_device_properties(physical_device) }.limits;
        Self {
            instance,
            physical_device,
            device,
            memory_properties,
            limits,
            owned: false,
            resources: Mutex::new(HashMap::new()),
            allocations: Mutex::new(HashMap::new()),
        }
    }

    /// Create an instance and a device with one queue on physical device
    /// `device_index`, without any windowing extension.
    pub fn create_headless(
        entry: &ash::Entry,
        device_index: usize,
    ) -> Result<(Self, HeadlessQueue), ReplayError> {
        let app_info = vk::ApplicationInfo::default()
            .application_name(c"retrace")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"retrace")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::make_api_version(0, 1, 1, 0));
        let create_info = vk::InstanceCreateInfo::default().application_info(&app_info);
        let instance =
            unsafe { entry.create_instance(&create_info, None) }.vk_op("vkCreateInstance")?;

        match Self::open_device(&instance, device_index) {
            Ok((physical_device, device, queue)) => {
                let mut driver = Self::from_parts(instance, physical_device, device);
                driver.owned = true;
                Ok((driver, queue))
            }
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                Err(e)
            }
        }
    }

    fn open_device(
        instance: &ash::Instance,
        device_index: usize,
    ) -> Result<(vk::PhysicalDevice, ash::Device, HeadlessQueue), ReplayError> {
        let physical_devices = unsafe { instance.enumerate_physical_devices() }
            .vk_op("vkEnumeratePhysicalDevices")?;
        let Some(&physical_device) = physical_devices.get(device_index) else {
            return Err(ReplayError::Driver {
                op: "vkEnumeratePhysicalDevices",
                result: vk::Result::ERROR_INITIALIZATION_FAILED,
            });
        };

        let props = unsafe { instance.get_physical_device_properties(physical_device) };
        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy();

        let families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let wanted = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
        let Some(family) = families
            .iter()
            .position(|f| f.queue_count > 0 && f.queue_flags.intersects(wanted))
        else {
            return Err(ReplayError::Unsupported(format!("{} has no transfer-capable queue", name)));
        };

        let priorities = [1.0f32];
        let queue_info = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(family as u32)
            .queue_priorities(&priorities)];
        let device_info = vk::DeviceCreateInfo::default().queue_create_infos(&queue_info);
        let device = unsafe { instance.create_device(physical_device, &device_info, None) }
            .vk_op("vkCreateDevice")?;

        info!("opened {} (queue family {})", name, family);
        Ok((
            physical_device,
            device,
            HeadlessQueue {
                family: family as u32,
                index: 0,
            },
        ))
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    fn allocation(&self, memory: vk::DeviceMemory) -> VkResult<Allocation> {
        self.allocations
            .lock()
            .get(&memory)
            .copied()
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)
    }

    /// Map the whole allocation, run `f` on the mapped bytes, unmap.
    fn with_mapping<F>(&self, memory: vk::DeviceMemory, offset: u64, len: usize, write: bool, f: F) -> VkResult<()>
    where
        F: FnOnce(*mut u8),
    {
        let allocation = self.allocation(memory)?;
        match offset.checked_add(len as u64) {
            Some(end) if end <= allocation.size => {}
            _ => return Err(vk::Result::ERROR_MEMORY_MAP_FAILED),
        }

        let coherent = allocation
            .flags
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT);
        let whole = [vk::MappedMemoryRange::default()
            .memory(memory)
            .offset(0)
            .size(vk::WHOLE_SIZE)];

        let ptr = unsafe {
            self.device
                .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())?
        } as *mut u8;

        if !coherent && !write {
            if let Err(e) = unsafe { self.device.invalidate_mapped_memory_ranges(&whole) } {
                unsafe { self.device.unmap_memory(memory) };
                return Err(e);
            }
        }

        f(unsafe { ptr.add(offset as usize) });

        let flushed = if !coherent && write {
            unsafe { self.device.flush_mapped_memory_ranges(&whole) }
        } else {
            Ok(())
        };
        unsafe { self.device.unmap_memory(memory) };
        flushed
    }
}

impl Drop for AshDriver {
    fn drop(&mut self) {
        let leaked = self.resources.lock().len();
        if leaked > 0 {
            warn!("{} resources still alive at driver teardown", leaked);
        }
        if self.owned {
            unsafe {
                let _ = self.device.device_wait_idle();
                self.device.destroy_device(None);
                self.instance.destroy_instance(None);
            }
        }
    }
}

// ── State translation ───────────────────────────────────────

type Usage = (vk::AccessFlags, vk::PipelineStageFlags, vk::ImageLayout);

/// Access mask, pipeline stages and image layout for one state bit.
fn bit_usage(bit: ResourceState) -> Usage {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;

    let shaders = S::VERTEX_SHADER | S::FRAGMENT_SHADER | S::COMPUTE_SHADER;
    let fragment_tests = S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS;
    let table: [(ResourceState, Usage); 14] = [
        (ResourceState::UNDEFINED, (A::empty(), S::TOP_OF_PIPE, L::UNDEFINED)),
        (
            ResourceState::COMMON,
            (A::MEMORY_READ | A::MEMORY_WRITE, S::ALL_COMMANDS, L::GENERAL),
        ),
        (
            ResourceState::VERTEX_AND_CONSTANT_BUFFER,
            (
                A::VERTEX_ATTRIBUTE_READ | A::UNIFORM_READ,
                S::VERTEX_INPUT | shaders,
                L::SHADER_READ_ONLY_OPTIMAL,
            ),
        ),
        (ResourceState::INDEX_BUFFER, (A::INDEX_READ, S::VERTEX_INPUT, L::GENERAL)),
        (
            ResourceState::RENDER_TARGET,
            (
                A::COLOR_ATTACHMENT_READ | A::COLOR_ATTACHMENT_WRITE,
                S::COLOR_ATTACHMENT_OUTPUT,
                L::COLOR_ATTACHMENT_OPTIMAL,
            ),
        ),
        (
            ResourceState::UNORDERED_ACCESS,
            (A::SHADER_READ | A::SHADER_WRITE, shaders, L::GENERAL),
        ),
        (
            ResourceState::DEPTH_WRITE,
            (
                A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
                fragment_tests,
                L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ),
        ),
        (
            ResourceState::DEPTH_READ,
            (
                A::DEPTH_STENCIL_ATTACHMENT_READ,
                fragment_tests,
                L::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            ),
        ),
        (
            ResourceState::SHADER_RESOURCE,
            (A::SHADER_READ, shaders, L::SHADER_READ_ONLY_OPTIMAL),
        ),
        (
            ResourceState::INDIRECT_ARGUMENT,
            (A::INDIRECT_COMMAND_READ, S::DRAW_INDIRECT, L::GENERAL),
        ),
        (
            ResourceState::COPY_DEST,
            (A::TRANSFER_WRITE, S::TRANSFER, L::TRANSFER_DST_OPTIMAL),
        ),
        (
            ResourceState::COPY_SOURCE,
            (A::TRANSFER_READ, S::TRANSFER, L::TRANSFER_SRC_OPTIMAL),
        ),
        // Offscreen images never reach a presentation engine.
        (ResourceState::PRESENT, (A::MEMORY_READ, S::BOTTOM_OF_PIPE, L::GENERAL)),
        (
            ResourceState::HOST_ACCESS,
            (A::HOST_READ | A::HOST_WRITE, S::HOST, L::GENERAL),
        ),
    ];

    table
        .iter()
        .find(|(state, _)| *state == bit)
        .map(|(_, usage)| *usage)
        .unwrap_or((A::MEMORY_READ | A::MEMORY_WRITE, S::ALL_COMMANDS, L::GENERAL))
}

fn state_usage(state: ResourceState) -> Usage {
    let mut bits = state.iter();
    match (bits.next(), bits.next()) {
        (None, _) => bit_usage(ResourceState::COMMON),
        (Some(bit), None) => bit_usage(bit),
        _ => state
            .iter()
            .map(bit_usage)
            .fold(
                (vk::AccessFlags::empty(), vk::PipelineStageFlags::empty(), vk::ImageLayout::GENERAL),
                |(access, stages, layout), (a, s, _)| (access | a, stages | s, layout),
            ),
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn lcm(a: u64, b: u64) -> u64 {
    a / gcd(a, b) * b
}

impl DeviceDriver for AshDriver {
    fn device_handle(&self) -> vk::Device {
        self.device.handle()
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.memory_properties
    }

    fn get_queue(&self, queue_family_index: u32, queue_index: u32) -> vk::Queue {
        unsafe { self.device.get_device_queue(queue_family_index, queue_index) }
    }

    // ── Resources ───────────────────────────────────────────

    fn create_buffer(&self, size: u64, usage: vk::BufferUsageFlags) -> VkResult<vk::Buffer> {
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&info, None)? };
        self.resources.lock().insert(
            LiveResource::Buffer(buffer),
            ResourceRecord {
                desc: ResourceDesc::Buffer { size, usage },
                binding: None,
            },
        );
        debug!("created buffer {:?} ({} bytes)", buffer, size);
        Ok(buffer)
    }

    fn create_image(&self, desc: &ImageDesc) -> VkResult<vk::Image> {
        let info = vk::ImageCreateInfo::default()
            .image_type(desc.image_type)
            .format(desc.format)
            .extent(desc.extent)
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .samples(desc.samples)
            .tiling(desc.tiling)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { self.device.create_image(&info, None)? };
        self.resources.lock().insert(
            LiveResource::Image(image),
            ResourceRecord {
                desc: ResourceDesc::Image(*desc),
                binding: None,
            },
        );
        debug!("created image {:?} ({:?} {:?})", image, desc.format, desc.extent);
        Ok(image)
    }

    fn destroy_resource(&self, resource: LiveResource) {
        self.resources.lock().remove(&resource);
        match resource {
            LiveResource::Buffer(buffer) => unsafe { self.device.destroy_buffer(buffer, None) },
            LiveResource::Image(image) => unsafe { self.device.destroy_image(image, None) },
        }
    }

    fn resource_desc(&self, resource: LiveResource) -> VkResult<ResourceDesc> {
        self.resources
            .lock()
            .get(&resource)
            .map(|r| r.desc)
            .ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn memory_requirements(&self, resource: LiveResource) -> VkResult<vk::MemoryRequirements> {
        Ok(match resource {
            LiveResource::Buffer(buffer) => unsafe {
                self.device.get_buffer_memory_requirements(buffer)
            },
            LiveResource::Image(image) => unsafe {
                self.device.get_image_memory_requirements(image)
            },
        })
    }

    fn bound_memory(&self, resource: LiveResource) -> Option<BoundMemory> {
        let (memory, offset) = self.resources.lock().get(&resource)?.binding?;
        let flags = self.allocations.lock().get(&memory)?.flags;
        Some(BoundMemory {
            memory,
            offset,
            flags,
        })
    }

    fn copy_footprints(&self, desc: &ResourceDesc) -> VkResult<FootprintSet> {
        let image = match desc {
            ResourceDesc::Buffer { size, .. } => {
                return Ok(FootprintSet {
                    footprints: vec![SubresourceFootprint {
                        offset: 0,
                        row_pitch: *size,
                        row_count: 1,
                        row_size: *size,
                        depth: 1,
                        region: None,
                    }],
                    total_size: *size,
                });
            }
            ResourceDesc::Image(image) => image,
        };

        let pitch_alignment = self.limits.optimal_buffer_copy_row_pitch_alignment.max(1);
        let offset_alignment = self.limits.optimal_buffer_copy_offset_alignment.max(1);

        let mut footprints = Vec::with_capacity(image.subresource_count() as usize);
        let mut cursor = 0u64;
        for subresource in 0..image.subresource_count() {
            let region = image.region(subresource);
            let block = format::block_info(image.format, region.aspect)
                .ok_or(vk::Result::ERROR_FORMAT_NOT_SUPPORTED)?;
            let bytes = block.bytes as u64;

            let blocks_wide = region.extent.width.div_ceil(block.width) as u64;
            let rows = region.extent.height.div_ceil(block.height);
            let row_bytes = blocks_wide * bytes;
            let row_pitch = align_up(row_bytes, lcm(pitch_alignment, bytes));
            let offset = align_up(cursor, lcm(lcm(offset_alignment, bytes), 4));
            let depth = region.extent.depth;

            let footprint = SubresourceFootprint {
                offset,
                row_pitch,
                row_count: rows,
                // Slices are packed at whole-pitch strides.
                row_size: if depth > 1 { row_pitch } else { row_bytes },
                depth,
                region: Some(region),
            };
            cursor = offset + crate::transcoder::footprint_size(&footprint);
            footprints.push(footprint);
        }

        Ok(FootprintSet {
            footprints,
            total_size: cursor,
        })
    }

    fn linear_subresource_layout(
        &self,
        image: vk::Image,
        region: &ImageRegion,
    ) -> VkResult<vk::SubresourceLayout> {
        let subresource = vk::ImageSubresource {
            aspect_mask: region.aspect,
            mip_level: region.mip_level,
            array_layer: region.array_layer,
        };
        Ok(unsafe { self.device.get_image_subresource_layout(image, subresource) })
    }

    // ── Memory ──────────────────────────────────────────────

    fn allocate_memory(&self, size: u64, memory_type_index: u32) -> VkResult<vk::DeviceMemory> {
        let flags = self
            .memory_properties
            .memory_types
            .get(memory_type_index as usize)
            .filter(|_| memory_type_index < self.memory_properties.memory_type_count)
            .map(|t| t.property_flags)
            .ok_or(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)?;
        let info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(memory_type_index);
        let memory = unsafe { self.device.allocate_memory(&info, None)? };
        self.allocations
            .lock()
            .insert(memory, Allocation { size, flags });
        debug!(
            "allocated {} bytes from memory type {}: {:?}",
            size, memory_type_index, memory
        );
        Ok(memory)
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        self.allocations.lock().remove(&memory);
        unsafe { self.device.free_memory(memory, None) };
    }

    fn bind_memory(
        &self,
        resource: LiveResource,
        memory: vk::DeviceMemory,
        offset: u64,
    ) -> VkResult<()> {
        match resource {
            LiveResource::Buffer(buffer) => unsafe {
                self.device.bind_buffer_memory(buffer, memory, offset)?
            },
            LiveResource::Image(image) => unsafe {
                self.device.bind_image_memory(image, memory, offset)?
            },
        }
        if let Some(record) = self.resources.lock().get_mut(&resource) {
            record.binding = Some((memory, offset));
        }
        Ok(())
    }

    fn read_memory(&self, memory: vk::DeviceMemory, offset: u64, dst: &mut [u8]) -> VkResult<()> {
        let len = dst.len();
        self.with_mapping(memory, offset, len, false, |src| unsafe {
            std::ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), len);
        })
    }

    fn write_memory(&self, memory: vk::DeviceMemory, offset: u64, src: &[u8]) -> VkResult<()> {
        self.with_mapping(memory, offset, src.len(), true, |dst| unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len());
        })
    }

    // ── Synchronization ─────────────────────────────────────

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)
        }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: Duration) -> VkResult<bool> {
        let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe { self.device.wait_for_fences(&[fence], true, nanos) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        unsafe { self.device.get_fence_status(fence) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }
    }

    // ── Command recording and submission ────────────────────

    fn create_command_pool(&self, queue_family_index: u32) -> VkResult<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);
        unsafe { self.device.create_command_pool(&info, None) }
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VkResult<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        unsafe { self.device.allocate_command_buffers(&info)? }
            .into_iter()
            .next()
            .ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        unsafe {
            self.device
                .begin_command_buffer(command_buffer, &vk::CommandBufferBeginInfo::default())
        }
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.device.end_command_buffer(command_buffer) }
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
        }
    }

    /// Begin halves of split barriers record nothing; the matching end
    /// half records the full transition.
    fn cmd_barriers(&self, command_buffer: vk::CommandBuffer, barriers: &[ResourceBarrier]) {
        let mut src_stages = vk::PipelineStageFlags::empty();
        let mut dst_stages = vk::PipelineStageFlags::empty();
        let mut buffer_barriers = Vec::new();
        let mut image_barriers = Vec::new();

        let barriers = {
            let resources = self.resources.lock();
            merge_depth_stencil_planes(barriers, |image| {
                matches!(
                    resources.get(&LiveResource::Image(image)).map(|r| r.desc),
                    Some(ResourceDesc::Image(desc)) if format::is_combined_depth_stencil(desc.format)
                )
            })
        };
        for barrier in barriers.iter().filter(|b| b.phase != BarrierPhase::BeginOnly) {
            let (src_access, src_stage, old_layout) = state_usage(barrier.before);
            let (dst_access, dst_stage, new_layout) = state_usage(barrier.after);
            src_stages |= src_stage;
            dst_stages |= dst_stage;

            match (barrier.resource, barrier.region) {
                (LiveResource::Buffer(buffer), _) => buffer_barriers.push(
                    vk::BufferMemoryBarrier::default()
                        .src_access_mask(src_access)
                        .dst_access_mask(dst_access)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .buffer(buffer)
                        .offset(0)
                        .size(vk::WHOLE_SIZE),
                ),
                (LiveResource::Image(image), Some(region)) => image_barriers.push(
                    vk::ImageMemoryBarrier::default()
                        .src_access_mask(src_access)
                        .dst_access_mask(dst_access)
                        .old_layout(old_layout)
                        .new_layout(new_layout)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .image(image)
                        .subresource_range(region.subresource_range()),
                ),
                (LiveResource::Image(image), None) => {
                    warn!("image barrier without a subresource for {:?}, skipped", image);
                }
            }
        }

        if buffer_barriers.is_empty() && image_barriers.is_empty() {
            return;
        }
        if dst_stages.is_empty() {
            dst_stages = vk::PipelineStageFlags::BOTTOM_OF_PIPE;
        }
        unsafe {
            self.device.cmd_pipeline_barrier(
                command_buffer,
                src_stages,
                dst_stages,
                vk::DependencyFlags::empty(),
                &[],
                &buffer_barriers,
                &image_barriers,
            );
        }
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        unsafe { self.device.cmd_copy_buffer(command_buffer, src, dst, regions) };
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                command_buffer,
                src,
                dst,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                regions,
            )
        };
    }

    fn cmd_copy_image_to_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device.cmd_copy_image_to_buffer(
                command_buffer,
                src,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst,
                regions,
            )
        };
    }

    fn queue_submit(&self, queue: vk::Queue, batch: &SubmitBatch, fence: vk::Fence) -> VkResult<()> {
        let (wait_semaphores, wait_stages): (Vec<vk::Semaphore>, Vec<vk::PipelineStageFlags>) =
            batch.wait_semaphores.iter().copied().unzip();
        let mut submit_info = vk::SubmitInfo::default().command_buffers(&batch.command_buffers);
        if !wait_semaphores.is_empty() {
            submit_info = submit_info
                .wait_semaphores(&wait_semaphores)
                .wait_dst_stage_mask(&wait_stages);
        }
        if !batch.signal_semaphores.is_empty() {
            submit_info = submit_info.signal_semaphores(&batch.signal_semaphores);
        }
        unsafe { self.device.queue_submit(queue, &[submit_info], fence) }
    }

    fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()> {
        unsafe { self.device.queue_wait_idle(queue) }
    }
}
