//! In-memory `DeviceDriver` for tests.
//!
//! Memory is a byte vector per allocation. Buffers and images live inside
//! their bound memory; images are stored in the same footprint layout the
//! fake reports for copies, so a copy is a straight byte move. Recorded
//! commands run when their command buffer is submitted.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use ash::vk::Handle;
use parking_lot::Mutex;

use retrace_core::config::RetraceConfig;
use retrace_replay::driver::{
    BoundMemory, DeviceDriver, FootprintSet, ImageDesc, ImageRegion, LiveResource,
    ResourceBarrier, ResourceDesc, SubmitBatch, SubresourceFootprint, VkResult,
};
use retrace_replay::format;
use retrace_replay::transcoder::{footprint_size, ResourceTranscoder};

pub const ROW_ALIGNMENT: u64 = 256;
const QUEUE_BASE: u64 = 0xF000;
pub const OFFSET_ALIGNMENT: u64 = 512;

pub const DEVICE_LOCAL: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
pub const HOST: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

#[derive(Debug, Clone)]
enum Command {
    Barriers(Vec<ResourceBarrier>),
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: Vec<vk::BufferCopy>,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        regions: Vec<vk::BufferImageCopy>,
    },
    CopyImageToBuffer {
        src: vk::Image,
        dst: vk::Buffer,
        regions: Vec<vk::BufferImageCopy>,
    },
}

#[derive(Debug, Default)]
struct CommandBuffer {
    pool: u64,
    recording: bool,
    commands: Vec<Command>,
}

struct Resource {
    desc: ResourceDesc,
    binding: Option<(vk::DeviceMemory, u64)>,
}

struct Memory {
    type_index: u32,
    bytes: Vec<u8>,
}

/// Observable effects, for assertions.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub submits: u32,
    pub wait_idles: u32,
    pub fence_waits: u32,
    pub barriers: Vec<ResourceBarrier>,
    pub buffer_copy_sizes: Vec<u64>,
    pub image_copies: u32,
    pub host_reads: Vec<usize>,
    pub host_writes: Vec<usize>,
    pub footprint_queries: u32,
    pub allocations: u32,
    /// Submissions rejected as invalid usage.
    pub invalid_submits: u32,
}

struct State {
    next_handle: u64,
    properties: vk::PhysicalDeviceMemoryProperties,
    memory: HashMap<vk::DeviceMemory, Memory>,
    resources: HashMap<LiveResource, Resource>,
    semaphores: HashMap<vk::Semaphore, bool>,
    fences: HashMap<vk::Fence, bool>,
    /// Pool handle -> queue family it was created for.
    pools: HashMap<u64, u32>,
    command_buffers: HashMap<vk::CommandBuffer, CommandBuffer>,
    /// Fence waits that time out before the next one succeeds.
    pending_polls: u32,
    failures: HashMap<&'static str, vk::Result>,
    stats: Stats,
}

pub struct FakeDriver {
    state: Mutex<State>,
}

pub fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
    let mut properties = vk::PhysicalDeviceMemoryProperties {
        memory_type_count: types.len() as u32,
        memory_heap_count: 1,
        ..Default::default()
    };
    properties.memory_heaps[0] = vk::MemoryHeap {
        size: 1 << 30,
        flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
    };
    for (i, flags) in types.iter().enumerate() {
        properties.memory_types[i] = vk::MemoryType {
            property_flags: *flags,
            heap_index: 0,
        };
    }
    properties
}

fn align_up(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

impl FakeDriver {
    /// Types: 0 device-local, 1 host coherent, 2 host coherent cached,
    /// 3 device-local host coherent.
    pub fn new() -> Arc<Self> {
        Self::with_memory_types(&[
            DEVICE_LOCAL,
            HOST,
            HOST | vk::MemoryPropertyFlags::HOST_CACHED,
            DEVICE_LOCAL | HOST,
        ])
    }

    pub fn with_memory_types(types: &[vk::MemoryPropertyFlags]) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                next_handle: 0x1000,
                properties: memory_properties(types),
                memory: HashMap::new(),
                resources: HashMap::new(),
                semaphores: HashMap::new(),
                fences: HashMap::new(),
                pools: HashMap::new(),
                command_buffers: HashMap::new(),
                pending_polls: 0,
                failures: HashMap::new(),
                stats: Stats::default(),
            }),
        })
    }

    pub fn as_dyn(self: &Arc<Self>) -> Arc<dyn DeviceDriver> {
        self.clone()
    }

    pub fn stats(&self) -> Stats {
        self.state.lock().stats.clone()
    }

    pub fn reset_stats(&self) {
        self.state.lock().stats = Stats::default();
    }

    /// Make the next call of `op` fail with `result`.
    pub fn fail_next(&self, op: &'static str, result: vk::Result) {
        self.state.lock().failures.insert(op, result);
    }

    /// Let the next `polls` fence waits time out.
    pub fn delay_fences(&self, polls: u32) {
        self.state.lock().pending_polls = polls;
    }

    pub fn semaphore_signaled(&self, semaphore: vk::Semaphore) -> bool {
        self.state.lock().semaphores.get(&semaphore).copied().unwrap_or(false)
    }

    pub fn fence_signaled(&self, fence: vk::Fence) -> bool {
        self.state.lock().fences.get(&fence).copied().unwrap_or(false)
    }

    pub fn live_images(&self) -> usize {
        self.count(|r| matches!(r, LiveResource::Image(_)))
    }

    pub fn live_buffers(&self) -> usize {
        self.count(|r| matches!(r, LiveResource::Buffer(_)))
    }

    pub fn live_allocations(&self) -> usize {
        self.state.lock().memory.len()
    }

    pub fn live_pools(&self) -> usize {
        self.state.lock().pools.len()
    }

    fn count(&self, f: impl Fn(&LiveResource) -> bool) -> usize {
        self.state.lock().resources.keys().filter(|r| f(r)).count()
    }

    /// Bytes of a resource as stored in its bound memory.
    pub fn contents(&self, resource: LiveResource) -> Vec<u8> {
        let state = self.state.lock();
        let (offset, len) = resource_span(&state, resource);
        let Some((memory, base)) = state.resources.get(&resource).and_then(|r| r.binding) else {
            return Vec::new();
        };
        let bytes = &state.memory[&memory].bytes;
        bytes[(base + offset) as usize..(base + offset + len) as usize].to_vec()
    }

    /// Overwrite a resource's bytes directly, bypassing any command.
    pub fn fill(&self, resource: LiveResource, data: &[u8]) {
        let mut state = self.state.lock();
        let Some((memory, base)) = state.resources.get(&resource).and_then(|r| r.binding) else {
            return;
        };
        if let Some(m) = state.memory.get_mut(&memory) {
            m.bytes[base as usize..base as usize + data.len()].copy_from_slice(data);
        }
    }

    fn take_failure(&self, op: &'static str) -> VkResult<()> {
        match self.state.lock().failures.remove(op) {
            Some(result) => Err(result),
            None => Ok(()),
        }
    }

    fn handle(state: &mut State) -> u64 {
        state.next_handle += 1;
        state.next_handle
    }
}

/// (offset, length) of a resource inside its binding.
fn resource_span(state: &State, resource: LiveResource) -> (u64, u64) {
    match state.resources.get(&resource).map(|r| r.desc) {
        Some(ResourceDesc::Buffer { size, .. }) => (0, size),
        Some(desc @ ResourceDesc::Image(_)) => (0, fake_footprints(&desc).total_size),
        None => (0, 0),
    }
}

pub fn fake_footprints(desc: &ResourceDesc) -> FootprintSet {
    let image = match desc {
        ResourceDesc::Buffer { size, .. } => {
            return FootprintSet {
                footprints: vec![SubresourceFootprint {
                    offset: 0,
                    row_pitch: *size,
                    row_count: 1,
                    row_size: *size,
                    depth: 1,
                    region: None,
                }],
                total_size: *size,
            }
        }
        ResourceDesc::Image(image) => image,
    };

    let mut footprints = Vec::new();
    let mut cursor = 0;
    for subresource in 0..image.subresource_count() {
        let region = image.region(subresource);
        let block = format::block_info(image.format, region.aspect).unwrap_or(format::BlockInfo {
            bytes: 4,
            width: 1,
            height: 1,
        });
        let row_bytes = region.extent.width.div_ceil(block.width) as u64 * block.bytes as u64;
        let row_pitch = align_up(row_bytes, ROW_ALIGNMENT);
        let depth = region.extent.depth;
        let footprint = SubresourceFootprint {
            offset: align_up(cursor, OFFSET_ALIGNMENT),
            row_pitch,
            row_count: region.extent.height.div_ceil(block.height),
            row_size: if depth > 1 { row_pitch } else { row_bytes },
            depth,
            region: Some(region),
        };
        cursor = footprint.offset + footprint_size(&footprint);
        footprints.push(footprint);
    }
    FootprintSet {
        footprints,
        total_size: cursor,
    }
}

fn subresource_index(desc: &ImageDesc, layers: &vk::ImageSubresourceLayers) -> u32 {
    let plane = format::aspects(desc.format)
        .iter()
        .position(|a| *a == layers.aspect_mask)
        .unwrap_or(0) as u32;
    layers.mip_level + layers.base_array_layer * desc.mip_levels + plane * desc.mip_levels * desc.array_layers
}

impl State {
    fn binding(&self, resource: LiveResource) -> VkResult<(vk::DeviceMemory, u64)> {
        self.resources
            .get(&resource)
            .and_then(|r| r.binding)
            .ok_or(vk::Result::ERROR_MEMORY_MAP_FAILED)
    }

    fn move_bytes(&mut self, from: (vk::DeviceMemory, u64), to: (vk::DeviceMemory, u64), len: u64) {
        let data = self.memory[&from.0].bytes[from.1 as usize..(from.1 + len) as usize].to_vec();
        if let Some(memory) = self.memory.get_mut(&to.0) {
            memory.bytes[to.1 as usize..(to.1 + len) as usize].copy_from_slice(&data);
        }
    }

    fn image_region_span(&self, image: vk::Image, region: &vk::BufferImageCopy) -> VkResult<(u64, u64)> {
        let Some(ResourceDesc::Image(desc)) = self.resources.get(&LiveResource::Image(image)).map(|r| r.desc) else {
            return Err(vk::Result::ERROR_UNKNOWN);
        };
        let set = fake_footprints(&ResourceDesc::Image(desc));
        let index = subresource_index(&desc, &region.image_subresource);
        let footprint = set.footprints[index as usize];
        Ok((footprint.offset, footprint_size(&footprint)))
    }

    fn execute(&mut self, command: Command) -> VkResult<()> {
        match command {
            Command::Barriers(barriers) => self.stats.barriers.extend(barriers),
            Command::CopyBuffer { src, dst, regions } => {
                let from = self.binding(LiveResource::Buffer(src))?;
                let to = self.binding(LiveResource::Buffer(dst))?;
                for r in regions {
                    self.stats.buffer_copy_sizes.push(r.size);
                    self.move_bytes((from.0, from.1 + r.src_offset), (to.0, to.1 + r.dst_offset), r.size);
                }
            }
            Command::CopyBufferToImage { src, dst, regions } => {
                let from = self.binding(LiveResource::Buffer(src))?;
                let to = self.binding(LiveResource::Image(dst))?;
                for r in regions {
                    let (offset, len) = self.image_region_span(dst, &r)?;
                    self.stats.image_copies += 1;
                    self.move_bytes((from.0, from.1 + r.buffer_offset), (to.0, to.1 + offset), len);
                }
            }
            Command::CopyImageToBuffer { src, dst, regions } => {
                let from = self.binding(LiveResource::Image(src))?;
                let to = self.binding(LiveResource::Buffer(dst))?;
                for r in regions {
                    let (offset, len) = self.image_region_span(src, &r)?;
                    self.stats.image_copies += 1;
                    self.move_bytes((from.0, from.1 + offset), (to.0, to.1 + r.buffer_offset), len);
                }
            }
        }
        Ok(())
    }

    fn record(&mut self, command_buffer: vk::CommandBuffer, command: Command) {
        if let Some(cb) = self.command_buffers.get_mut(&command_buffer) {
            assert!(cb.recording, "command recorded outside begin/end");
            cb.commands.push(command);
        }
    }
}

impl DeviceDriver for FakeDriver {
    fn device_handle(&self) -> vk::Device {
        vk::Device::from_raw(0xD0)
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.state.lock().properties
    }

    fn get_queue(&self, queue_family_index: u32, queue_index: u32) -> vk::Queue {
        vk::Queue::from_raw(QUEUE_BASE + (queue_family_index as u64) * 16 + queue_index as u64)
    }

    fn create_buffer(&self, size: u64, usage: vk::BufferUsageFlags) -> VkResult<vk::Buffer> {
        self.take_failure("create_buffer")?;
        let mut state = self.state.lock();
        let buffer = vk::Buffer::from_raw(Self::handle(&mut state));
        state.resources.insert(
            LiveResource::Buffer(buffer),
            Resource {
                desc: ResourceDesc::Buffer { size, usage },
                binding: None,
            },
        );
        Ok(buffer)
    }

    fn create_image(&self, desc: &ImageDesc) -> VkResult<vk::Image> {
        self.take_failure("create_image")?;
        let mut state = self.state.lock();
        let image = vk::Image::from_raw(Self::handle(&mut state));
        state.resources.insert(
            LiveResource::Image(image),
            Resource {
                desc: ResourceDesc::Image(*desc),
                binding: None,
            },
        );
        Ok(image)
    }

    fn destroy_resource(&self, resource: LiveResource) {
        self.state.lock().resources.remove(&resource);
    }

    fn resource_desc(&self, resource: LiveResource) -> VkResult<ResourceDesc> {
        self.state
            .lock()
            .resources
            .get(&resource)
            .map(|r| r.desc)
            .ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn memory_requirements(&self, resource: LiveResource) -> VkResult<vk::MemoryRequirements> {
        let state = self.state.lock();
        let (_, len) = resource_span(&state, resource);
        Ok(vk::MemoryRequirements {
            size: align_up(len.max(1), ROW_ALIGNMENT),
            alignment: ROW_ALIGNMENT,
            memory_type_bits: (1u32 << state.properties.memory_type_count) - 1,
        })
    }

    fn bound_memory(&self, resource: LiveResource) -> Option<BoundMemory> {
        let state = self.state.lock();
        let (memory, offset) = state.resources.get(&resource)?.binding?;
        let type_index = state.memory.get(&memory)?.type_index;
        Some(BoundMemory {
            memory,
            offset,
            flags: state.properties.memory_types[type_index as usize].property_flags,
        })
    }

    fn copy_footprints(&self, desc: &ResourceDesc) -> VkResult<FootprintSet> {
        self.state.lock().stats.footprint_queries += 1;
        Ok(fake_footprints(desc))
    }

    fn linear_subresource_layout(
        &self,
        image: vk::Image,
        region: &ImageRegion,
    ) -> VkResult<vk::SubresourceLayout> {
        let desc = match self.resource_desc(LiveResource::Image(image))? {
            ResourceDesc::Image(desc) => desc,
            ResourceDesc::Buffer { .. } => return Err(vk::Result::ERROR_UNKNOWN),
        };
        let layers = region.subresource_layers();
        let set = fake_footprints(&ResourceDesc::Image(desc));
        let footprint = set.footprints[subresource_index(&desc, &layers) as usize];
        let size = footprint_size(&footprint);
        Ok(vk::SubresourceLayout {
            offset: footprint.offset,
            size,
            row_pitch: footprint.row_pitch,
            array_pitch: 0,
            depth_pitch: size / footprint.depth.max(1) as u64,
        })
    }

    fn allocate_memory(&self, size: u64, memory_type_index: u32) -> VkResult<vk::DeviceMemory> {
        self.take_failure("allocate_memory")?;
        let mut state = self.state.lock();
        if memory_type_index >= state.properties.memory_type_count {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        let memory = vk::DeviceMemory::from_raw(Self::handle(&mut state));
        state.memory.insert(
            memory,
            Memory {
                type_index: memory_type_index,
                bytes: vec![0; size as usize],
            },
        );
        state.stats.allocations += 1;
        Ok(memory)
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        self.state.lock().memory.remove(&memory);
    }

    fn bind_memory(
        &self,
        resource: LiveResource,
        memory: vk::DeviceMemory,
        offset: u64,
    ) -> VkResult<()> {
        let mut state = self.state.lock();
        if !state.memory.contains_key(&memory) {
            return Err(vk::Result::ERROR_UNKNOWN);
        }
        match state.resources.get_mut(&resource) {
            Some(r) => {
                r.binding = Some((memory, offset));
                Ok(())
            }
            None => Err(vk::Result::ERROR_UNKNOWN),
        }
    }

    fn read_memory(&self, memory: vk::DeviceMemory, offset: u64, dst: &mut [u8]) -> VkResult<()> {
        let mut state = self.state.lock();
        let Some(m) = state.memory.get(&memory) else {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        };
        let flags = state.properties.memory_types[m.type_index as usize].property_flags;
        let end = offset as usize + dst.len();
        if !flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) || end > m.bytes.len() {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        dst.copy_from_slice(&m.bytes[offset as usize..end]);
        state.stats.host_reads.push(dst.len());
        Ok(())
    }

    fn write_memory(&self, memory: vk::DeviceMemory, offset: u64, src: &[u8]) -> VkResult<()> {
        let mut state = self.state.lock();
        let flags = match state.memory.get(&memory) {
            Some(m) => state.properties.memory_types[m.type_index as usize].property_flags,
            None => return Err(vk::Result::ERROR_MEMORY_MAP_FAILED),
        };
        let Some(m) = state.memory.get_mut(&memory) else {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        };
        let end = offset as usize + src.len();
        if !flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) || end > m.bytes.len() {
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        m.bytes[offset as usize..end].copy_from_slice(src);
        state.stats.host_writes.push(src.len());
        Ok(())
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut state = self.state.lock();
        let semaphore = vk::Semaphore::from_raw(Self::handle(&mut state));
        state.semaphores.insert(semaphore, false);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.lock().semaphores.remove(&semaphore);
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut state = self.state.lock();
        let fence = vk::Fence::from_raw(Self::handle(&mut state));
        state.fences.insert(fence, signaled);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.state.lock().fences.remove(&fence);
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout: Duration) -> VkResult<bool> {
        let mut state = self.state.lock();
        state.stats.fence_waits += 1;
        if state.pending_polls > 0 {
            state.pending_polls -= 1;
            return Ok(false);
        }
        match state.fences.get(&fence) {
            Some(signaled) => Ok(*signaled),
            None => Err(vk::Result::ERROR_DEVICE_LOST),
        }
    }

    fn fence_status(&self, fence: vk::Fence) -> VkResult<bool> {
        match self.state.lock().fences.get(&fence) {
            Some(signaled) => Ok(*signaled),
            None => Err(vk::Result::ERROR_DEVICE_LOST),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        match self.state.lock().fences.get_mut(&fence) {
            Some(signaled) => {
                *signaled = false;
                Ok(())
            }
            None => Err(vk::Result::ERROR_UNKNOWN),
        }
    }

    fn create_command_pool(&self, queue_family_index: u32) -> VkResult<vk::CommandPool> {
        let mut state = self.state.lock();
        let raw = Self::handle(&mut state);
        state.pools.insert(raw, queue_family_index);
        Ok(vk::CommandPool::from_raw(raw))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state.lock();
        state.pools.remove(&pool.as_raw());
        state.command_buffers.retain(|_, cb| cb.pool != pool.as_raw());
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VkResult<vk::CommandBuffer> {
        let mut state = self.state.lock();
        if !state.pools.contains_key(&pool.as_raw()) {
            return Err(vk::Result::ERROR_UNKNOWN);
        }
        let command_buffer = vk::CommandBuffer::from_raw(Self::handle(&mut state));
        state.command_buffers.insert(
            command_buffer,
            CommandBuffer {
                pool: pool.as_raw(),
                ..Default::default()
            },
        );
        Ok(command_buffer)
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        match self.state.lock().command_buffers.get_mut(&command_buffer) {
            Some(cb) => {
                cb.recording = true;
                cb.commands.clear();
                Ok(())
            }
            None => Err(vk::Result::ERROR_UNKNOWN),
        }
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        match self.state.lock().command_buffers.get_mut(&command_buffer) {
            Some(cb) => {
                cb.recording = false;
                Ok(())
            }
            None => Err(vk::Result::ERROR_UNKNOWN),
        }
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        match self.state.lock().command_buffers.get_mut(&command_buffer) {
            Some(cb) => {
                cb.recording = false;
                cb.commands.clear();
                Ok(())
            }
            None => Err(vk::Result::ERROR_UNKNOWN),
        }
    }

    fn cmd_barriers(&self, command_buffer: vk::CommandBuffer, barriers: &[ResourceBarrier]) {
        self.state
            .lock()
            .record(command_buffer, Command::Barriers(barriers.to_vec()));
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    ) {
        self.state.lock().record(
            command_buffer,
            Command::CopyBuffer {
                src,
                dst,
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        regions: &[vk::BufferImageCopy],
    ) {
        self.state.lock().record(
            command_buffer,
            Command::CopyBufferToImage {
                src,
                dst,
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_copy_image_to_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    ) {
        self.state.lock().record(
            command_buffer,
            Command::CopyImageToBuffer {
                src,
                dst,
                regions: regions.to_vec(),
            },
        );
    }

    fn queue_submit(&self, queue: vk::Queue, batch: &SubmitBatch, fence: vk::Fence) -> VkResult<()> {
        self.take_failure("queue_submit")?;
        let mut state = self.state.lock();

        // Invalid usage on a real device: signaled fence, or a command
        // buffer from a pool of another queue family.
        if fence != vk::Fence::null() && state.fences.get(&fence).copied().unwrap_or(false) {
            state.stats.invalid_submits += 1;
            return Err(vk::Result::ERROR_VALIDATION_FAILED_EXT);
        }
        let family = queue_family_of(queue);
        let foreign = batch.command_buffers.iter().any(|cb| {
            state
                .command_buffers
                .get(cb)
                .and_then(|cb| state.pools.get(&cb.pool))
                .is_some_and(|pool_family| *pool_family != family)
        });
        if foreign {
            state.stats.invalid_submits += 1;
            return Err(vk::Result::ERROR_VALIDATION_FAILED_EXT);
        }

        for (semaphore, _) in &batch.wait_semaphores {
            match state.semaphores.get_mut(semaphore) {
                Some(signaled) if *signaled => *signaled = false,
                // A wait that can never be satisfied would hang a real queue.
                _ => return Err(vk::Result::ERROR_DEVICE_LOST),
            }
        }

        for command_buffer in &batch.command_buffers {
            let commands = match state.command_buffers.get(command_buffer) {
                Some(cb) if !cb.recording => cb.commands.clone(),
                _ => return Err(vk::Result::ERROR_UNKNOWN),
            };
            for command in commands {
                state.execute(command)?;
            }
        }

        for semaphore in &batch.signal_semaphores {
            state.semaphores.insert(*semaphore, true);
        }
        if fence != vk::Fence::null() {
            state.fences.insert(fence, true);
        }
        state.stats.submits += 1;
        Ok(())
    }

    fn queue_wait_idle(&self, _queue: vk::Queue) -> VkResult<()> {
        self.state.lock().stats.wait_idles += 1;
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────

/// Queue family encoded in a fake queue handle.
pub fn queue_family_of(queue: vk::Queue) -> u32 {
    (queue.as_raw().saturating_sub(QUEUE_BASE) / 16) as u32
}

pub fn default_config() -> RetraceConfig {
    RetraceConfig::default()
}

pub fn transcoder(driver: &Arc<FakeDriver>) -> ResourceTranscoder {
    let queue = driver.get_queue(0, 0);
    match ResourceTranscoder::new(driver.as_dyn(), 0, queue, &default_config()) {
        Ok(t) => t,
        Err(e) => panic!("expected a transcoder, got {:?}", e),
    }
}

fn first_type(driver: &FakeDriver, flags: vk::MemoryPropertyFlags) -> u32 {
    let properties = driver.memory_properties();
    (0..properties.memory_type_count)
        .find(|&i| properties.memory_types[i as usize].property_flags == flags)
        .unwrap_or_else(|| panic!("no memory type with exactly {:?}", flags))
}

fn bind_new(driver: &FakeDriver, resource: LiveResource, flags: vk::MemoryPropertyFlags) {
    let requirements = driver.memory_requirements(resource).expect("requirements");
    let memory = driver
        .allocate_memory(requirements.size, first_type(driver, flags))
        .expect("allocate");
    driver.bind_memory(resource, memory, 0).expect("bind");
}

/// A buffer bound to fresh memory of exactly `flags`.
pub fn bound_buffer(driver: &FakeDriver, size: u64, flags: vk::MemoryPropertyFlags) -> vk::Buffer {
    let usage = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
    let buffer = driver.create_buffer(size, usage).expect("create buffer");
    bind_new(driver, LiveResource::Buffer(buffer), flags);
    buffer
}

/// An image bound to fresh memory of exactly `flags`.
pub fn bound_image(driver: &FakeDriver, desc: &ImageDesc, flags: vk::MemoryPropertyFlags) -> vk::Image {
    let image = driver.create_image(desc).expect("create image");
    bind_new(driver, LiveResource::Image(image), flags);
    image
}

/// Deterministic test pattern.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}
