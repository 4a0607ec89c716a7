//! Moves bytes in and out of live buffers and images.
//!
//! Host-visible resources are mapped and copied directly when the caller
//! allows it. Everything else goes through a staging buffer: barriers to
//! the copy state, one copy, barriers to the requested final states, one
//! submission, and a blocking fence wait before the call returns.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use retrace_core::config::RetraceConfig;
use tracing::{debug, warn};

use crate::driver::{
    BoundMemory, DeviceDriver, ImageDesc, LiveResource, ResourceBarrier, ResourceDesc,
    SubmitBatch, SubresourceFootprint,
};
use crate::error::{ReplayError, VkResultExt};
use crate::format;
use crate::staging::{create_staging_buffer, StagingBuffer, StagingKind, StagingPool};
use crate::state::{
    BarrierTracker, PlannedBarrier, ResourceState, StateInfo, SubresourceState,
};

/// Size of a subresource in a linear copy buffer. The last row carries no
/// trailing pad.
pub fn footprint_size(footprint: &SubresourceFootprint) -> u64 {
    if footprint.row_count == 0 {
        return 0;
    }
    let rows = footprint.row_count as u64;
    ((rows - 1) * footprint.row_pitch + footprint.row_size) * footprint.depth as u64
}

/// Per-subresource placement of a resource in a linear copy buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyLayout {
    pub subresource_count: u32,
    pub offsets: Vec<u64>,
    pub sizes: Vec<u64>,
    pub footprints: Vec<SubresourceFootprint>,
    pub total_size: u64,
}

/// What to read out of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadRegion {
    /// A byte range of subresource 0. `size == vk::WHOLE_SIZE` reads to
    /// the end of the subresource.
    Bytes { offset: u64, size: u64 },
    /// Whole subresources, concatenated in the order given.
    Subresources(Vec<u32>),
}

/// Tracked states before a call and requested states after it. A slice of
/// length 1 applies to every subresource.
#[derive(Debug, Clone, Copy)]
pub struct StateTransition<'a> {
    pub before: &'a [SubresourceState],
    pub after: &'a [StateInfo],
}

impl<'a> StateTransition<'a> {
    pub fn new(before: &'a [SubresourceState], after: &'a [StateInfo]) -> Self {
        Self { before, after }
    }
}

/// Source bytes of a write: subresource i is `sizes[i]` bytes at
/// `data[offsets[i]..]`, in footprint layout.
#[derive(Debug, Clone, Copy)]
pub struct SubresourceData<'a> {
    pub data: &'a [u8],
    pub offsets: &'a [u64],
    pub sizes: &'a [u64],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult {
    pub data: Vec<u8>,
    /// Tracked state of every subresource after the call.
    pub states: Vec<SubresourceState>,
}

/// One contiguous span of one subresource taking part in a copy.
#[derive(Debug, Clone, Copy)]
struct Piece {
    subresource: u32,
    /// Offset inside the subresource's footprint (or the buffer).
    offset: u64,
    size: u64,
    /// Offset of the bytes in the caller's data (writes) or the result (reads).
    data_offset: u64,
}

struct Prepared {
    resource: LiveResource,
    desc: ResourceDesc,
    before: Vec<SubresourceState>,
    after: Vec<StateInfo>,
}

impl Prepared {
    fn barriers(&self, planned: &[PlannedBarrier]) -> Vec<ResourceBarrier> {
        planned
            .iter()
            .map(|b| ResourceBarrier {
                resource: self.resource,
                region: match &self.desc {
                    ResourceDesc::Image(desc) => Some(desc.region(b.subresource)),
                    ResourceDesc::Buffer { .. } => None,
                },
                before: b.before,
                after: b.after,
                phase: b.phase,
            })
            .collect()
    }
}

pub struct ResourceTranscoder {
    driver: Arc<dyn DeviceDriver>,
    queue: vk::Queue,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    staging: StagingPool,
    /// Dedicated staging buffers referenced by caller-owned command buffers.
    batched: Vec<StagingBuffer>,
    allow_mapped: bool,
    wait_slice: Duration,
}

impl ResourceTranscoder {
    pub fn new(
        driver: Arc<dyn DeviceDriver>,
        queue_family: u32,
        queue: vk::Queue,
        config: &RetraceConfig,
    ) -> Result<Self, ReplayError> {
        let command_pool = driver
            .create_command_pool(queue_family)
            .vk_op("vkCreateCommandPool")?;
        let command_buffer = match driver.allocate_command_buffer(command_pool) {
            Ok(cb) => cb,
            Err(result) => {
                driver.destroy_command_pool(command_pool);
                return Err(ReplayError::Driver {
                    op: "vkAllocateCommandBuffers",
                    result,
                });
            }
        };
        let fence = match driver.create_fence(false) {
            Ok(f) => f,
            Err(result) => {
                driver.destroy_command_pool(command_pool);
                return Err(ReplayError::Driver {
                    op: "vkCreateFence",
                    result,
                });
            }
        };

        let mut transcoder = Self {
            driver,
            queue,
            command_pool,
            command_buffer,
            fence,
            staging: StagingPool::new(),
            batched: Vec::new(),
            allow_mapped: config.replay.allow_mapped_fast_path,
            wait_slice: Duration::from_millis(config.replay.fence_wait_timeout_ms.max(1)),
        };

        let initial = [
            (StagingKind::Upload, config.staging.initial_upload_size),
            (StagingKind::Readback, config.staging.initial_readback_size),
        ];
        for (kind, size) in initial {
            if size > 0 {
                transcoder.staging.acquire(&transcoder.driver, kind, size)?;
            }
        }

        debug!(
            "transcoder ready on queue family {} (mapped fast path: {})",
            queue_family, transcoder.allow_mapped
        );
        Ok(transcoder)
    }

    pub fn driver(&self) -> &Arc<dyn DeviceDriver> {
        &self.driver
    }

    pub fn pooled_staging(&self, kind: StagingKind) -> Option<StagingBuffer> {
        self.staging.current(kind)
    }

    pub fn batched_staging_count(&self) -> usize {
        self.batched.len()
    }

    /// Release staging buffers kept alive for batched writes. Call once the
    /// caller's command buffer has finished executing.
    pub fn release_batched_staging(&mut self) {
        for buffer in self.batched.drain(..) {
            buffer.release(self.driver.as_ref());
        }
    }

    // ── Layout ──────────────────────────────────────────────

    /// Copy layout of `resource`, queried fresh from the device.
    pub fn copy_layout(&self, resource: LiveResource) -> Result<CopyLayout, ReplayError> {
        let desc = self
            .driver
            .resource_desc(resource)
            .vk_op("resource description")?;
        self.layout_for(&desc)
    }

    fn layout_for(&self, desc: &ResourceDesc) -> Result<CopyLayout, ReplayError> {
        let set = self
            .driver
            .copy_footprints(desc)
            .vk_op("copy footprints")?;
        let offsets: Vec<u64> = set.footprints.iter().map(|f| f.offset).collect();
        let sizes: Vec<u64> = set.footprints.iter().map(footprint_size).collect();

        if let ResourceDesc::Buffer { size, .. } = desc {
            if sizes.len() != 1 || offsets[0] != 0 || sizes[0] != *size {
                return Err(ReplayError::Unsupported(format!(
                    "driver reported a {}-subresource layout for a {} byte buffer",
                    sizes.len(),
                    size
                )));
            }
        }

        Ok(CopyLayout {
            subresource_count: set.footprints.len() as u32,
            offsets,
            sizes,
            footprints: set.footprints,
            total_size: set.total_size,
        })
    }

    // ── Read ────────────────────────────────────────────────

    pub fn read_range(
        &mut self,
        resource: LiveResource,
        region: ReadRegion,
        states: StateTransition<'_>,
        allow_map: bool,
    ) -> Result<ReadResult, ReplayError> {
        let prepared = self.prepare(resource, states)?;
        let layout = self.layout_for(&prepared.desc)?;
        let pieces = resolve_read(&region, &layout)?;

        if let Some(bound) = self.mappable(&prepared, allow_map) {
            let data = self.read_mapped(&prepared, &layout, &pieces, bound)?;
            warn_fast_path_states(&prepared);
            return Ok(ReadResult {
                data,
                states: prepared.before,
            });
        }

        self.read_staged(prepared, &layout, &pieces)
    }

    fn read_staged(
        &mut self,
        prepared: Prepared,
        layout: &CopyLayout,
        pieces: &[Piece],
    ) -> Result<ReadResult, ReplayError> {
        let (staging_size, staging_offsets) = staging_plan(&prepared.desc, layout, pieces);
        let staging = self
            .staging
            .acquire(&self.driver, StagingKind::Readback, staging_size)?;

        let mut tracker = BarrierTracker::new(prepared.before.clone());
        let to_copy = tracker.transition_all_to(StateInfo::new(ResourceState::COPY_SOURCE));
        let to_after = tracker.transition_all(&prepared.after);
        let pre = prepared.barriers(&to_copy);
        let post = prepared.barriers(&to_after);

        let driver = Arc::clone(&self.driver);
        self.record_and_wait(|cb| {
            if !pre.is_empty() {
                driver.cmd_barriers(cb, &pre);
            }
            match (prepared.resource, &prepared.desc) {
                (LiveResource::Buffer(buffer), _) => {
                    let regions: Vec<vk::BufferCopy> = pieces
                        .iter()
                        .zip(&staging_offsets)
                        .map(|(p, staged)| vk::BufferCopy {
                            src_offset: p.offset,
                            dst_offset: *staged,
                            size: p.size,
                        })
                        .collect();
                    driver.cmd_copy_buffer(cb, buffer, staging.buffer, &regions);
                }
                (LiveResource::Image(image), ResourceDesc::Image(desc)) => {
                    let regions = image_copy_regions(desc, layout, pieces)?;
                    driver.cmd_copy_image_to_buffer(cb, image, staging.buffer, &regions);
                }
                (LiveResource::Image(_), ResourceDesc::Buffer { .. }) => {
                    return Err(ReplayError::Unsupported(
                        "image handle described as a buffer".to_string(),
                    ));
                }
            }
            if !post.is_empty() {
                driver.cmd_barriers(cb, &post);
            }
            Ok(())
        })?;

        let mut staged = vec![0u8; staging_size as usize];
        self.driver
            .read_memory(staging.memory, 0, &mut staged)
            .vk_op("vkMapMemory")?;

        let total: u64 = pieces.iter().map(|p| p.size).sum();
        let mut data = Vec::with_capacity(total as usize);
        for (piece, start) in pieces.iter().zip(&staging_offsets) {
            let start = *start as usize;
            data.extend_from_slice(&staged[start..start + piece.size as usize]);
        }

        Ok(ReadResult {
            data,
            states: tracker.into_states(),
        })
    }

    fn read_mapped(
        &self,
        prepared: &Prepared,
        layout: &CopyLayout,
        pieces: &[Piece],
        bound: BoundMemory,
    ) -> Result<Vec<u8>, ReplayError> {
        let total: u64 = pieces.iter().map(|p| p.size).sum();
        let mut data = vec![0u8; total as usize];

        for piece in pieces {
            let out = &mut data[piece.data_offset as usize..(piece.data_offset + piece.size) as usize];
            match (prepared.resource, &prepared.desc) {
                (LiveResource::Image(image), ResourceDesc::Image(desc)) => {
                    let packed = self.read_linear_subresource(image, desc, layout, piece.subresource, bound)?;
                    let start = piece.offset as usize;
                    out.copy_from_slice(&packed[start..start + piece.size as usize]);
                }
                _ => {
                    self.driver
                        .read_memory(bound.memory, bound.offset + piece.offset, out)
                        .vk_op("vkMapMemory")?;
                }
            }
        }
        debug!("read {} bytes through a direct mapping", total);
        Ok(data)
    }

    /// Read one subresource of a linear image and repack it into footprint
    /// layout.
    fn read_linear_subresource(
        &self,
        image: vk::Image,
        desc: &ImageDesc,
        layout: &CopyLayout,
        subresource: u32,
        bound: BoundMemory,
    ) -> Result<Vec<u8>, ReplayError> {
        let footprint = layout.footprints[subresource as usize];
        let region = desc.region(subresource);
        let linear = self
            .driver
            .linear_subresource_layout(image, &region)
            .vk_op("vkGetImageSubresourceLayout")?;

        let mut raw = vec![0u8; linear.size as usize];
        self.driver
            .read_memory(bound.memory, bound.offset + linear.offset, &mut raw)
            .vk_op("vkMapMemory")?;

        let mut packed = vec![0u8; layout.sizes[subresource as usize] as usize];
        for_each_row(&footprint, &linear, |packed_at, linear_at, len| {
            if let (Some(dst), Some(src)) = (
                packed.get_mut(packed_at..packed_at + len),
                raw.get(linear_at..linear_at + len),
            ) {
                dst.copy_from_slice(src);
            }
        });
        Ok(packed)
    }

    // ── Write ───────────────────────────────────────────────

    /// Write every subresource of `resource` from `src`. Each copy is
    /// bounded by both the caller's size and the device footprint size.
    /// With `batch`, copy commands are appended to the caller's open
    /// command buffer and nothing is submitted.
    pub fn write_range(
        &mut self,
        resource: LiveResource,
        src: SubresourceData<'_>,
        states: StateTransition<'_>,
        allow_map: bool,
        batch: Option<vk::CommandBuffer>,
    ) -> Result<Vec<SubresourceState>, ReplayError> {
        let prepared = self.prepare(resource, states)?;
        let layout = self.layout_for(&prepared.desc)?;
        let pieces = resolve_write(&src, &layout)?;
        self.write_pieces(prepared, &layout, src.data, &pieces, allow_map, batch)
    }

    /// Write `data` into a buffer at `dst_offset`.
    pub fn write_buffer_at(
        &mut self,
        buffer: vk::Buffer,
        dst_offset: u64,
        data: &[u8],
        states: StateTransition<'_>,
        allow_map: bool,
        batch: Option<vk::CommandBuffer>,
    ) -> Result<Vec<SubresourceState>, ReplayError> {
        let prepared = self.prepare(LiveResource::Buffer(buffer), states)?;
        let layout = self.layout_for(&prepared.desc)?;
        let size = data.len() as u64;
        let available = layout.sizes[0];
        match dst_offset.checked_add(size) {
            Some(end) if size > 0 && end <= available => {}
            _ => {
                return Err(ReplayError::OutOfRange {
                    offset: dst_offset,
                    size,
                    available,
                })
            }
        }
        let pieces = [Piece {
            subresource: 0,
            offset: dst_offset,
            size,
            data_offset: 0,
        }];
        self.write_pieces(prepared, &layout, data, &pieces, allow_map, batch)
    }

    fn write_pieces(
        &mut self,
        prepared: Prepared,
        layout: &CopyLayout,
        data: &[u8],
        pieces: &[Piece],
        allow_map: bool,
        batch: Option<vk::CommandBuffer>,
    ) -> Result<Vec<SubresourceState>, ReplayError> {
        // Host writes cannot be ordered against a caller's pending commands.
        if batch.is_none() {
            if let Some(bound) = self.mappable(&prepared, allow_map) {
                self.write_mapped(&prepared, layout, data, pieces, bound)?;
                warn_fast_path_states(&prepared);
                return Ok(prepared.before);
            }
        }

        let (staging_size, staging_offsets) = staging_plan(&prepared.desc, layout, pieces);
        let staging = match batch {
            Some(_) => {
                let buffer = create_staging_buffer(self.driver.as_ref(), StagingKind::Upload, staging_size)?;
                self.batched.push(buffer);
                buffer
            }
            None => self
                .staging
                .acquire(&self.driver, StagingKind::Upload, staging_size)?,
        };

        let mut staged = vec![0u8; staging_size as usize];
        for (piece, start) in pieces.iter().zip(&staging_offsets) {
            let src = &data[piece.data_offset as usize..(piece.data_offset + piece.size) as usize];
            staged[*start as usize..*start as usize + src.len()].copy_from_slice(src);
        }
        self.driver
            .write_memory(staging.memory, 0, &staged)
            .vk_op("vkMapMemory")?;

        let mut tracker = BarrierTracker::new(prepared.before.clone());
        let to_copy = tracker.transition_all_to(StateInfo::new(ResourceState::COPY_DEST));
        let to_after = tracker.transition_all(&prepared.after);
        let pre = prepared.barriers(&to_copy);
        let post = prepared.barriers(&to_after);

        let driver = Arc::clone(&self.driver);
        let record = |cb: vk::CommandBuffer| -> Result<(), ReplayError> {
            if !pre.is_empty() {
                driver.cmd_barriers(cb, &pre);
            }
            match (prepared.resource, &prepared.desc) {
                (LiveResource::Buffer(buffer), _) => {
                    let regions: Vec<vk::BufferCopy> = pieces
                        .iter()
                        .zip(&staging_offsets)
                        .filter(|(p, _)| p.size > 0)
                        .map(|(p, staged)| vk::BufferCopy {
                            src_offset: *staged,
                            dst_offset: p.offset,
                            size: p.size,
                        })
                        .collect();
                    if !regions.is_empty() {
                        driver.cmd_copy_buffer(cb, staging.buffer, buffer, &regions);
                    }
                }
                (LiveResource::Image(image), ResourceDesc::Image(desc)) => {
                    let regions = image_copy_regions(desc, layout, pieces)?;
                    if !regions.is_empty() {
                        driver.cmd_copy_buffer_to_image(cb, staging.buffer, image, &regions);
                    }
                }
                (LiveResource::Image(_), ResourceDesc::Buffer { .. }) => {
                    return Err(ReplayError::Unsupported(
                        "image handle described as a buffer".to_string(),
                    ));
                }
            }
            if !post.is_empty() {
                driver.cmd_barriers(cb, &post);
            }
            Ok(())
        };

        match batch {
            Some(cb) => record(cb)?,
            None => self.record_and_wait(record)?,
        }
        Ok(tracker.into_states())
    }

    fn write_mapped(
        &self,
        prepared: &Prepared,
        layout: &CopyLayout,
        data: &[u8],
        pieces: &[Piece],
        bound: BoundMemory,
    ) -> Result<(), ReplayError> {
        for piece in pieces.iter().filter(|p| p.size > 0) {
            let src = &data[piece.data_offset as usize..(piece.data_offset + piece.size) as usize];
            match (prepared.resource, &prepared.desc) {
                (LiveResource::Image(image), ResourceDesc::Image(desc)) => {
                    self.write_linear_subresource(image, desc, layout, piece, src, bound)?;
                }
                _ => {
                    self.driver
                        .write_memory(bound.memory, bound.offset + piece.offset, src)
                        .vk_op("vkMapMemory")?;
                }
            }
        }
        debug!("wrote {} pieces through a direct mapping", pieces.len());
        Ok(())
    }

    fn write_linear_subresource(
        &self,
        image: vk::Image,
        desc: &ImageDesc,
        layout: &CopyLayout,
        piece: &Piece,
        src: &[u8],
        bound: BoundMemory,
    ) -> Result<(), ReplayError> {
        let footprint = layout.footprints[piece.subresource as usize];
        let region = desc.region(piece.subresource);
        let linear = self
            .driver
            .linear_subresource_layout(image, &region)
            .vk_op("vkGetImageSubresourceLayout")?;

        // Rows not covered by `src` keep their current contents.
        let mut raw = vec![0u8; linear.size as usize];
        self.driver
            .read_memory(bound.memory, bound.offset + linear.offset, &mut raw)
            .vk_op("vkMapMemory")?;

        let limit = piece.offset as usize + src.len();
        for_each_row(&footprint, &linear, |packed_at, linear_at, len| {
            let end = (packed_at + len).min(limit);
            if end <= packed_at || packed_at < piece.offset as usize {
                return;
            }
            let len = end - packed_at;
            let from = packed_at - piece.offset as usize;
            if let Some(dst) = raw.get_mut(linear_at..linear_at + len) {
                dst.copy_from_slice(&src[from..from + len]);
            }
        });

        self.driver
            .write_memory(bound.memory, bound.offset + linear.offset, &raw)
            .vk_op("vkMapMemory")
    }

    // ── Transitions ─────────────────────────────────────────

    /// Record and submit only barriers. Nothing is submitted when every
    /// subresource is already in its target state.
    pub fn transition_only(
        &mut self,
        resource: LiveResource,
        states: StateTransition<'_>,
    ) -> Result<Vec<SubresourceState>, ReplayError> {
        let prepared = self.prepare(resource, states)?;
        let mut tracker = BarrierTracker::new(prepared.before.clone());
        let planned = tracker.transition_all(&prepared.after);
        if planned.is_empty() {
            debug!("{:?} already in requested states", resource);
            return Ok(tracker.into_states());
        }

        let barriers = prepared.barriers(&planned);
        let driver = Arc::clone(&self.driver);
        self.record_and_wait(|cb| {
            driver.cmd_barriers(cb, &barriers);
            Ok(())
        })?;
        Ok(tracker.into_states())
    }

    // ── Internals ───────────────────────────────────────────

    fn prepare(
        &self,
        resource: LiveResource,
        states: StateTransition<'_>,
    ) -> Result<Prepared, ReplayError> {
        let desc = self
            .driver
            .resource_desc(resource)
            .vk_op("resource description")?;

        if let ResourceDesc::Image(image) = &desc {
            if image.samples != vk::SampleCountFlags::TYPE_1 {
                return Err(ReplayError::Unsupported(format!(
                    "multisampled image ({:?})",
                    image.samples
                )));
            }
        }

        let count = desc.subresource_count() as usize;
        let before = expand_states(states.before, count)?;
        let after = expand_states(states.after, count)?;

        let accel = ResourceState::RAYTRACING_ACCELERATION_STRUCTURE;
        if BarrierTracker::new(before.clone()).any_contains(accel)
            || after.iter().any(|s| s.state.intersects(accel))
        {
            return Err(ReplayError::Unsupported(
                "acceleration structure state transition".to_string(),
            ));
        }

        Ok(Prepared {
            resource,
            desc,
            before,
            after,
        })
    }

    fn mappable(&self, prepared: &Prepared, allow_map: bool) -> Option<BoundMemory> {
        if !(allow_map && self.allow_mapped) {
            return None;
        }
        if let ResourceDesc::Image(desc) = &prepared.desc {
            if desc.tiling != vk::ImageTiling::LINEAR {
                return None;
            }
        }
        self.driver
            .bound_memory(prepared.resource)
            .filter(BoundMemory::is_host_visible)
    }

    /// Record into the internal command buffer, submit, and block until the
    /// fence signals.
    fn record_and_wait<F>(&self, record: F) -> Result<(), ReplayError>
    where
        F: FnOnce(vk::CommandBuffer) -> Result<(), ReplayError>,
    {
        let cb = self.command_buffer;
        self.driver
            .begin_command_buffer(cb)
            .vk_op("vkBeginCommandBuffer")?;

        let result = record(cb).and_then(|()| self.submit_and_wait(cb));
        if result.is_err() {
            let _ = self.driver.reset_command_buffer(cb);
        }
        result
    }

    fn submit_and_wait(&self, cb: vk::CommandBuffer) -> Result<(), ReplayError> {
        self.driver
            .end_command_buffer(cb)
            .vk_op("vkEndCommandBuffer")?;
        let batch = SubmitBatch {
            command_buffers: vec![cb],
            ..Default::default()
        };
        self.driver
            .queue_submit(self.queue, &batch, self.fence)
            .vk_op("vkQueueSubmit")?;

        let mut waited = Duration::ZERO;
        while !self
            .driver
            .wait_for_fence(self.fence, self.wait_slice)
            .vk_op("vkWaitForFences")?
        {
            waited += self.wait_slice;
            warn!("transfer still pending after {:?}, waiting again", waited);
        }

        self.driver.reset_fence(self.fence).vk_op("vkResetFences")?;
        self.driver
            .reset_command_buffer(cb)
            .vk_op("vkResetCommandBuffer")
    }
}

impl Drop for ResourceTranscoder {
    fn drop(&mut self) {
        self.release_batched_staging();
        self.staging.release_all(self.driver.as_ref());
        self.driver.destroy_fence(self.fence);
        self.driver.destroy_command_pool(self.command_pool);
    }
}

fn expand_states<T: Copy>(states: &[T], count: usize) -> Result<Vec<T>, ReplayError> {
    match states.len() {
        1 => Ok(vec![states[0]; count]),
        n if n == count => Ok(states.to_vec()),
        got => Err(ReplayError::StateCount {
            expected: count,
            got,
        }),
    }
}

fn warn_fast_path_states(prepared: &Prepared) {
    let mismatched = prepared
        .before
        .iter()
        .zip(&prepared.after)
        .filter(|(before, after)| !before.satisfies(after))
        .count();
    if mismatched > 0 {
        warn!(
            "{:?}: {} subresources mapped with differing before/after states; no barrier recorded",
            prepared.resource, mismatched
        );
    }
}

fn resolve_read(region: &ReadRegion, layout: &CopyLayout) -> Result<Vec<Piece>, ReplayError> {
    match region {
        ReadRegion::Bytes { offset, size } => {
            let available = layout.sizes.first().copied().unwrap_or(0);
            let out_of_range = ReplayError::OutOfRange {
                offset: *offset,
                size: *size,
                available,
            };
            if *offset >= available {
                return Err(out_of_range);
            }
            let size = if *size == vk::WHOLE_SIZE {
                available - offset
            } else {
                *size
            };
            match offset.checked_add(size) {
                Some(end) if size > 0 && end <= available => Ok(vec![Piece {
                    subresource: 0,
                    offset: *offset,
                    size,
                    data_offset: 0,
                }]),
                _ => Err(out_of_range),
            }
        }
        ReadRegion::Subresources(list) => {
            if list.is_empty() {
                return Err(ReplayError::OutOfRange {
                    offset: 0,
                    size: 0,
                    available: layout.subresource_count as u64,
                });
            }
            let mut pieces = Vec::with_capacity(list.len());
            let mut data_offset = 0;
            for &subresource in list {
                let Some(&size) = layout.sizes.get(subresource as usize) else {
                    return Err(ReplayError::OutOfRange {
                        offset: subresource as u64,
                        size: 1,
                        available: layout.subresource_count as u64,
                    });
                };
                pieces.push(Piece {
                    subresource,
                    offset: 0,
                    size,
                    data_offset,
                });
                data_offset += size;
            }
            Ok(pieces)
        }
    }
}

fn resolve_write(src: &SubresourceData<'_>, layout: &CopyLayout) -> Result<Vec<Piece>, ReplayError> {
    let count = layout.subresource_count as usize;
    for got in [src.offsets.len(), src.sizes.len()] {
        if got != count {
            return Err(ReplayError::RegionCount {
                expected: count,
                got,
            });
        }
    }

    let mut pieces = Vec::with_capacity(count);
    for i in 0..count {
        let declared = src.sizes[i];
        let device = layout.sizes[i];
        let size = declared.min(device);
        if declared != device {
            warn!(
                "subresource {}: caller size {} differs from device footprint {}; copying {} bytes",
                i, declared, device, size
            );
        }
        let data_offset = src.offsets[i];
        match data_offset.checked_add(size) {
            Some(end) if end <= src.data.len() as u64 => {}
            _ => {
                return Err(ReplayError::OutOfRange {
                    offset: data_offset,
                    size,
                    available: src.data.len() as u64,
                })
            }
        }
        pieces.push(Piece {
            subresource: i as u32,
            offset: 0,
            size,
            data_offset,
        });
    }
    Ok(pieces)
}

/// Staging size and the staging offset of each piece. Buffer pieces are
/// packed back to back; image pieces sit at their footprint offsets.
fn staging_plan(desc: &ResourceDesc, layout: &CopyLayout, pieces: &[Piece]) -> (u64, Vec<u64>) {
    match desc {
        ResourceDesc::Buffer { .. } => {
            let mut offsets = Vec::with_capacity(pieces.len());
            let mut cursor = 0;
            for piece in pieces {
                offsets.push(cursor);
                cursor += piece.size;
            }
            (cursor, offsets)
        }
        ResourceDesc::Image(_) => {
            let offsets = pieces
                .iter()
                .map(|p| layout.offsets[p.subresource as usize] + p.offset)
                .collect();
            let size = pieces
                .iter()
                .map(|p| {
                    let i = p.subresource as usize;
                    layout.offsets[i] + layout.sizes[i]
                })
                .max()
                .unwrap_or(0);
            (size, offsets)
        }
    }
}

/// One copy region per distinct subresource, covering the whole
/// subresource at its footprint offset.
fn image_copy_regions(
    desc: &ImageDesc,
    layout: &CopyLayout,
    pieces: &[Piece],
) -> Result<Vec<vk::BufferImageCopy>, ReplayError> {
    let mut seen = Vec::new();
    let mut regions = Vec::new();
    for piece in pieces.iter().filter(|p| p.size > 0) {
        if seen.contains(&piece.subresource) {
            continue;
        }
        seen.push(piece.subresource);

        let footprint = &layout.footprints[piece.subresource as usize];
        let region = footprint.region.unwrap_or_else(|| desc.region(piece.subresource));
        let block = format::block_info(desc.format, region.aspect).ok_or_else(|| {
            ReplayError::Unsupported(format!("copies of {:?} {:?}", desc.format, region.aspect))
        })?;
        regions.push(vk::BufferImageCopy {
            buffer_offset: footprint.offset,
            buffer_row_length: (footprint.row_pitch / block.bytes as u64) as u32 * block.width,
            buffer_image_height: footprint.row_count * block.height,
            image_subresource: region.subresource_layers(),
            image_offset: vk::Offset3D::default(),
            image_extent: region.extent,
        });
    }
    Ok(regions)
}

/// Walk the rows of a subresource, yielding (footprint offset, linear
/// offset, row length) for each.
fn for_each_row<F>(footprint: &SubresourceFootprint, linear: &vk::SubresourceLayout, mut row: F)
where
    F: FnMut(usize, usize, usize),
{
    let len = footprint.row_size.min(linear.row_pitch) as usize;
    let slice_pitch = footprint_size(footprint) / footprint.depth.max(1) as u64;
    for z in 0..footprint.depth as u64 {
        for r in 0..footprint.row_count as u64 {
            let packed_at = z * slice_pitch + r * footprint.row_pitch;
            let linear_at = z * linear.depth_pitch + r * linear.row_pitch;
            row(packed_at as usize, linear_at as usize, len);
        }
    }
}
