//! The live driver call surface consumed by the transcoder, the offscreen
//! swapchain and the replay session.
//!
//! Every call is synchronous and authoritative for current device state.
//! Failures are returned as raw `vk::Result` codes; callers attach the
//! entry point name with [`crate::error::VkResultExt`].

use std::time::Duration;

use ash::vk;

use crate::state::{BarrierPhase, ResourceState};

/// A live buffer or image on the replay device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LiveResource {
    Buffer(vk::Buffer),
    Image(vk::Image),
}

/// Creation parameters of an image, as the replay device knows them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub image_type: vk::ImageType,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: vk::SampleCountFlags,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
}

impl ImageDesc {
    /// A single-sampled optimal-tiling 2D image with one mip level.
    pub fn simple_2d(format: vk::Format, width: u32, height: u32, usage: vk::ImageUsageFlags) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
        }
    }

    pub fn plane_count(&self) -> u32 {
        crate::format::aspects(self.format).len() as u32
    }

    pub fn subresource_count(&self) -> u32 {
        self.plane_count() * self.mip_levels * self.array_layers
    }

    /// Subresource index → (aspect, mip level, array layer).
    /// Ordering: mip fastest, then array layer, then plane.
    pub fn region(&self, subresource: u32) -> ImageRegion {
        let per_plane = self.mip_levels * self.array_layers;
        let plane = subresource / per_plane;
        let within = subresource % per_plane;
        let mip_level = within % self.mip_levels;
        let array_layer = within / self.mip_levels;
        let aspects = crate::format::aspects(self.format);
        let aspect = aspects
            .get(plane as usize)
            .copied()
            .unwrap_or(vk::ImageAspectFlags::COLOR);
        ImageRegion {
            aspect,
            mip_level,
            array_layer,
            extent: self.mip_extent(mip_level),
        }
    }

    pub fn mip_extent(&self, mip_level: u32) -> vk::Extent3D {
        vk::Extent3D {
            width: (self.extent.width >> mip_level).max(1),
            height: (self.extent.height >> mip_level).max(1),
            depth: (self.extent.depth >> mip_level).max(1),
        }
    }
}

/// One image subresource and its texel extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRegion {
    pub aspect: vk::ImageAspectFlags,
    pub mip_level: u32,
    pub array_layer: u32,
    pub extent: vk::Extent3D,
}

impl ImageRegion {
    pub fn subresource_layers(&self) -> vk::ImageSubresourceLayers {
        vk::ImageSubresourceLayers {
            aspect_mask: self.aspect,
            mip_level: self.mip_level,
            base_array_layer: self.array_layer,
            layer_count: 1,
        }
    }

    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: self.mip_level,
            level_count: 1,
            base_array_layer: self.array_layer,
            layer_count: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceDesc {
    Buffer { size: u64, usage: vk::BufferUsageFlags },
    Image(ImageDesc),
}

impl ResourceDesc {
    pub fn subresource_count(&self) -> u32 {
        match self {
            ResourceDesc::Buffer { .. } => 1,
            ResourceDesc::Image(desc) => desc.subresource_count(),
        }
    }
}

/// Device-computed placement of one subresource in a linear copy buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubresourceFootprint {
    pub offset: u64,
    pub row_pitch: u64,
    pub row_count: u32,
    /// Bytes of payload in the last row of the subresource.
    pub row_size: u64,
    pub depth: u32,
    /// `None` for buffers.
    pub region: Option<ImageRegion>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FootprintSet {
    pub footprints: Vec<SubresourceFootprint>,
    pub total_size: u64,
}

/// Memory a resource is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundMemory {
    pub memory: vk::DeviceMemory,
    pub offset: u64,
    pub flags: vk::MemoryPropertyFlags,
}

impl BoundMemory {
    pub fn is_host_visible(&self) -> bool {
        self.flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }
}

/// A state transition of one subresource (or a whole buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBarrier {
    pub resource: LiveResource,
    /// `None` for buffers.
    pub region: Option<ImageRegion>,
    pub before: ResourceState,
    pub after: ResourceState,
    pub phase: BarrierPhase,
}

/// Rewrite per-plane barriers of combined depth/stencil images into
/// barriers covering both aspects. Without separate depth/stencil layouts
/// a layout transition must name both aspects, so the depth and stencil
/// barriers of one mip/layer collapse into the first of the two.
/// `combined` tells whether an image has a combined depth/stencil format.
pub fn merge_depth_stencil_planes<F>(barriers: &[ResourceBarrier], combined: F) -> Vec<ResourceBarrier>
where
    F: Fn(vk::Image) -> bool,
{
    let planes = vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL;
    let mut merged: Vec<ResourceBarrier> = Vec::with_capacity(barriers.len());

    for barrier in barriers {
        let (LiveResource::Image(image), Some(region)) = (barrier.resource, barrier.region) else {
            merged.push(*barrier);
            continue;
        };
        if !planes.contains(region.aspect) || region.aspect.is_empty() || !combined(image) {
            merged.push(*barrier);
            continue;
        }

        let sibling = merged.iter().any(|m| {
            m.resource == barrier.resource
                && m.phase == barrier.phase
                && m.region.is_some_and(|r| {
                    r.aspect == planes
                        && r.mip_level == region.mip_level
                        && r.array_layer == region.array_layer
                })
        });
        if sibling {
            continue;
        }
        merged.push(ResourceBarrier {
            region: Some(ImageRegion {
                aspect: planes,
                ..region
            }),
            ..*barrier
        });
    }
    merged
}

#[derive(Debug, Clone, Default)]
pub struct SubmitBatch {
    pub wait_semaphores: Vec<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub signal_semaphores: Vec<vk::Semaphore>,
}

pub type VkResult<T> = Result<T, vk::Result>;

pub trait DeviceDriver: Send + Sync {
    /// Raw handle of the live device.
    fn device_handle(&self) -> vk::Device;

    /// Memory types and heaps of the replay physical device.
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties;

    fn get_queue(&self, queue_family_index: u32, queue_index: u32) -> vk::Queue;

    // ── Resources ────────────────────────────────────────────
    fn create_buffer(&self, size: u64, usage: vk::BufferUsageFlags) -> VkResult<vk::Buffer>;
    fn create_image(&self, desc: &ImageDesc) -> VkResult<vk::Image>;
    fn destroy_resource(&self, resource: LiveResource);
    fn resource_desc(&self, resource: LiveResource) -> VkResult<ResourceDesc>;
    fn memory_requirements(&self, resource: LiveResource) -> VkResult<vk::MemoryRequirements>;
    fn bound_memory(&self, resource: LiveResource) -> Option<BoundMemory>;

    /// Placement of every subresource when copied to a linear buffer.
    fn copy_footprints(&self, desc: &ResourceDesc) -> VkResult<FootprintSet>;

    /// Layout of a subresource of a linear-tiled image inside its memory.
    fn linear_subresource_layout(
        &self,
        image: vk::Image,
        region: &ImageRegion,
    ) -> VkResult<vk::SubresourceLayout>;

    // ── Memory ───────────────────────────────────────────────
    fn allocate_memory(&self, size: u64, memory_type_index: u32) -> VkResult<vk::DeviceMemory>;
    fn free_memory(&self, memory: vk::DeviceMemory);
    fn bind_memory(
        &self,
        resource: LiveResource,
        memory: vk::DeviceMemory,
        offset: u64,
    ) -> VkResult<()>;
    /// Map, copy out, unmap.
    fn read_memory(&self, memory: vk::DeviceMemory, offset: u64, dst: &mut [u8]) -> VkResult<()>;
    /// Map, copy in, flush, unmap.
    fn write_memory(&self, memory: vk::DeviceMemory, offset: u64, src: &[u8]) -> VkResult<()>;

    // ── Synchronization ──────────────────────────────────────
    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    /// Returns Ok(false) if `timeout` elapsed before the fence signaled.
    fn wait_for_fence(&self, fence: vk::Fence, timeout: Duration) -> VkResult<bool>;
    /// Current signal state without blocking.
    fn fence_status(&self, fence: vk::Fence) -> VkResult<bool>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;

    // ── Command recording and submission ─────────────────────
    fn create_command_pool(&self, queue_family_index: u32) -> VkResult<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> VkResult<vk::CommandBuffer>;
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;
    fn cmd_barriers(&self, command_buffer: vk::CommandBuffer, barriers: &[ResourceBarrier]);
    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        regions: &[vk::BufferCopy],
    );
    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        regions: &[vk::BufferImageCopy],
    );
    fn cmd_copy_image_to_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Image,
        dst: vk::Buffer,
        regions: &[vk::BufferImageCopy],
    );
    fn queue_submit(&self, queue: vk::Queue, batch: &SubmitBatch, fence: vk::Fence) -> VkResult<()>;
    fn queue_wait_idle(&self, queue: vk::Queue) -> VkResult<()>;
}
