use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::driver::{DeviceDriver, LiveResource};
use crate::error::{ReplayError, VkResultExt};
use crate::reconcile::find_memory_type;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingKind {
    /// Host to device.
    Upload,
    /// Device to host.
    Readback,
}

/// A host-visible buffer used as the linear side of a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: u64,
}

impl StagingBuffer {
    pub fn release(self, driver: &dyn DeviceDriver) {
        driver.destroy_resource(LiveResource::Buffer(self.buffer));
        driver.free_memory(self.memory);
    }
}

/// One pooled buffer per direction. Each grows to the largest request
/// seen and is never shrunk.
#[derive(Debug, Default)]
pub struct StagingPool {
    upload: Option<StagingBuffer>,
    readback: Option<StagingBuffer>,
}

impl StagingPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self, kind: StagingKind) -> Option<StagingBuffer> {
        match kind {
            StagingKind::Upload => self.upload,
            StagingKind::Readback => self.readback,
        }
    }

    /// A staging buffer of at least `size` bytes. An undersized pooled
    /// buffer is released and replaced, never resized in place.
    pub fn acquire(
        &mut self,
        driver: &Arc<dyn DeviceDriver>,
        kind: StagingKind,
        size: u64,
    ) -> Result<StagingBuffer, ReplayError> {
        let slot = match kind {
            StagingKind::Upload => &mut self.upload,
            StagingKind::Readback => &mut self.readback,
        };
        if let Some(existing) = *slot {
            if existing.size >= size {
                return Ok(existing);
            }
            debug!(
                "growing {:?} staging buffer {} -> {} bytes",
                kind, existing.size, size
            );
            existing.release(driver.as_ref());
            *slot = None;
        }
        let fresh = create_staging_buffer(driver.as_ref(), kind, size)?;
        *slot = Some(fresh);
        Ok(fresh)
    }

    pub fn release_all(&mut self, driver: &dyn DeviceDriver) {
        if let Some(buffer) = self.upload.take() {
            buffer.release(driver);
        }
        if let Some(buffer) = self.readback.take() {
            buffer.release(driver);
        }
    }
}

/// Create a coherent host-visible buffer for `kind`. Readback buffers
/// prefer cached memory.
pub fn create_staging_buffer(
    driver: &dyn DeviceDriver,
    kind: StagingKind,
    size: u64,
) -> Result<StagingBuffer, ReplayError> {
    let usage = match kind {
        StagingKind::Upload => vk::BufferUsageFlags::TRANSFER_SRC,
        StagingKind::Readback => vk::BufferUsageFlags::TRANSFER_DST,
    };
    let size = size.max(1);
    let buffer = driver.create_buffer(size, usage).vk_op("vkCreateBuffer")?;

    match allocate_and_bind(driver, buffer, kind) {
        Ok(memory) => Ok(StagingBuffer {
            buffer,
            memory,
            size,
        }),
        Err(e) => {
            driver.destroy_resource(LiveResource::Buffer(buffer));
            Err(e)
        }
    }
}

fn allocate_and_bind(
    driver: &dyn DeviceDriver,
    buffer: vk::Buffer,
    kind: StagingKind,
) -> Result<vk::DeviceMemory, ReplayError> {
    let requirements = driver
        .memory_requirements(LiveResource::Buffer(buffer))
        .vk_op("vkGetBufferMemoryRequirements")?;
    let properties = driver.memory_properties();
    let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

    let cached = match kind {
        StagingKind::Readback => find_memory_type(
            &properties,
            requirements.memory_type_bits,
            host | vk::MemoryPropertyFlags::HOST_CACHED,
        ),
        StagingKind::Upload => None,
    };
    let type_index = cached
        .or_else(|| find_memory_type(&properties, requirements.memory_type_bits, host))
        .ok_or(ReplayError::NoMemoryType("host-visible coherent staging"))?;

    let memory = driver
        .allocate_memory(requirements.size, type_index)
        .vk_op("vkAllocateMemory")?;
    if let Err(result) = driver.bind_memory(LiveResource::Buffer(buffer), memory, 0) {
        driver.free_memory(memory);
        return Err(ReplayError::Driver {
            op: "vkBindBufferMemory",
            result,
        });
    }
    Ok(memory)
}
