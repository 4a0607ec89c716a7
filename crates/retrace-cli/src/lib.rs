//! Shared pieces of the `retrace` binary: device bootstrap, flag parsing
//! and the on-device self test.

pub mod selftest;

use std::sync::Arc;

use ash::vk;
use retrace_replay::ash_driver::HeadlessQueue;
use retrace_replay::AshDriver;
use tracing::info;

/// Load the Vulkan loader and open a headless device.
pub fn open_device(device_index: usize) -> anyhow::Result<(Arc<AshDriver>, HeadlessQueue)> {
    let entry = unsafe { ash::Entry::load() }
        .map_err(|e| anyhow::anyhow!("cannot load the Vulkan loader: {}", e))?;
    let (driver, queue) = AshDriver::create_headless(&entry, device_index)
        .map_err(|e| anyhow::anyhow!("cannot open device {}: {}", device_index, e))?;
    info!(
        "opened device {} (queue family {} index {})",
        device_index, queue.family, queue.index
    );
    Ok((Arc::new(driver), queue))
}

/// Parse `DEVICE_LOCAL,HOST_VISIBLE,...` (or `device-local,...`) into memory property flags.
pub fn parse_memory_flags(text: &str) -> anyhow::Result<vk::MemoryPropertyFlags> {
    let mut flags = vk::MemoryPropertyFlags::empty();
    for name in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        flags |= match name.to_ascii_uppercase().replace('-', "_").as_str() {
            "DEVICE_LOCAL" => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            "HOST_VISIBLE" => vk::MemoryPropertyFlags::HOST_VISIBLE,
            "HOST_COHERENT" => vk::MemoryPropertyFlags::HOST_COHERENT,
            "HOST_CACHED" => vk::MemoryPropertyFlags::HOST_CACHED,
            "LAZILY_ALLOCATED" => vk::MemoryPropertyFlags::LAZILY_ALLOCATED,
            "PROTECTED" => vk::MemoryPropertyFlags::PROTECTED,
            other => anyhow::bail!("unknown memory property flag: {}", other),
        };
    }
    Ok(flags)
}
