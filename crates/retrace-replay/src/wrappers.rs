use ash::vk;
use ash::vk::Handle;
use retrace_core::{CapturedId, ObjectKind, TrackedObject};

use crate::driver::ImageDesc;
use crate::state::ResourceState;

/// A replayed object: captured identity, current live handle, weak
/// back-reference to its parent, and per-category metadata.
#[derive(Debug, Clone)]
pub struct ObjectWrapper {
    pub id: CapturedId,
    pub kind: ObjectKind,
    pub live: u64,
    /// Owning Device/Instance/PhysicalDevice. Never ownership.
    pub parent: Option<CapturedId>,
    pub parent_live: u64,
    pub info: ObjectInfo,
}

#[derive(Debug, Clone, Default)]
pub enum ObjectInfo {
    #[default]
    None,
    Device(DeviceInfo),
    Queue(QueueInfo),
    Memory(MemoryInfo),
    Buffer(BufferInfo),
    Image(ImageInfo),
    Surface,
    Swapchain(SwapchainInfo),
}

#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    /// Snapshot of the features the device was created with.
    pub enabled_features: vk::PhysicalDeviceFeatures,
    /// Creation flags per queue family, indexed by family.
    pub queue_family_flags: Vec<vk::DeviceQueueCreateFlags>,
    /// Bit i set when family i had queues created.
    pub queue_family_used: u64,
}

impl DeviceInfo {
    pub fn new(
        enabled_features: vk::PhysicalDeviceFeatures,
        queue_family_flags: Vec<vk::DeviceQueueCreateFlags>,
    ) -> Self {
        Self {
            enabled_features,
            queue_family_flags,
            queue_family_used: 0,
        }
    }

    pub fn family_used(&self, family: u32) -> bool {
        family < 64 && self.queue_family_used & (1 << family) != 0
    }

    pub fn mark_family_used(&mut self, family: u32) {
        if family < 64 {
            self.queue_family_used |= 1 << family;
        }
    }

    /// False when creation flags were recorded and `family` is not among them.
    pub fn family_declared(&self, family: u32) -> bool {
        self.queue_family_flags.is_empty() || (family as usize) < self.queue_family_flags.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QueueInfo {
    pub family: u32,
    pub index: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct MemoryInfo {
    pub size: u64,
    pub captured_type_index: u32,
    /// Type index actually used on the replay device.
    pub type_index: u32,
    pub flags: vk::MemoryPropertyFlags,
}

#[derive(Debug, Clone, Copy)]
pub struct BufferInfo {
    pub size: u64,
    pub usage: vk::BufferUsageFlags,
    pub memory: Option<CapturedId>,
    /// Last state the session left the buffer in.
    pub state: ResourceState,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageInfo {
    pub desc: ImageDesc,
    /// Set for offscreen swapchain backing images.
    pub swapchain: Option<CapturedId>,
}

#[derive(Debug, Clone, Default)]
pub struct SwapchainInfo {
    pub device: CapturedId,
    pub surface: CapturedId,
    /// Images actually created on replay; may differ from capture.
    pub replay_image_count: u32,
    pub queue_family: u32,
    pub image_ids: Vec<CapturedId>,
}

impl ObjectWrapper {
    pub fn new(kind: ObjectKind, id: CapturedId, live: u64) -> Self {
        Self {
            id,
            kind,
            live,
            parent: None,
            parent_live: 0,
            info: ObjectInfo::None,
        }
    }

    pub fn with_parent(mut self, parent: CapturedId, parent_live: u64) -> Self {
        self.parent = Some(parent);
        self.parent_live = parent_live;
        self
    }

    pub fn with_info(mut self, info: ObjectInfo) -> Self {
        self.info = info;
        self
    }

    /// Live handle reinterpreted as a typed Vulkan handle.
    pub fn live_as<T: Handle>(&self) -> T {
        T::from_raw(self.live)
    }

    pub fn device_info(&self) -> Option<&DeviceInfo> {
        match &self.info {
            ObjectInfo::Device(info) => Some(info),
            _ => None,
        }
    }

    pub fn device_info_mut(&mut self) -> Option<&mut DeviceInfo> {
        match &mut self.info {
            ObjectInfo::Device(info) => Some(info),
            _ => None,
        }
    }

    pub fn queue_info(&self) -> Option<&QueueInfo> {
        match &self.info {
            ObjectInfo::Queue(info) => Some(info),
            _ => None,
        }
    }

    pub fn memory_info(&self) -> Option<&MemoryInfo> {
        match &self.info {
            ObjectInfo::Memory(info) => Some(info),
            _ => None,
        }
    }

    pub fn buffer_info(&self) -> Option<&BufferInfo> {
        match &self.info {
            ObjectInfo::Buffer(info) => Some(info),
            _ => None,
        }
    }

    pub fn buffer_info_mut(&mut self) -> Option<&mut BufferInfo> {
        match &mut self.info {
            ObjectInfo::Buffer(info) => Some(info),
            _ => None,
        }
    }

    pub fn image_info(&self) -> Option<&ImageInfo> {
        match &self.info {
            ObjectInfo::Image(info) => Some(info),
            _ => None,
        }
    }

    pub fn swapchain_info(&self) -> Option<&SwapchainInfo> {
        match &self.info {
            ObjectInfo::Swapchain(info) => Some(info),
            _ => None,
        }
    }

    pub fn swapchain_info_mut(&mut self) -> Option<&mut SwapchainInfo> {
        match &mut self.info {
            ObjectInfo::Swapchain(info) => Some(info),
            _ => None,
        }
    }
}

impl TrackedObject for ObjectWrapper {
    fn captured_id(&self) -> CapturedId {
        self.id
    }

    fn kind(&self) -> ObjectKind {
        self.kind
    }

    fn live_handle(&self) -> u64 {
        self.live
    }

    fn set_live_handle(&mut self, live: u64) {
        self.live = live;
    }
}
