use std::fmt;

/// Identity assigned to an object at capture time.
/// Stable across capture and replay; the replay engine looks objects up by
/// this value and only translates to a live handle when calling the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CapturedId(pub u64);

impl CapturedId {
    pub const NULL: CapturedId = CapturedId(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for CapturedId {
    fn from(raw: u64) -> Self {
        CapturedId(raw)
    }
}

impl fmt::Display for CapturedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

macro_rules! object_kinds {
    ($($kind:ident),+ $(,)?) => {
        /// Object category. Every tracked object lives in exactly one bucket.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum ObjectKind {
            $($kind),+
        }

        impl ObjectKind {
            pub const ALL: &'static [ObjectKind] = &[$(ObjectKind::$kind),+];
            pub const COUNT: usize = Self::ALL.len();

            pub fn name(&self) -> &'static str {
                match self {
                    $(ObjectKind::$kind => stringify!($kind)),+
                }
            }
        }
    };
}

object_kinds! {
    Instance,
    PhysicalDevice,
    Device,
    Queue,
    CommandPool,
    CommandBuffer,
    DeviceMemory,
    Buffer,
    BufferView,
    Image,
    ImageView,
    Fence,
    Semaphore,
    Event,
    QueryPool,
    Pipeline,
    PipelineLayout,
    PipelineCache,
    Sampler,
    SamplerYcbcrConversion,
    DescriptorSetLayout,
    DescriptorPool,
    DescriptorSet,
    DescriptorUpdateTemplate,
    Framebuffer,
    RenderPass,
    ShaderModule,
    Surface,
    Swapchain,
    Display,
    DisplayMode,
    DebugReportCallback,
    DebugUtilsMessenger,
    AccelerationStructure,
    AccelerationStructureNv,
    ValidationCache,
    PerformanceConfigurationIntel,
    DeferredOperation,
    PrivateDataSlot,
    IndirectCommandsLayoutNv,
    Micromap,
    OpticalFlowSessionNv,
    VideoSession,
    VideoSessionParameters,
    ShaderExt,
}

impl ObjectKind {
    /// Bucket index inside a [`crate::HandleTable`].
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Dispatchable objects carry a loader dispatch pointer; their live
    /// handles are pointers rather than driver-chosen 64-bit values.
    pub fn is_dispatchable(&self) -> bool {
        matches!(
            self,
            ObjectKind::Instance
                | ObjectKind::PhysicalDevice
                | ObjectKind::Device
                | ObjectKind::Queue
                | ObjectKind::CommandBuffer
        )
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
