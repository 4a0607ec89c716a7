use ash::vk;
use retrace_core::{CapturedId, CoreError, ObjectKind};

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// A native driver call failed; the result code is kept verbatim.
    #[error("{op} failed: {result:?}")]
    Driver { op: &'static str, result: vk::Result },

    #[error("range out of bounds: offset={offset}, size={size}, available={available}")]
    OutOfRange { offset: u64, size: u64, available: u64 },

    #[error("unsupported resource: {0}")]
    Unsupported(String),

    #[error("expected {expected} subresource states, got {got}")]
    StateCount { expected: usize, got: usize },

    #[error("expected {expected} subresource regions, got {got}")]
    RegionCount { expected: usize, got: usize },

    #[error("no offscreen swapchain bookkeeping for {id}")]
    MissingSwapchain { id: CapturedId },

    #[error("{kind} {id} is not tracked")]
    UnknownObject { kind: ObjectKind, id: CapturedId },

    #[error("no memory type satisfies {0}")]
    NoMemoryType(&'static str),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ReplayError {
    /// Result code to hand back to the replayed call.
    pub fn vk_result(&self) -> vk::Result {
        match self {
            ReplayError::Driver { result, .. } => *result,
            ReplayError::Unsupported(_) => vk::Result::ERROR_FEATURE_NOT_PRESENT,
            ReplayError::NoMemoryType(_) => vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            ReplayError::OutOfRange { .. }
            | ReplayError::StateCount { .. }
            | ReplayError::RegionCount { .. } => {
                vk::Result::ERROR_INITIALIZATION_FAILED
            }
            ReplayError::MissingSwapchain { .. }
            | ReplayError::UnknownObject { .. }
            | ReplayError::Core(_) => vk::Result::ERROR_UNKNOWN,
        }
    }

    pub fn unknown(kind: ObjectKind, id: CapturedId) -> Self {
        ReplayError::UnknownObject { kind, id }
    }
}

/// Attach the failing entry point name to a raw `vk::Result`.
pub trait VkResultExt<T> {
    fn vk_op(self, op: &'static str) -> Result<T, ReplayError>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn vk_op(self, op: &'static str) -> Result<T, ReplayError> {
        self.map_err(|result| ReplayError::Driver { op, result })
    }
}
