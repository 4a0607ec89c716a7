//! Replay-side core: per-device object wrappers, resource data movement,
//! memory type reconciliation and the offscreen swapchain substitute.

pub mod ash_driver;
pub mod driver;
pub mod error;
pub mod format;
pub mod offscreen;
pub mod reconcile;
pub mod session;
pub mod staging;
pub mod state;
pub mod transcoder;
pub mod wrappers;

pub use ash_driver::AshDriver;
pub use driver::{DeviceDriver, LiveResource};
pub use error::ReplayError;
pub use offscreen::OffscreenSwapchain;
pub use reconcile::{MemoryTypeReconciler, ReconcilePath, Reconciliation};
pub use session::{ReplayCommand, ReplayResponse, ReplaySession};
pub use transcoder::{CopyLayout, ReadRegion, ResourceTranscoder, StateTransition, SubresourceData};
