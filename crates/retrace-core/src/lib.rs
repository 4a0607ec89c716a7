pub mod config;
pub mod error;
pub mod handle;
pub mod handle_table;

pub use error::CoreError;
pub use handle::{CapturedId, ObjectKind};
pub use handle_table::{HandleTable, TrackedObject};
