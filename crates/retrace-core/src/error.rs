use crate::handle::{CapturedId, ObjectKind};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{kind:?} not found: {id}")]
    HandleNotFound { kind: ObjectKind, id: CapturedId },

    #[error("{kind:?} already registered: {id}")]
    DuplicateHandle { kind: ObjectKind, id: CapturedId },

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
