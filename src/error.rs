use std::io;

use thiserror::Error;

/// Failure of a single load attempt.
///
/// These never reach the caller of `request_load`; workers log them and drop the request.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read resource {id}: {source}")]
    Read {
        id: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to decode resource {id}: {source}")]
    Decode {
        id: String,
        #[source]
        source: image::ImageError,
    },
    #[error("resource {id} has no pixels ({width}x{height})")]
    EmptyImage { id: String, width: u32, height: u32 },
    #[error("decoder panicked while loading {id}")]
    Panicked { id: String },
}

impl LoadError {
    pub fn resource_id(&self) -> &str {
        match self {
            Self::Read { id, .. }
            | Self::Decode { id, .. }
            | Self::EmptyImage { id, .. }
            | Self::Panicked { id } => id,
        }
    }
}

pub type LoadResult<T> = std::result::Result<T, LoadError>;
