//! Harness error type.

use stressfield_kernels::KernelError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error("series '{name}' has {len} prices; need at least 2")]
    EmptySeries { name: String, len: usize },
}

pub type Result<T> = std::result::Result<T, HarnessError>;
