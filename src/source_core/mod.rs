//! Input side of the pipeline: JSONL tick source and archive replay

pub mod reader;
pub mod replay;
pub mod source;

pub use reader::{StartPosition, TailReader};
pub use replay::{ReplayProducer, ReplayStats};
pub use source::JsonlTickSource;

use crate::sink_core::backoff::MaxRetriesExceeded;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tick source gave up: {0}")]
    RetriesExhausted(#[from] MaxRetriesExceeded),
}
