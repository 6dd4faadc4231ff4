use thiserror::Error;

use crate::common::config::PageId;

pub type DiskResult<T> = Result<T, DiskError>;

/// Failure reported by the disk gateway. Travels through the scheduler's
/// completion channel rather than unwinding a worker thread.
#[derive(Debug, Error)]
pub enum DiskError {
    #[error("i/o failure on page {page_id}: {source}")]
    Io {
        page_id: PageId,
        #[source]
        source: std::io::Error,
    },
}

impl DiskError {
    pub(crate) fn io(page_id: PageId, source: std::io::Error) -> Self {
        DiskError::Io { page_id, source }
    }
}
