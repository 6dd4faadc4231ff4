// Size of a data page in bytes.
pub const PAGE_SIZE: usize = 4096;
pub const INVALID_PAGE_ID: PageId = u32::MAX;

// Number of access timestamps the replacer keeps per frame.
pub const LRUK_REPLACER_K: usize = 2;

// Default width of the disk scheduler's worker pool.
pub const DISK_SCHEDULER_WORKERS: usize = 32;

pub type FrameId = usize;
pub type PageId = u32;
