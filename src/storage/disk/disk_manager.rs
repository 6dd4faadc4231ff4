use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::common::config::{PageId, PAGE_SIZE};
use crate::error::{DiskError, DiskResult};

/// DiskManager performs the reading and writing of pages to and from disk,
/// providing a logical file layer within the context of a database
/// management system. Pages live at offset `page_id * PAGE_SIZE` in one
/// database file.
///
/// The handle is shared (behind `Arc`) across the disk scheduler's workers;
/// the file itself is protected by a mutex.
#[derive(Debug)]
pub struct DiskManager {
    /// Protects file access across scheduler workers.
    db_io: Mutex<File>,
    num_writes: AtomicU32,
    num_reads: AtomicU32,
    num_flushes: AtomicU32,
}

impl DiskManager {
    /// Opens (creating if absent) the database file at `db_file`.
    pub fn new(db_file: impl AsRef<Path>) -> std::io::Result<DiskManager> {
        let db_file = db_file.as_ref();
        let db_io = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(db_file)?;

        Ok(DiskManager {
            db_io: Mutex::new(db_io),
            num_writes: AtomicU32::new(0),
            num_reads: AtomicU32::new(0),
            num_flushes: AtomicU32::new(0),
        })
    }

    /// Writes one page of data to the database file and flushes it.
    pub fn write_page(&self, page_id: PageId, page_data: &[u8]) -> DiskResult<()> {
        assert_eq!(page_data.len(), PAGE_SIZE);
        let offset = page_id as u64 * PAGE_SIZE as u64;

        let mut db_io = self.db_io.lock();
        db_io
            .seek(SeekFrom::Start(offset))
            .map_err(|e| DiskError::io(page_id, e))?;
        db_io
            .write_all(page_data)
            .map_err(|e| DiskError::io(page_id, e))?;
        // Keep the on-disk file in sync with what callers were promised.
        db_io.flush().map_err(|e| DiskError::io(page_id, e))?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        self.num_flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Reads one page of data from the database file. A page that was never
    /// written (at or past the end of the file, or a short read) comes back
    /// zero-filled.
    pub fn read_page(&self, page_id: PageId, page_data: &mut [u8]) -> DiskResult<()> {
        assert_eq!(page_data.len(), PAGE_SIZE);
        let offset = page_id as u64 * PAGE_SIZE as u64;

        let mut db_io = self.db_io.lock();
        let file_len = db_io.metadata().map_err(|e| DiskError::io(page_id, e))?.len();
        if offset >= file_len {
            debug!(page_id, "read past end of file, returning zeroed page");
            page_data.fill(0);
            self.num_reads.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        db_io
            .seek(SeekFrom::Start(offset))
            .map_err(|e| DiskError::io(page_id, e))?;
        let read_count = db_io
            .read(page_data)
            .map_err(|e| DiskError::io(page_id, e))?;
        if read_count < PAGE_SIZE {
            debug!(page_id, read_count, "read less than a page");
            page_data[read_count..].fill(0);
        }

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Number of page writes that reached the file.
    pub fn num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }

    /// Number of page reads served, including zero-filled ones.
    pub fn num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    /// Number of file flushes performed.
    pub fn num_flushes(&self) -> u32 {
        self.num_flushes.load(Ordering::Relaxed)
    }
}
