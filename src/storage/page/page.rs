use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::config::{PageId, PAGE_SIZE};

/// Borrowed view of a frame's bytes.
pub type PageDataRef<'a> = RwLockReadGuard<'a, [u8; PAGE_SIZE]>;
/// Borrowed mutable view of a frame's bytes.
pub type PageDataMut<'a> = RwLockWriteGuard<'a, [u8; PAGE_SIZE]>;
/// Owned read latch on a frame's bytes, held by `ReadPageGuard`.
pub type OwnedPageDataRead = ArcRwLockReadGuard<RawRwLock, [u8; PAGE_SIZE]>;
/// Owned write latch on a frame's bytes, held by `WritePageGuard`.
pub type OwnedPageDataWrite = ArcRwLockWriteGuard<RawRwLock, [u8; PAGE_SIZE]>;

/// Page is the basic unit of storage within the database system. A `Page`
/// handle wraps one buffer pool frame: the in-memory bytes of at most one
/// disk page plus the book-keeping the buffer pool manager needs (pin
/// count, dirty flag, resident page id).
///
/// The byte buffer sits behind its own reader/writer lock, which serializes
/// disk I/O against readers of the bytes. Metadata lives behind a separate
/// mutex and is only mutated while the pool latch is held.
#[derive(Debug, Clone)]
pub struct Page {
    data: Arc<RwLock<[u8; PAGE_SIZE]>>,
    meta: Arc<Mutex<PageMeta>>,
}

#[derive(Debug)]
struct PageMeta {
    /// The id of the page currently resident in this frame.
    page_id: Option<PageId>,
    pin_count: i32,
    /// True if the in-memory bytes differ from the bytes on disk.
    is_dirty: bool,
}

impl Page {
    /// Creates a frame with zeroed bytes and no resident page.
    pub fn new() -> Page {
        Page {
            data: Arc::new(RwLock::new([0; PAGE_SIZE])),
            meta: Arc::new(Mutex::new(PageMeta {
                page_id: None,
                pin_count: 0,
                is_dirty: false,
            })),
        }
    }

    /// Zeroes the bytes and clears all metadata, readying the frame for a
    /// new resident page.
    pub fn reset(&self) {
        self.data.write().fill(0);
        let mut meta = self.meta.lock();
        meta.page_id = None;
        meta.pin_count = 0;
        meta.is_dirty = false;
    }

    pub fn data(&self) -> PageDataRef<'_> {
        self.data.read()
    }

    pub fn data_mut(&self) -> PageDataMut<'_> {
        self.data.write()
    }

    /// Takes the read latch in owned form, for guards that outlive the
    /// borrow of `self`.
    pub fn read_data_owned(&self) -> OwnedPageDataRead {
        self.data.read_arc()
    }

    /// Takes the write latch in owned form. A frame that is already
    /// write-latched is a caller bug, so contention panics instead of
    /// blocking.
    pub fn write_data_owned(&self) -> OwnedPageDataWrite {
        self.data
            .try_write_arc()
            .expect("frame already write-locked")
    }

    pub fn page_id(&self) -> Option<PageId> {
        self.meta.lock().page_id
    }

    pub fn set_page_id(&self, page_id: PageId) {
        self.meta.lock().page_id = Some(page_id);
    }

    pub fn pin_count(&self) -> i32 {
        self.meta.lock().pin_count
    }

    pub fn pin(&self) {
        self.meta.lock().pin_count += 1;
    }

    pub fn unpin(&self) {
        self.meta.lock().pin_count -= 1;
    }

    pub fn is_dirty(&self) -> bool {
        self.meta.lock().is_dirty
    }

    pub fn set_dirty(&self, is_dirty: bool) {
        self.meta.lock().is_dirty = is_dirty;
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}
