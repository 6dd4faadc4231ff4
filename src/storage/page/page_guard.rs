use std::sync::Arc;

use crate::buffer::buffer_pool_manager::BufferPoolManager;
use crate::common::config::{PageId, PAGE_SIZE};
use crate::storage::page::page::{
    OwnedPageDataRead, OwnedPageDataWrite, Page, PageDataMut, PageDataRef,
};

/// Scoped pinned access to a page with no frame latch held.
///
/// Dropping the guard unpins the page, forwarding a dirty bit that is set
/// by `data_mut` or an explicit `mark_dirty`. Guards are move-only; a
/// moved-from or upgraded guard is inert on drop.
pub struct BasicPageGuard {
    bpm: Arc<BufferPoolManager>,
    page: Option<Page>,
    is_dirty: bool,
}

impl BasicPageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page: Page) -> BasicPageGuard {
        BasicPageGuard {
            bpm,
            page: Some(page),
            is_dirty: false,
        }
    }

    fn page(&self) -> &Page {
        self.page.as_ref().expect("page guard already released")
    }

    pub fn page_id(&self) -> PageId {
        self.page().page_id().expect("guarded page has an id")
    }

    pub fn data(&self) -> PageDataRef<'_> {
        self.page().data()
    }

    /// Mutable view of the page bytes. Marks the guard dirty.
    pub fn data_mut(&mut self) -> PageDataMut<'_> {
        self.is_dirty = true;
        self.page().data_mut()
    }

    /// Marks the page dirty without touching its bytes.
    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    /// Upgrades to a ReadPageGuard, taking the frame's read latch. The
    /// page stays pinned throughout.
    pub fn upgrade_read(mut self) -> ReadPageGuard {
        let page = self.page.take().expect("page guard already released");
        let data = page.read_data_owned();
        ReadPageGuard {
            guard: BasicPageGuard {
                bpm: Arc::clone(&self.bpm),
                page: Some(page),
                is_dirty: self.is_dirty,
            },
            data: Some(data),
        }
    }

    /// Upgrades to a WritePageGuard, taking the frame's write latch. The
    /// page stays pinned throughout.
    ///
    /// Panics if the frame is already write-latched.
    pub fn upgrade_write(mut self) -> WritePageGuard {
        let page = self.page.take().expect("page guard already released");
        let data = page.write_data_owned();
        WritePageGuard {
            guard: BasicPageGuard {
                bpm: Arc::clone(&self.bpm),
                page: Some(page),
                // Write intent always unpins dirty.
                is_dirty: true,
            },
            data: Some(data),
        }
    }
}

impl Drop for BasicPageGuard {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            if let Some(page_id) = page.page_id() {
                self.bpm.unpin_page(page_id, self.is_dirty);
            }
        }
    }
}

/// Pinned access plus the frame's read latch, held for the guard's
/// lifetime. Any number of read guards may share one frame.
pub struct ReadPageGuard {
    guard: BasicPageGuard,
    data: Option<OwnedPageDataRead>,
}

impl ReadPageGuard {
    pub fn page_id(&self) -> PageId {
        self.guard.page_id()
    }

    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        self.data.as_ref().expect("read guard already released")
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // Release the frame latch before the unpin runs in the inner
        // guard's drop.
        self.data.take();
    }
}

/// Pinned access plus the frame's write latch. The page is unpinned dirty
/// when the guard drops.
pub struct WritePageGuard {
    guard: BasicPageGuard,
    data: Option<OwnedPageDataWrite>,
}

impl WritePageGuard {
    pub fn page_id(&self) -> PageId {
        self.guard.page_id()
    }

    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        self.data.as_ref().expect("write guard already released")
    }

    pub fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        self.data.as_mut().expect("write guard already released")
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        // Latch before pin, same as ReadPageGuard.
        self.data.take();
    }
}
