use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::lru_k_replacer::{AccessType, LruKReplacer};
use crate::common::config::{FrameId, PageId, INVALID_PAGE_ID};
use crate::storage::disk::{DiskManager, DiskRequest, DiskScheduler};
use crate::storage::page::{BasicPageGuard, Page, ReadPageGuard, WritePageGuard};

/// Bookkeeping protected by the pool latch: which frame hosts which page,
/// and which frames host none. The page table's domain and the free list
/// always partition `[0, pool_size)`.
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: Vec<FrameId>,
}

/// BufferPoolManager reads disk pages to and from its internal buffer pool.
///
/// It upholds one global invariant: every in-use page is resident in
/// exactly one frame, dirty bytes reach disk before their frame is reused,
/// and pinned frames are never evicted.
///
/// All operations serialize on the pool latch, which is also held across
/// disk waits. Concurrent fetches of the same absent page are therefore
/// single-flight: the second fetch finds the page resident.
pub struct BufferPoolManager {
    /// The next page id to be allocated. Monotonic; ids are never reused.
    next_page_id: AtomicU32,

    /// The frames. Created once at construction; a frame's identity is its
    /// index here.
    pages: Vec<Page>,
    disk_scheduler: DiskScheduler,
    /// Replacer to find unpinned frames for replacement. Serializes itself.
    replacer: LruKReplacer,
    /// Pool latch over the page table and the free list.
    state: Mutex<PoolState>,
}

impl BufferPoolManager {
    /// Creates a new BufferPoolManager.
    ///
    /// `pool_size` is the number of frames, `replacer_k` the look-back
    /// constant for the LRU-K replacer.
    pub fn new(
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        replacer_k: usize,
    ) -> BufferPoolManager {
        BufferPoolManager {
            next_page_id: AtomicU32::new(0),
            pages: (0..pool_size).map(|_| Page::new()).collect(),
            disk_scheduler: DiskScheduler::new(disk_manager),
            replacer: LruKReplacer::new(pool_size, replacer_k),
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                // Reversed so the lowest frame id is handed out first.
                free_list: (0..pool_size).rev().collect(),
            }),
        }
    }

    /// Creates a new page in the buffer pool, pinned once and zero-filled.
    /// Returns `None` if all frames are in use and none is evictable.
    pub fn new_page(&self) -> Option<Page> {
        let mut state = self.state.lock();
        let frame_id = self.new_frame(&mut state)?;

        let page_id = self.allocate_page();
        let page = &self.pages[frame_id];
        page.set_page_id(page_id);
        page.pin();
        state.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id, AccessType::Unknown);
        self.replacer.set_evictable(frame_id, false);

        debug!(page_id, frame_id, "created new page");
        Some(page.clone())
    }

    /// Fetches the requested page from the buffer pool, reading it from
    /// disk on a miss. Returns `None` if the page is absent and all frames
    /// are in use and not evictable, or if the disk read fails.
    pub fn fetch_page(&self, page_id: PageId, access_type: AccessType) -> Option<Page> {
        if page_id == INVALID_PAGE_ID {
            return None;
        }

        let mut state = self.state.lock();
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let page = &self.pages[frame_id];
            page.pin();
            self.replacer.record_access(frame_id, access_type);
            self.replacer.set_evictable(frame_id, false);
            return Some(page.clone());
        }

        let frame_id = self.new_frame(&mut state)?;
        let page = &self.pages[frame_id];
        page.set_page_id(page_id);
        page.pin();
        self.replacer.record_access(frame_id, access_type);
        self.replacer.set_evictable(frame_id, false);

        let (tx, rx) = oneshot::channel();
        self.disk_scheduler.schedule(DiskRequest::Read {
            page_id,
            page: page.clone(),
            callback: tx,
        });
        let result = rx.blocking_recv().expect("disk scheduler dropped completion");
        if let Err(e) = result {
            warn!(page_id, error = %e, "fetch read failed, undoing frame allocation");
            // The page table was never touched; just hand the frame back.
            page.reset();
            self.replacer.set_evictable(frame_id, true);
            self.replacer.remove(frame_id);
            state.free_list.push(frame_id);
            return None;
        }
        state.page_table.insert(page_id, frame_id);

        Some(page.clone())
    }

    /// Unpins the target page. Returns false if the page is not resident or
    /// its pin count is already zero.
    ///
    /// When the pin count reaches zero the frame becomes evictable. The
    /// supplied dirty bit is ORed in; a true is never downgraded.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let page = &self.pages[frame_id];
        if page.pin_count() <= 0 {
            return false;
        }
        if is_dirty {
            page.set_dirty(true);
        }
        page.unpin();
        if page.pin_count() == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Writes the target page to disk regardless of its dirty flag, then
    /// clears the flag. Returns false if the page is not resident or the
    /// write fails.
    pub fn flush_page(&self, page_id: PageId) -> bool {
        if page_id == INVALID_PAGE_ID {
            return false;
        }
        let state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let page = &self.pages[frame_id];

        let (tx, rx) = oneshot::channel();
        self.disk_scheduler.schedule(DiskRequest::Write {
            page_id,
            page: page.clone(),
            callback: tx,
        });
        match rx.blocking_recv().expect("disk scheduler dropped completion") {
            Ok(()) => {
                page.set_dirty(false);
                true
            }
            Err(e) => {
                warn!(page_id, error = %e, "flush failed, page stays dirty");
                false
            }
        }
    }

    /// Flushes every page currently resident in the pool. The latch is
    /// retaken per page, so concurrent mutators may interleave.
    pub fn flush_all_pages(&self) {
        let page_ids: Vec<PageId> = self.state.lock().page_table.keys().copied().collect();
        for page_id in page_ids {
            self.flush_page(page_id);
        }
    }

    /// Deletes a page from the buffer pool. A non-resident page is vacuous
    /// success; a pinned page cannot be deleted and returns false.
    ///
    /// The dirty bytes of a deleted page are dropped, not written back.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return true;
        };
        let page = &self.pages[frame_id];
        if page.pin_count() > 0 {
            return false;
        }
        state.page_table.remove(&page_id);
        self.replacer.remove(frame_id);
        state.free_list.push(frame_id);
        page.reset();
        self.deallocate_page(page_id);
        debug!(page_id, frame_id, "deleted page");
        true
    }

    /// PageGuard wrapper for `new_page`: the returned guard unpins the
    /// page when dropped.
    pub fn new_page_guarded(self: &Arc<Self>) -> Option<BasicPageGuard> {
        let page = self.new_page()?;
        Some(BasicPageGuard::new(Arc::clone(self), page))
    }

    /// PageGuard wrapper for `fetch_page` with no frame latch held.
    pub fn fetch_page_basic(self: &Arc<Self>, page_id: PageId) -> Option<BasicPageGuard> {
        let page = self.fetch_page(page_id, AccessType::Unknown)?;
        Some(BasicPageGuard::new(Arc::clone(self), page))
    }

    /// Fetches a page and takes its read latch for the guard's lifetime.
    pub fn fetch_page_read(self: &Arc<Self>, page_id: PageId) -> Option<ReadPageGuard> {
        Some(self.fetch_page_basic(page_id)?.upgrade_read())
    }

    /// Fetches a page and takes its write latch for the guard's lifetime.
    ///
    /// Panics if the frame is already write-latched.
    pub fn fetch_page_write(self: &Arc<Self>, page_id: PageId) -> Option<WritePageGuard> {
        Some(self.fetch_page_basic(page_id)?.upgrade_write())
    }

    /// Picks a frame to host a page: the free list first, otherwise a
    /// replacer victim. A dirty victim is written back (and the write
    /// awaited) before the frame is reused; the victim's old page-table
    /// entry is erased. Returns `None` when no frame can be obtained, or
    /// when the victim's write-back fails; in that case the victim stays
    /// resident so its bytes are not lost.
    fn new_frame(&self, state: &mut PoolState) -> Option<FrameId> {
        if let Some(frame_id) = state.free_list.pop() {
            self.pages[frame_id].reset();
            return Some(frame_id);
        }

        let frame_id = self.replacer.evict()?;
        let page = &self.pages[frame_id];
        let old_page_id = page.page_id().expect("evicted frame hosts a page");
        if page.is_dirty() {
            let (tx, rx) = oneshot::channel();
            self.disk_scheduler.schedule(DiskRequest::Write {
                page_id: old_page_id,
                page: page.clone(),
                callback: tx,
            });
            let result = rx.blocking_recv().expect("disk scheduler dropped completion");
            if let Err(e) = result {
                warn!(page_id = old_page_id, error = %e, "write-back failed, keeping frame resident");
                self.replacer.record_access(frame_id, AccessType::Unknown);
                self.replacer.set_evictable(frame_id, true);
                return None;
            }
        }
        debug!(page_id = old_page_id, frame_id, "evicted page");
        state.page_table.remove(&old_page_id);
        page.reset();
        Some(frame_id)
    }

    /// Allocates a page id. Caller holds the pool latch.
    fn allocate_page(&self) -> PageId {
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Releases a page id. A no-op: ids are handed out monotonically and
    /// never reused, so callers iterating page ids must tolerate gaps.
    fn deallocate_page(&self, _page_id: PageId) {}
}

#[cfg(test)]
mod tests {
    use rand::distributions::{Distribution, Uniform};
    use tempdir::TempDir;

    use super::*;
    use crate::common::config::PAGE_SIZE;

    fn pool(dir: &TempDir, pool_size: usize, k: usize) -> (Arc<DiskManager>, BufferPoolManager) {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let db_file = dir.path().join("test.db");
        let dm = Arc::new(DiskManager::new(&db_file).unwrap());
        let bpm = BufferPoolManager::new(pool_size, Arc::clone(&dm), k);
        (dm, bpm)
    }

    #[test]
    fn binary_data_survives_eviction() {
        let dir = TempDir::new("test").unwrap();
        let buffer_pool_size = 10;
        let (_dm, bpm) = pool(&dir, buffer_pool_size, 5);

        let mut rng = rand::thread_rng();
        let uniform_dist = Uniform::from(u8::MIN..=u8::MAX);

        // Scenario: the buffer pool is empty. We should be able to create a
        // new page.
        let page0 = bpm.new_page().unwrap();
        assert_eq!(Some(0), page0.page_id());

        let mut random_binary_data: Vec<u8> =
            (0..PAGE_SIZE).map(|_| uniform_dist.sample(&mut rng)).collect();
        // Insert terminal characters both in the middle and at the end.
        random_binary_data[PAGE_SIZE / 2] = 0;
        random_binary_data[PAGE_SIZE - 1] = 0;

        // Scenario: once we have a page, we should be able to read and
        // write content.
        page0.data_mut().copy_from_slice(&random_binary_data);
        assert_eq!(&*page0.data(), random_binary_data.as_slice());

        // Scenario: we should be able to create new pages until we fill up
        // the buffer pool.
        for _ in 1..buffer_pool_size {
            assert!(bpm.new_page().is_some());
        }

        // Scenario: once the buffer pool is full, we should not be able to
        // create any new pages.
        for _ in buffer_pool_size..buffer_pool_size * 2 {
            assert!(bpm.new_page().is_none());
        }

        // Scenario: after unpinning pages {0..4} we should be able to
        // create 5 new pages, evicting the old ones (dirty, written back).
        for i in 0..5 {
            assert!(bpm.unpin_page(i, true));
        }
        for _ in 0..5 {
            let page = bpm.new_page().unwrap();
            bpm.unpin_page(page.page_id().unwrap(), false);
        }

        // Scenario: we should be able to fetch the data we wrote a while
        // ago.
        let page0 = bpm.fetch_page(0, AccessType::Lookup).unwrap();
        assert_eq!(&*page0.data(), random_binary_data.as_slice());
        assert!(bpm.unpin_page(0, true));
    }

    #[test]
    fn pinning_gates_creation_and_fetching() {
        let dir = TempDir::new("test").unwrap();
        let buffer_pool_size = 10;
        let (_dm, bpm) = pool(&dir, buffer_pool_size, 5);

        let page0 = bpm.new_page().unwrap();
        assert_eq!(Some(0), page0.page_id());

        let data = b"Hello";
        page0.data_mut()[..data.len()].copy_from_slice(data);
        assert_eq!(data, &page0.data()[..data.len()]);

        for _ in 1..buffer_pool_size {
            assert!(bpm.new_page().is_some());
        }
        for _ in buffer_pool_size..buffer_pool_size * 2 {
            assert!(bpm.new_page().is_none());
        }

        // After unpinning pages {0..4} and pinning four new pages, there is
        // still one free frame left for reading page 0 back in.
        for i in 0..5 {
            assert!(bpm.unpin_page(i, true));
        }
        for _ in 0..4 {
            assert!(bpm.new_page().is_some());
        }

        let page0 = bpm.fetch_page(0, AccessType::Lookup).unwrap();
        assert_eq!(data, &page0.data()[..data.len()]);

        // If we unpin page 0 and make a new page, all the buffer pages are
        // pinned again and fetching page 0 fails.
        assert!(bpm.unpin_page(0, true));
        assert!(bpm.new_page().is_some());
        assert!(bpm.fetch_page(0, AccessType::Lookup).is_none());
    }

    #[test]
    fn single_frame_pool_reuses_its_frame() {
        let dir = TempDir::new("test").unwrap();
        let (dm, bpm) = pool(&dir, 1, 2);

        let page0 = bpm.new_page().unwrap();
        assert_eq!(Some(0), page0.page_id());
        assert!(bpm.unpin_page(0, false));

        // The clean frame is reused without a write-back.
        let page1 = bpm.new_page().unwrap();
        assert_eq!(Some(1), page1.page_id());
        assert_eq!(0, dm.num_writes());

        // Page 1 is pinned, so page 0 cannot be brought back in.
        assert!(bpm.fetch_page(0, AccessType::Lookup).is_none());

        assert!(bpm.unpin_page(1, false));
        let page0 = bpm.fetch_page(0, AccessType::Lookup).unwrap();
        assert_eq!(Some(0), page0.page_id());
        assert_eq!(1, dm.num_reads());
    }

    #[test]
    fn frame_with_infinite_distance_is_evicted_first() {
        let dir = TempDir::new("test").unwrap();
        let (dm, bpm) = pool(&dir, 3, 2);

        for i in 0..3 {
            let page = bpm.new_page().unwrap();
            assert_eq!(Some(i), page.page_id());
        }
        for i in 0..3 {
            assert!(bpm.unpin_page(i, i == 2));
        }

        // Give pages 0 and 1 a second and third access; page 2 keeps its
        // single recorded access and thus an infinite k-distance.
        for _ in 0..2 {
            for i in 0..2 {
                bpm.fetch_page(i, AccessType::Lookup).unwrap();
                assert!(bpm.unpin_page(i, false));
            }
        }

        // The next new page must evict page 2, writing its dirty bytes
        // back first.
        let page = bpm.new_page().unwrap();
        assert_eq!(Some(3), page.page_id());
        assert_eq!(1, dm.num_writes());

        // Pages 0 and 1 are still resident: fetching them hits the pool.
        assert_eq!(0, dm.num_reads());
        bpm.fetch_page(0, AccessType::Lookup).unwrap();
        bpm.fetch_page(1, AccessType::Lookup).unwrap();
        assert_eq!(0, dm.num_reads());
    }

    #[test]
    fn delete_page_frees_the_frame_and_drops_dirty_bytes() {
        let dir = TempDir::new("test").unwrap();
        let (dm, bpm) = pool(&dir, 3, 2);

        let page0 = bpm.new_page().unwrap();
        page0.data_mut()[..6].copy_from_slice(b"doomed");

        // Pinned pages cannot be deleted.
        assert!(!bpm.delete_page(0));

        assert!(bpm.unpin_page(0, true));
        assert!(bpm.delete_page(0));
        // Deleting an absent page is vacuous success.
        assert!(bpm.delete_page(0));

        // Fetching the deleted id faults from disk; the dirty bytes were
        // never written back.
        let page0 = bpm.fetch_page(0, AccessType::Lookup).unwrap();
        assert_eq!(1, dm.num_reads());
        assert!(page0.data().iter().all(|&b| b == 0));

        // The page id is not reused.
        let page = bpm.new_page().unwrap();
        assert_eq!(Some(1), page.page_id());
    }

    #[test]
    fn flush_page_clears_the_dirty_flag() {
        let dir = TempDir::new("test").unwrap();
        let (dm, bpm) = pool(&dir, 2, 2);

        let page0 = bpm.new_page().unwrap();
        page0.data_mut()[..5].copy_from_slice(b"fresh");
        assert!(bpm.unpin_page(0, true));
        assert!(page0.is_dirty());

        assert!(bpm.flush_page(0));
        assert!(!page0.is_dirty());
        assert_eq!(1, dm.num_writes());

        // Flushing writes regardless of the dirty flag.
        assert!(bpm.flush_page(0));
        assert_eq!(2, dm.num_writes());

        assert!(!bpm.flush_page(99));
        assert!(!bpm.flush_page(INVALID_PAGE_ID));
    }

    #[test]
    fn flush_all_pages_covers_the_resident_set() {
        let dir = TempDir::new("test").unwrap();
        let (dm, bpm) = pool(&dir, 3, 2);

        for i in 0..3 {
            let page = bpm.new_page().unwrap();
            page.data_mut()[0] = i as u8;
            assert!(bpm.unpin_page(i, true));
        }
        bpm.flush_all_pages();
        assert_eq!(3, dm.num_writes());
        for i in 0..3 {
            assert!(!bpm.fetch_page(i, AccessType::Lookup).unwrap().is_dirty());
        }
    }

    #[test]
    fn unpin_underflow_and_unknown_pages_report_false() {
        let dir = TempDir::new("test").unwrap();
        let (_dm, bpm) = pool(&dir, 2, 2);

        assert!(!bpm.unpin_page(0, false));

        bpm.new_page().unwrap();
        assert!(bpm.unpin_page(0, false));
        assert!(!bpm.unpin_page(0, false));
    }

    #[test]
    fn dirty_bit_is_never_downgraded() {
        let dir = TempDir::new("test").unwrap();
        let (_dm, bpm) = pool(&dir, 2, 2);

        let page0 = bpm.new_page().unwrap();
        page0.pin();
        assert!(bpm.unpin_page(0, true));
        // A later clean unpin must not clear the dirty flag.
        assert!(bpm.unpin_page(0, false));
        assert!(page0.is_dirty());
    }

    #[test]
    fn concurrent_fetches_of_one_page_share_a_frame() {
        let dir = TempDir::new("test").unwrap();
        let (dm, bpm) = pool(&dir, 4, 2);
        let bpm = Arc::new(bpm);

        let page = bpm.new_page().unwrap();
        page.data_mut()[..4].copy_from_slice(b"sync");
        assert!(bpm.unpin_page(0, true));
        assert!(bpm.flush_page(0));
        assert!(bpm.delete_page(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bpm = Arc::clone(&bpm);
                std::thread::spawn(move || {
                    let page = bpm.fetch_page(0, AccessType::Lookup).unwrap();
                    assert_eq!(&page.data()[..4], b"sync");
                    assert!(bpm.unpin_page(0, false));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // The pool latch makes the miss single-flight: one disk read total.
        assert_eq!(1, dm.num_reads());
    }
}
