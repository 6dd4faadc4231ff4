use std::sync::Arc;
use std::thread;

use crossbeam::channel::{Receiver, Sender};
use tokio::sync::oneshot;
use tracing::warn;

use crate::common::config::{PageId, DISK_SCHEDULER_WORKERS};
use crate::error::DiskResult;
use crate::storage::disk::DiskManager;
use crate::storage::page::Page;

/// Represents a Write or Read request for the DiskManager to execute.
pub enum DiskRequest {
    Read {
        /// The page being read from disk.
        page_id: PageId,
        /// The frame receiving the bytes.
        page: Page,
        /// Callback used to signal to the request issuer when the request
        /// has been completed.
        callback: oneshot::Sender<DiskResult<()>>,
    },
    Write {
        /// The page being written out to disk.
        page_id: PageId,
        /// The frame supplying the bytes.
        page: Page,
        /// Callback used to signal to the request issuer when the request
        /// has been completed.
        callback: oneshot::Sender<DiskResult<()>>,
    },
}

/// The DiskScheduler schedules disk read and write operations.
///
/// A request is scheduled by calling [`DiskScheduler::schedule`] with an
/// appropriate [`DiskRequest`]. The scheduler maintains a pool of background
/// workers that process scheduled requests using the disk manager. Workers
/// are spawned in the constructor and joined when the scheduler is dropped.
///
/// Requests are processed FIFO per worker; nothing orders requests placed
/// on different workers. A caller that needs one request to happen after
/// another must wait on the first request's completion before scheduling
/// the second.
pub struct DiskScheduler {
    /// A shared queue to concurrently schedule and process requests. When
    /// the scheduler is dropped, one `None` per worker is put into the
    /// queue to signal the workers to stop.
    request_queue: Sender<Option<DiskRequest>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        Self::with_workers(disk_manager, DISK_SCHEDULER_WORKERS)
    }

    pub fn with_workers(disk_manager: Arc<DiskManager>, num_workers: usize) -> Self {
        assert!(num_workers > 0, "disk scheduler needs at least one worker");
        let (tx, rx) = crossbeam::channel::unbounded();
        let workers = (0..num_workers)
            .map(|_| {
                let rx = rx.clone();
                let disk_manager = Arc::clone(&disk_manager);
                thread::spawn(move || Self::worker_loop(rx, disk_manager))
            })
            .collect();
        Self {
            request_queue: tx,
            workers,
        }
    }

    /// Schedules a request for the DiskManager to execute. Returns
    /// immediately; the request's callback resolves when the I/O is done.
    ///
    /// Panics if the scheduler has been shut down.
    pub fn schedule(&self, r: DiskRequest) {
        self.request_queue
            .send(Some(r))
            .expect("schedule on a shut-down disk scheduler");
    }

    fn worker_loop(rx: Receiver<Option<DiskRequest>>, disk_manager: Arc<DiskManager>) {
        while let Ok(r) = rx.recv() {
            match r {
                Some(DiskRequest::Read {
                    page_id,
                    page,
                    callback,
                }) => {
                    let result = disk_manager.read_page(page_id, &mut *page.data_mut());
                    if let Err(e) = &result {
                        warn!(page_id, error = %e, "disk read failed");
                    }
                    // The issuer may have stopped waiting; that is fine.
                    let _ = callback.send(result);
                }
                Some(DiskRequest::Write {
                    page_id,
                    page,
                    callback,
                }) => {
                    let result = disk_manager.write_page(page_id, &*page.data());
                    if let Err(e) = &result {
                        warn!(page_id, error = %e, "disk write failed");
                    }
                    let _ = callback.send(result);
                }
                None => break,
            }
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        // One stop sentinel per worker; each worker consumes exactly one.
        for _ in &self.workers {
            let _ = self.request_queue.send(None);
        }
        for worker in self.workers.drain(..) {
            worker.join().expect("disk scheduler worker panicked");
        }
    }
}
