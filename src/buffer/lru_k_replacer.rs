use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::trace;

use crate::common::config::FrameId;

/// Hint describing why a page is being accessed. The baseline replacement
/// policy ignores it; the interface reserves it for policy extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Unknown,
    Lookup,
    Scan,
    Index,
}

/// Access history of a single frame. The oldest of the last K recorded
/// timestamps sits at the front.
#[derive(Debug)]
struct LruKNode {
    history: VecDeque<u64>,
    is_evictable: bool,
}

/// LruKReplacer implements the LRU-K replacement policy.
///
/// The LRU-K algorithm evicts the frame whose backward k-distance is the
/// maximum of all evictable frames. Backward k-distance is computed as the
/// difference in time between the current timestamp and the timestamp of
/// the k-th previous access.
///
/// A frame with fewer than k historical references is given +inf as its
/// backward k-distance. When multiple frames have +inf backward k-distance,
/// classical LRU (earliest recorded access) picks the victim.
pub struct LruKReplacer {
    inner: Mutex<ReplacerInner>,
}

struct ReplacerInner {
    node_store: HashMap<FrameId, LruKNode>,
    /// Number of frames currently marked evictable.
    curr_size: usize,
    /// Maximum number of frames the replacer tracks; frame ids are in
    /// `[0, replacer_size)`.
    replacer_size: usize,
    k: usize,
    start: Instant,
    last_stamp: u64,
}

impl ReplacerInner {
    /// Nanoseconds since the replacer was created, bumped so consecutive
    /// calls always observe distinct values.
    fn stamp(&mut self) -> u64 {
        let now = self.start.elapsed().as_nanos() as u64;
        self.last_stamp = now.max(self.last_stamp + 1);
        self.last_stamp
    }
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "LRU-K needs k > 0");
        Self {
            inner: Mutex::new(ReplacerInner {
                node_store: HashMap::with_capacity(num_frames),
                curr_size: 0,
                replacer_size: num_frames,
                k,
                start: Instant::now(),
                last_stamp: 0,
            }),
        }
    }

    /// Finds the evictable frame with the largest backward k-distance,
    /// removes it from the replacer, and returns it. Returns `None` when no
    /// frame is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.curr_size == 0 {
            return None;
        }
        let now = inner.stamp();
        let k = inner.k;

        // (frame, k-distance where None is +inf, oldest recorded access)
        let mut victim: Option<(FrameId, Option<u64>, u64)> = None;
        for (&frame_id, node) in &inner.node_store {
            if !node.is_evictable {
                continue;
            }
            let oldest = *node.history.front().expect("history is never empty");
            let dist = if node.history.len() < k {
                None
            } else {
                Some(now - node.history[node.history.len() - k])
            };
            let better = match &victim {
                None => true,
                // A finite incumbent loses to +inf or to a larger distance.
                Some((_, Some(incumbent), _)) => match dist {
                    None => true,
                    Some(d) => d > *incumbent,
                },
                // A +inf incumbent only loses to +inf with an older access.
                Some((_, None, incumbent_oldest)) => dist.is_none() && oldest < *incumbent_oldest,
            };
            if better {
                victim = Some((frame_id, dist, oldest));
            }
        }

        let (frame_id, _, _) = victim?;
        inner.node_store.remove(&frame_id);
        inner.curr_size -= 1;
        trace!(frame_id, "evicted frame");
        Some(frame_id)
    }

    /// Records that the given frame was accessed now. A frame seen for the
    /// first time starts non-evictable with this single timestamp; a known
    /// frame keeps only its K most recent timestamps.
    ///
    /// Panics if `frame_id` is outside the replacer's capacity.
    pub fn record_access(&self, frame_id: FrameId, _access_type: AccessType) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        assert!(
            frame_id < inner.replacer_size,
            "frame id {frame_id} out of range for replacer of size {}",
            inner.replacer_size
        );
        let now = inner.stamp();
        let k = inner.k;
        let node = inner.node_store.entry(frame_id).or_insert_with(|| LruKNode {
            history: VecDeque::with_capacity(k),
            is_evictable: false,
        });
        if node.history.len() == k {
            node.history.pop_front();
        }
        node.history.push_back(now);
    }

    /// Toggles whether a frame may be chosen as a victim. Also maintains
    /// the replacer's size, which is the number of evictable frames.
    ///
    /// Idempotent when the flag already matches. Panics on unknown frames.
    pub fn set_evictable(&self, frame_id: FrameId, set_evictable: bool) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let node = inner
            .node_store
            .get_mut(&frame_id)
            .unwrap_or_else(|| panic!("set_evictable on unknown frame {frame_id}"));
        if node.is_evictable == set_evictable {
            return;
        }
        node.is_evictable = set_evictable;
        if set_evictable {
            inner.curr_size += 1;
            assert!(
                inner.curr_size <= inner.replacer_size,
                "evictable count exceeds replacer capacity"
            );
        } else {
            inner.curr_size -= 1;
        }
    }

    /// Removes a specific frame and its access history, regardless of its
    /// backward k-distance. No-op for unknown frames; panics if the frame
    /// is not evictable.
    pub fn remove(&self, frame_id: FrameId) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if let Some(node) = inner.node_store.get(&frame_id) {
            assert!(
                node.is_evictable,
                "remove called on non-evictable frame {frame_id}"
            );
            inner.node_store.remove(&frame_id);
            inner.curr_size -= 1;
        }
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.inner.lock().curr_size
    }
}
