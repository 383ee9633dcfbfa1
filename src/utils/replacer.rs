use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::storage::page::page::FrameId;

/// How an access reached the pool. Eviction ignores this today; it is
/// recorded so a weighted policy can use it without changing the trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Unknown,
    Lookup,
    Scan,
}

pub trait Replacer {
    fn record_access(&self, frame_id: FrameId, access_type: AccessType);
    fn set_evictable(&self, frame_id: FrameId, evictable: bool);
    fn evict(&self) -> Option<FrameId>;
    fn remove(&self, frame_id: FrameId);
    fn size(&self) -> usize;
}

/// Per-frame tracking state: the retained access history, most recent first,
/// never longer than k.
struct LRUKNode {
    history: VecDeque<u64>,
    is_evictable: bool,
}

impl LRUKNode {
    fn new() -> Self {
        LRUKNode {
            history: VecDeque::new(),
            is_evictable: false,
        }
    }

    /// Oldest retained timestamp. With the history bounded to k entries this
    /// doubles as the k-th most recent access once the node is full.
    fn oldest(&self) -> Option<u64> {
        self.history.back().copied()
    }
}

struct LRUKInner {
    node_store: HashMap<FrameId, LRUKNode>,
    current_timestamp: u64,
    // Count of evictable tracked frames, maintained on every toggle.
    curr_size: usize,
}

/// Selects eviction victims by backward k-distance: the elapsed logical time
/// between now and a frame's k-th most recent access. Frames with fewer than
/// k recorded accesses rank as infinitely distant and are evicted first,
/// oldest first access winning ties.
pub struct LRUKReplacer {
    inner: Mutex<LRUKInner>,
    replacer_size: usize,
    k: usize,
}

impl LRUKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "LRU-K requires k >= 1");
        LRUKReplacer {
            inner: Mutex::new(LRUKInner {
                node_store: HashMap::with_capacity(num_frames),
                current_timestamp: 0,
                curr_size: 0,
            }),
            replacer_size: num_frames,
            k,
        }
    }

    fn check_frame_id(&self, frame_id: FrameId) {
        assert!(
            (frame_id as usize) < self.replacer_size,
            "frame id {} out of range for replacer over {} frames",
            frame_id,
            self.replacer_size
        );
    }
}

impl Replacer for LRUKReplacer {
    fn record_access(&self, frame_id: FrameId, _access_type: AccessType) {
        self.check_frame_id(frame_id);

        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        inner.current_timestamp += 1;
        let now = inner.current_timestamp;

        let node = inner
            .node_store
            .entry(frame_id)
            .or_insert_with(LRUKNode::new);
        node.history.push_front(now);
        node.history.truncate(self.k);
    }

    fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        self.check_frame_id(frame_id);

        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let Some(node) = inner.node_store.get_mut(&frame_id) else {
            return;
        };
        if node.is_evictable == evictable {
            return;
        }
        node.is_evictable = evictable;
        if evictable {
            inner.curr_size += 1;
        } else {
            inner.curr_size -= 1;
        }
    }

    fn evict(&self) -> Option<FrameId> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if inner.curr_size == 0 {
            return None;
        }

        let now = inner.current_timestamp;

        let mut victim: Option<FrameId> = None;
        let mut victim_is_inf = false;
        // Earliest first access among the +inf candidates.
        let mut inf_oldest = u64::MAX;
        let mut max_distance = 0u64;

        for (&frame_id, node) in &inner.node_store {
            if !node.is_evictable {
                continue;
            }
            let Some(oldest) = node.oldest() else {
                // Tracked but never accessed: not a candidate.
                continue;
            };

            if node.history.len() < self.k {
                if !victim_is_inf || oldest < inf_oldest {
                    victim = Some(frame_id);
                    inf_oldest = oldest;
                    victim_is_inf = true;
                }
            } else if !victim_is_inf {
                let distance = now - oldest;
                if victim.is_none() || distance > max_distance {
                    victim = Some(frame_id);
                    max_distance = distance;
                }
            }
        }

        let frame_id = victim?;
        inner.node_store.remove(&frame_id);
        inner.curr_size -= 1;
        Some(frame_id)
    }

    fn remove(&self, frame_id: FrameId) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let Some(node) = inner.node_store.get(&frame_id) else {
            return;
        };
        assert!(
            node.is_evictable,
            "cannot remove non-evictable frame {} from replacer",
            frame_id
        );
        inner.node_store.remove(&frame_id);
        inner.curr_size -= 1;
    }

    fn size(&self) -> usize {
        self.inner.lock().curr_size
    }
}
