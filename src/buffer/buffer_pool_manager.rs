use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use hashlink::LinkedHashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, warn};

use crate::{
    storage::{
        disk::{
            manager::Manager,
            scheduler::{DiskScheduler, PageBuffer},
        },
        page::{
            page::{
                page_constants::{INVALID_PAGE_ID, PAGE_SIZE},
                FrameId, PageId,
            },
            page_guard::{ReadPageGuard, WritePageGuard},
        },
    },
    utils::replacer::{AccessType, LRUKReplacer, Replacer},
};

// Fresh page ids come from one counter for the whole process, so every pool
// allocates from the same id space and ids are never reissued.
static NEXT_PAGE_ID: AtomicU32 = AtomicU32::new(0);

/// One slot of the pool: a page-sized buffer plus the metadata the pinning
/// protocol runs on. Frames are created at pool construction and recycled,
/// never destroyed.
pub struct FrameHeader {
    pub frame_id: FrameId,

    /// Page currently resident in this frame, `INVALID_PAGE_ID` while the
    /// frame sits on the free list. Written only under the pool latch.
    pub(crate) page_id: AtomicU32,

    pub(crate) pin_count: AtomicUsize,
    pub(crate) is_dirty: AtomicBool,

    /// The page image behind the per-frame reader-writer latch. Guards take
    /// owned latch guards through the `Arc`; the disk worker fills the
    /// buffer through it on read-in.
    pub(crate) data: Arc<RwLock<Box<[u8]>>>,
}

impl FrameHeader {
    fn new(frame_id: FrameId) -> Self {
        FrameHeader {
            frame_id,
            page_id: AtomicU32::new(INVALID_PAGE_ID),
            pin_count: AtomicUsize::new(0),
            is_dirty: AtomicBool::new(false),
            data: Arc::new(RwLock::new(vec![0u8; PAGE_SIZE].into_boxed_slice())),
        }
    }

    /// Zero the image and clear all bookkeeping before the frame is reused.
    fn reset(&self) {
        self.data.write().fill(0);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.page_id.store(INVALID_PAGE_ID, Ordering::Release);
    }

    pub fn pin_count(&self) -> usize {
        self.pin_count.load(Ordering::Acquire)
    }
}

/// Mapping state behind the pool latch. Guards take this latch on their
/// release path, which is why it sits behind an `Arc` of its own.
pub(crate) struct PoolState {
    /// Insertion-ordered so bulk flushes walk pages in residency order.
    page_table: LinkedHashMap<PageId, FrameId>,
    free_frames: VecDeque<FrameId>,
}

/// Fixed-capacity cache of disk pages.
///
/// Owns the frames, the page table, the free list, the LRU-K replacer, and
/// the disk scheduler. All mapping changes happen under the single pool
/// latch; page contents are protected per frame by the latch inside each
/// [`FrameHeader`].
pub struct BufferPoolManager {
    num_frames: usize,
    frames: Vec<Arc<FrameHeader>>,
    pool: Arc<Mutex<PoolState>>,
    replacer: Arc<LRUKReplacer>,
    disk_scheduler: Arc<DiskScheduler>,
}

impl BufferPoolManager {
    pub fn new(num_frames: usize, manager: Arc<Mutex<Manager>>, k_dist: usize) -> Self {
        let frames = (0..num_frames)
            .map(|i| Arc::new(FrameHeader::new(i as FrameId)))
            .collect();
        let free_frames = (0..num_frames as FrameId).collect();

        BufferPoolManager {
            num_frames,
            frames,
            pool: Arc::new(Mutex::new(PoolState {
                page_table: LinkedHashMap::with_capacity(num_frames),
                free_frames,
            })),
            replacer: Arc::new(LRUKReplacer::new(num_frames, k_dist)),
            disk_scheduler: Arc::new(DiskScheduler::new(manager)),
        }
    }

    /// Capacity of the pool in frames.
    pub fn size(&self) -> usize {
        self.num_frames
    }

    /// Hand out a fresh page id. No frame is allocated and no I/O happens;
    /// the page becomes resident on first fetch, indistinguishable from any
    /// page that was evicted in the meantime.
    pub fn new_page(&self) -> PageId {
        NEXT_PAGE_ID.fetch_add(1, Ordering::Relaxed)
    }

    pub fn read_page(&self, page_id: PageId) -> ReadPageGuard {
        match self.checked_read_page(page_id) {
            Some(guard) => guard,
            None => {
                error!(page_id, "cannot bring in page: every frame is pinned");
                panic!("checked_read_page failed to bring in page {}", page_id);
            }
        }
    }

    pub fn write_page(&self, page_id: PageId) -> WritePageGuard {
        match self.checked_write_page(page_id) {
            Some(guard) => guard,
            None => {
                error!(page_id, "cannot bring in page: every frame is pinned");
                panic!("checked_write_page failed to bring in page {}", page_id);
            }
        }
    }

    /// Fallible fetch for reading: `None` when the page is absent, the free
    /// list is empty, and every frame is pinned.
    pub fn checked_read_page(&self, page_id: PageId) -> Option<ReadPageGuard> {
        let mut pool = self.pool.lock();
        let frame = self.frame_for_page(&mut pool, page_id)?;
        // Taking the frame latch while still holding the pool latch is
        // uncontended for a just-loaded frame; for a resident frame it can
        // wait on a live write guard, whose release path never needs the
        // pool latch before letting go of the frame latch.
        Some(ReadPageGuard::new(
            page_id,
            frame,
            Arc::clone(&self.replacer),
            Arc::clone(&self.pool),
            Arc::clone(&self.disk_scheduler),
        ))
    }

    /// Fallible fetch for writing; see [`Self::checked_read_page`].
    pub fn checked_write_page(&self, page_id: PageId) -> Option<WritePageGuard> {
        let mut pool = self.pool.lock();
        let frame = self.frame_for_page(&mut pool, page_id)?;
        Some(WritePageGuard::new(
            page_id,
            frame,
            Arc::clone(&self.replacer),
            Arc::clone(&self.pool),
            Arc::clone(&self.disk_scheduler),
        ))
    }

    /// Drop the page from the pool and release its disk storage. Refuses
    /// only when the page is currently pinned; deleting a non-resident page
    /// still deallocates the disk side.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut pool = self.pool.lock();

        if let Some(&frame_id) = pool.page_table.get(&page_id) {
            let frame = &self.frames[frame_id as usize];
            if frame.pin_count() > 0 {
                return false;
            }
            pool.page_table.remove(&page_id);
            // The last guard may still be between its pin decrement and its
            // evictable mark; force the flag so the removal below cannot
            // trip the non-evictable check. The straggler's own mark lands
            // on an untracked id and is ignored.
            self.replacer.set_evictable(frame_id, true);
            self.replacer.remove(frame_id);
            frame.reset();
            pool.free_frames.push_back(frame_id);
        }

        if !self.disk_scheduler.deallocate_sync(page_id) {
            warn!(page_id, "disk-side deallocation failed");
        }
        true
    }

    /// Write the resident page back if dirty, under the frame's exclusive
    /// latch. `false` when the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> bool {
        let frame = {
            let pool = self.pool.lock();
            match pool.page_table.get(&page_id) {
                Some(&frame_id) => Arc::clone(&self.frames[frame_id as usize]),
                None => return false,
            }
        };

        let image = frame.data.write();
        // The pool latch was released before latching the frame; the page
        // may have been evicted or deleted in between.
        if frame.page_id.load(Ordering::Acquire) != page_id {
            return false;
        }
        if !frame.is_dirty.load(Ordering::Acquire) {
            return true;
        }

        let data = Bytes::copy_from_slice(&image);
        if !self.disk_scheduler.write_page_sync(page_id, data) {
            panic!("write-back of page {} failed", page_id);
        }
        frame.is_dirty.store(false, Ordering::Release);
        true
    }

    /// [`Self::flush_page`] without the frame latch. The caller's own guard
    /// on the page is the exclusion; calling this with no guard held races
    /// with writers.
    pub fn flush_page_unsafe(&self, page_id: PageId) -> bool {
        let pool = self.pool.lock();
        let Some(&frame_id) = pool.page_table.get(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id as usize];
        if !frame.is_dirty.load(Ordering::Acquire) {
            return true;
        }

        // SAFETY: the caller holds a guard on this page, so no writer can
        // mutate the image while it is copied out.
        let data = unsafe { Bytes::copy_from_slice(&*frame.data.data_ptr()) };
        if !self.disk_scheduler.write_page_sync(page_id, data) {
            panic!("write-back of page {} failed", page_id);
        }
        frame.is_dirty.store(false, Ordering::Release);
        true
    }

    /// Flush every dirty resident page. Targets are collected under the pool
    /// latch, then each page is written under its own frame latch so the
    /// pool latch is never held across I/O.
    pub fn flush_all(&self) {
        let targets: Vec<(PageId, Arc<FrameHeader>)> = {
            let pool = self.pool.lock();
            pool.page_table
                .iter()
                .map(|(&page_id, &frame_id)| (page_id, Arc::clone(&self.frames[frame_id as usize])))
                .collect()
        };

        for (page_id, frame) in targets {
            let image = frame.data.write();
            if frame.page_id.load(Ordering::Acquire) != page_id {
                continue;
            }
            if !frame.is_dirty.load(Ordering::Acquire) {
                continue;
            }
            let data = Bytes::copy_from_slice(&image);
            if !self.disk_scheduler.write_page_sync(page_id, data) {
                panic!("write-back of page {} failed", page_id);
            }
            frame.is_dirty.store(false, Ordering::Release);
        }
    }

    /// [`Self::flush_all`] holding only the pool latch, trusting callers to
    /// have quiesced writers.
    pub fn flush_all_unsafe(&self) {
        let pool = self.pool.lock();
        for (&page_id, &frame_id) in pool.page_table.iter() {
            let frame = &self.frames[frame_id as usize];
            if !frame.is_dirty.load(Ordering::Acquire) {
                continue;
            }
            // SAFETY: as in `flush_page_unsafe`, exclusion is the caller's
            // obligation.
            let data = unsafe { Bytes::copy_from_slice(&*frame.data.data_ptr()) };
            if !self.disk_scheduler.write_page_sync(page_id, data) {
                panic!("write-back of page {} failed", page_id);
            }
            frame.is_dirty.store(false, Ordering::Release);
        }
    }

    /// Pin count of a resident page; `None` when not resident. Test hook.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<usize> {
        let pool = self.pool.lock();
        let &frame_id = pool.page_table.get(&page_id)?;
        Some(self.frames[frame_id as usize].pin_count())
    }

    /// Resolve `page_id` to a resident frame, bringing it in from disk on a
    /// miss. Runs entirely under the pool latch; the only I/O issued here
    /// targets a frame with zero pins, so no guard holder can be blocked by
    /// it.
    fn frame_for_page(&self, pool: &mut PoolState, page_id: PageId) -> Option<Arc<FrameHeader>> {
        if let Some(&frame_id) = pool.page_table.get(&page_id) {
            self.replacer.record_access(frame_id, AccessType::Unknown);
            return Some(Arc::clone(&self.frames[frame_id as usize]));
        }

        let frame_id = match pool.free_frames.pop_front() {
            Some(frame_id) => frame_id,
            None => self.evict_frame(pool)?,
        };

        let frame = &self.frames[frame_id as usize];
        frame.reset();
        self.read_in(page_id, Arc::clone(&frame.data));
        frame.page_id.store(page_id, Ordering::Release);

        pool.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id, AccessType::Unknown);
        self.replacer.set_evictable(frame_id, false);

        Some(Arc::clone(frame))
    }

    /// Ask the replacer for a victim, write it back if dirty, and drop its
    /// mapping. The returned frame is unmapped and unpinned.
    fn evict_frame(&self, pool: &mut PoolState) -> Option<FrameId> {
        let frame_id = self.replacer.evict()?;
        let frame = &self.frames[frame_id as usize];

        let old_page_id = frame.page_id.load(Ordering::Acquire);
        if old_page_id != INVALID_PAGE_ID {
            if frame.is_dirty.load(Ordering::Acquire) {
                let data = Bytes::copy_from_slice(&frame.data.read());
                if !self.disk_scheduler.write_page_sync(old_page_id, data) {
                    // The only up-to-date copy of the page is about to be
                    // overwritten; there is no recovering from losing it.
                    panic!("write-back of evicted page {} failed", old_page_id);
                }
                frame.is_dirty.store(false, Ordering::Release);
            }
            pool.page_table.remove(&old_page_id);
            debug!(frame_id, page_id = old_page_id, "evicted page");
        }

        Some(frame_id)
    }

    fn read_in(&self, page_id: PageId, buf: PageBuffer) {
        if !self.disk_scheduler.read_page_sync(page_id, buf) {
            // The target frame is already unmapped; failing the fetch here
            // would leak it, and the caller cannot repair a torn image.
            panic!("read of page {} failed", page_id);
        }
    }
}
