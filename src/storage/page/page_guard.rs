use std::sync::{atomic::Ordering, Arc};

use bytes::Bytes;
use parking_lot::{
    lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard},
    Mutex, RawRwLock,
};

use crate::{
    buffer::buffer_pool_manager::{FrameHeader, PoolState},
    storage::{disk::scheduler::DiskScheduler, page::page::PageId},
    utils::replacer::{LRUKReplacer, Replacer},
};

type ImageReadGuard = ArcRwLockReadGuard<RawRwLock, Box<[u8]>>;
type ImageWriteGuard = ArcRwLockWriteGuard<RawRwLock, Box<[u8]>>;

/// Shared handle to a pinned, latched page.
///
/// Holding the guard keeps the page resident: the frame latch is held in
/// shared mode and the pin count stays above zero, so the replacer never
/// sees the frame as a victim. Both are released when the guard drops.
///
/// Guards are move-only; ownership may be transferred between scopes but
/// never duplicated, and the release steps run exactly once.
pub struct ReadPageGuard {
    page_id: PageId,
    frame: Arc<FrameHeader>,
    replacer: Arc<LRUKReplacer>,
    pool_latch: Arc<Mutex<PoolState>>,
    disk_scheduler: Arc<DiskScheduler>,
    // Option only so Drop can release the frame latch before touching the
    // pool latch.
    latch: Option<ImageReadGuard>,
}

impl ReadPageGuard {
    /// The caller must hold the pool latch: the non-evictable mark below
    /// races with the manager's victim selection otherwise.
    pub(crate) fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        replacer: Arc<LRUKReplacer>,
        pool_latch: Arc<Mutex<PoolState>>,
        disk_scheduler: Arc<DiskScheduler>,
    ) -> Self {
        let latch = frame.data.read_arc();
        frame.pin_count.fetch_add(1, Ordering::AcqRel);
        replacer.set_evictable(frame.frame_id, false);

        ReadPageGuard {
            page_id,
            frame,
            replacer,
            pool_latch,
            disk_scheduler,
            latch: Some(latch),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        self.latch.as_ref().expect("read guard already released")
    }

    pub fn is_dirty(&self) -> bool {
        self.frame.is_dirty.load(Ordering::Acquire)
    }

    /// Write the page image back if dirty. The shared latch already excludes
    /// writers, so the copy is consistent.
    pub fn flush(&self) {
        if !self.is_dirty() {
            return;
        }
        let data = Bytes::copy_from_slice(self.data());
        if !self.disk_scheduler.write_page_sync(self.page_id, data) {
            panic!("write-back of page {} failed", self.page_id);
        }
        self.frame.is_dirty.store(false, Ordering::Release);
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        let prev = self.frame.pin_count.fetch_sub(1, Ordering::AcqRel);
        // Frame latch goes first; taking the pool latch while still holding
        // it would invert the manager's lock order.
        drop(self.latch.take());
        if prev == 1 {
            let _pool = self.pool_latch.lock();
            // The count may have moved again before the latch was ours; new
            // pins are only created under the pool latch, so this read is
            // the final word.
            if self.frame.pin_count.load(Ordering::Acquire) == 0 {
                self.replacer.set_evictable(self.frame.frame_id, true);
            }
        }
    }
}

/// Exclusive handle to a pinned, latched page.
///
/// Structurally a [`ReadPageGuard`] with the frame latch held in exclusive
/// mode, which makes mutable access to the image sound.
pub struct WritePageGuard {
    page_id: PageId,
    frame: Arc<FrameHeader>,
    replacer: Arc<LRUKReplacer>,
    pool_latch: Arc<Mutex<PoolState>>,
    disk_scheduler: Arc<DiskScheduler>,
    latch: Option<ImageWriteGuard>,
}

impl WritePageGuard {
    /// Same pool-latch requirement as [`ReadPageGuard::new`].
    pub(crate) fn new(
        page_id: PageId,
        frame: Arc<FrameHeader>,
        replacer: Arc<LRUKReplacer>,
        pool_latch: Arc<Mutex<PoolState>>,
        disk_scheduler: Arc<DiskScheduler>,
    ) -> Self {
        let latch = frame.data.write_arc();
        frame.pin_count.fetch_add(1, Ordering::AcqRel);
        replacer.set_evictable(frame.frame_id, false);

        WritePageGuard {
            page_id,
            frame,
            replacer,
            pool_latch,
            disk_scheduler,
            latch: Some(latch),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        self.latch.as_ref().expect("write guard already released")
    }

    /// Mutable view of the page image. Handing this out is what marks the
    /// frame dirty; a write guard that only ever reads costs no write-back.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.frame.is_dirty.store(true, Ordering::Release);
        self.latch.as_mut().expect("write guard already released")
    }

    pub fn is_dirty(&self) -> bool {
        self.frame.is_dirty.load(Ordering::Acquire)
    }

    pub fn flush(&self) {
        if !self.is_dirty() {
            return;
        }
        let data = Bytes::copy_from_slice(self.data());
        if !self.disk_scheduler.write_page_sync(self.page_id, data) {
            panic!("write-back of page {} failed", self.page_id);
        }
        self.frame.is_dirty.store(false, Ordering::Release);
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        let prev = self.frame.pin_count.fetch_sub(1, Ordering::AcqRel);
        drop(self.latch.take());
        if prev == 1 {
            let _pool = self.pool_latch.lock();
            if self.frame.pin_count.load(Ordering::Acquire) == 0 {
                self.replacer.set_evictable(self.frame.frame_id, true);
            }
        }
    }
}
