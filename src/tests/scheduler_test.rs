#[cfg(test)]
pub mod test {
    use std::sync::Arc;

    use bytes::Bytes;
    use parking_lot::{Mutex, RwLock};
    use tempfile::TempDir;

    use crate::storage::{
        disk::{
            manager::Manager,
            scheduler::{DiskRequest, DiskScheduler},
        },
        page::page::page_constants::PAGE_SIZE,
    };

    fn scheduler() -> (TempDir, Arc<Mutex<Manager>>, DiskScheduler) {
        let dir = TempDir::new().unwrap();
        let manager = Arc::new(Mutex::new(
            Manager::open(dir.path().join("pages.db")).unwrap(),
        ));
        let scheduler = DiskScheduler::new(Arc::clone(&manager));
        (dir, manager, scheduler)
    }

    #[test]
    fn write_then_read_round_trip() {
        let (_dir, _manager, scheduler) = scheduler();

        let data = [5u8; PAGE_SIZE];

        let (done, wait) = DiskScheduler::create_promise();
        scheduler.schedule(DiskRequest::Write {
            page_id: 0,
            data: Bytes::copy_from_slice(&data),
            done,
        });
        assert!(wait.recv().unwrap());

        let buffer = Arc::new(RwLock::new(vec![0u8; PAGE_SIZE].into_boxed_slice()));
        let (done, wait) = DiskScheduler::create_promise();
        scheduler.schedule(DiskRequest::Read {
            page_id: 0,
            buf: Arc::clone(&buffer),
            done,
        });
        assert!(wait.recv().unwrap());

        assert_eq!(&buffer.read()[..], &data[..], "page read mismatch");
    }

    #[test]
    fn requests_complete_in_submission_order() {
        let (_dir, manager, scheduler) = scheduler();

        // Two writes to the same page: the later one must win.
        let first = Bytes::from(vec![1u8; PAGE_SIZE]);
        let second = Bytes::from(vec![2u8; PAGE_SIZE]);

        let (done_a, wait_a) = DiskScheduler::create_promise();
        let (done_b, wait_b) = DiskScheduler::create_promise();
        scheduler.schedule(DiskRequest::Write {
            page_id: 3,
            data: first,
            done: done_a,
        });
        scheduler.schedule(DiskRequest::Write {
            page_id: 3,
            data: second,
            done: done_b,
        });
        assert!(wait_a.recv().unwrap());
        assert!(wait_b.recv().unwrap());

        let mut buffer = [0u8; PAGE_SIZE];
        manager.lock().read_page(3, &mut buffer).unwrap();
        assert_eq!(buffer, [2u8; PAGE_SIZE]);
    }

    #[test]
    fn deallocate_releases_the_slot() {
        let (_dir, _manager, scheduler) = scheduler();

        assert!(scheduler.write_page_sync(7, Bytes::from(vec![9u8; PAGE_SIZE])));
        assert!(scheduler.deallocate_sync(7));

        // The page reads back as fresh.
        let buffer = Arc::new(RwLock::new(vec![0xAAu8; PAGE_SIZE].into_boxed_slice()));
        assert!(scheduler.read_page_sync(7, Arc::clone(&buffer)));
        assert!(buffer.read().iter().all(|&b| b == 0));
    }

    #[test]
    fn drop_drains_queued_requests() {
        let (_dir, manager, scheduler) = scheduler();

        let receipts: Vec<_> = (0u32..8)
            .map(|page_id| {
                let (done, wait) = DiskScheduler::create_promise();
                scheduler.schedule(DiskRequest::Write {
                    page_id,
                    data: Bytes::from(vec![page_id as u8 + 1; PAGE_SIZE]),
                    done,
                });
                wait
            })
            .collect();

        drop(scheduler);

        // The worker finished everything ahead of the shutdown marker.
        for wait in receipts {
            assert!(wait.recv().unwrap());
        }
        assert_eq!(manager.lock().num_writes(), 8);
    }
}
