use std::{
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{error, warn};

use super::manager::Manager;
use crate::storage::page::page::PageId;

/// Shared handle to a frame's page image. Read requests carry one so the
/// worker can fill the buffer in place.
pub type PageBuffer = Arc<RwLock<Box<[u8]>>>;

/// A single disk operation plus the completion slot its issuer is waiting
/// on. The worker reports success or failure by sending a boolean through
/// `done`; manager-level errors never unwind out of the worker.
pub enum DiskRequest {
    Read {
        page_id: PageId,
        buf: PageBuffer,
        done: Sender<bool>,
    },
    Write {
        page_id: PageId,
        data: Bytes,
        done: Sender<bool>,
    },
    Deallocate {
        page_id: PageId,
        done: Sender<bool>,
    },
}

/// Feeds disk requests to a single worker thread through an mpsc queue.
/// Requests complete in submission order. Dropping the scheduler enqueues an
/// end-of-stream marker; the worker drains everything before it and exits.
pub struct DiskScheduler {
    request_tx: Mutex<Sender<Option<DiskRequest>>>,
    worker: Option<JoinHandle<()>>,
    manager: Arc<Mutex<Manager>>,
}

impl DiskScheduler {
    pub fn new(manager: Arc<Mutex<Manager>>) -> Self {
        let (request_tx, request_rx) = mpsc::channel();
        let worker_manager = Arc::clone(&manager);
        let worker = thread::Builder::new()
            .name("disk-scheduler".into())
            .spawn(move || Self::run_worker(worker_manager, request_rx))
            .expect("failed to spawn disk worker");

        DiskScheduler {
            request_tx: Mutex::new(request_tx),
            worker: Some(worker),
            manager,
        }
    }

    /// Channel pair used as the completion slot of a request: hand the
    /// sender to the request, block on the receiver.
    pub fn create_promise() -> (Sender<bool>, Receiver<bool>) {
        mpsc::channel()
    }

    pub fn schedule(&self, request: DiskRequest) {
        self.request_tx
            .lock()
            .send(Some(request))
            .expect("disk worker has shut down");
    }

    /// Synchronously persist `data` as the image of `page_id`.
    pub fn write_page_sync(&self, page_id: PageId, data: Bytes) -> bool {
        let (done, wait) = Self::create_promise();
        self.schedule(DiskRequest::Write {
            page_id,
            data,
            done,
        });
        wait.recv().unwrap_or(false)
    }

    /// Synchronously populate `buf` with the on-disk image of `page_id`.
    pub fn read_page_sync(&self, page_id: PageId, buf: PageBuffer) -> bool {
        let (done, wait) = Self::create_promise();
        self.schedule(DiskRequest::Read { page_id, buf, done });
        wait.recv().unwrap_or(false)
    }

    /// Synchronously release the on-disk storage of `page_id`.
    pub fn deallocate_sync(&self, page_id: PageId) -> bool {
        let (done, wait) = Self::create_promise();
        self.schedule(DiskRequest::Deallocate { page_id, done });
        wait.recv().unwrap_or(false)
    }

    pub fn manager(&self) -> &Arc<Mutex<Manager>> {
        &self.manager
    }

    fn run_worker(manager: Arc<Mutex<Manager>>, request_rx: Receiver<Option<DiskRequest>>) {
        // A None marker or a closed channel both end the loop.
        while let Ok(Some(request)) = request_rx.recv() {
            let (page_id, done, outcome) = match request {
                DiskRequest::Read { page_id, buf, done } => {
                    let mut image = buf.write();
                    let outcome = manager.lock().read_page(page_id, &mut image);
                    (page_id, done, outcome)
                }
                DiskRequest::Write {
                    page_id,
                    data,
                    done,
                } => {
                    let outcome = manager.lock().write_page(page_id, &data);
                    (page_id, done, outcome)
                }
                DiskRequest::Deallocate { page_id, done } => {
                    let outcome = manager.lock().deallocate_page(page_id);
                    (page_id, done, outcome)
                }
            };

            let ok = match outcome {
                Ok(()) => true,
                Err(err) => {
                    error!(page_id, %err, "disk request failed");
                    false
                }
            };

            // The issuer may have stopped waiting; that is not the worker's
            // problem.
            let _ = done.send(ok);
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        let _ = self.request_tx.lock().send(None);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("disk worker exited abnormally");
            }
        }
    }
}
