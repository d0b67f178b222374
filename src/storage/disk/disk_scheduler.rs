use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::common::{KeelError, PAGE_SIZE, PageId, Result};

use super::DiskManager;

/// A disk I/O request. Completion is signaled on the request's own channel;
/// reads hand the filled buffer back through it.
pub enum DiskRequest {
    Read {
        page_id: PageId,
        done: Sender<Result<Box<[u8; PAGE_SIZE]>>>,
    },
    Write {
        page_id: PageId,
        data: Box<[u8; PAGE_SIZE]>,
        done: Sender<Result<()>>,
    },
}

/// DiskScheduler funnels page I/O through a single background worker
/// thread. The buffer pool uses the synchronous wrappers, which block on the
/// completion channel; dropping the scheduler closes the queue and joins the
/// worker after it drains.
pub struct DiskScheduler {
    disk_manager: Arc<DiskManager>,
    request_sender: Option<Sender<DiskRequest>>,
    worker_handle: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        let (sender, receiver) = bounded::<DiskRequest>(128);

        let dm = Arc::clone(&disk_manager);
        let worker_handle = thread::spawn(move || Self::run_worker(dm, receiver));

        Self {
            disk_manager,
            request_sender: Some(sender),
            worker_handle: Some(worker_handle),
        }
    }

    /// Queues a request without waiting for it.
    pub fn schedule(&self, request: DiskRequest) -> Result<()> {
        self.request_sender
            .as_ref()
            .expect("scheduler already shut down")
            .send(request)
            .map_err(|e| KeelError::DiskScheduler(format!("failed to queue request: {e}")))
    }

    /// Reads a page and blocks until the worker has filled the buffer.
    pub fn schedule_read_sync(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let (done, wait) = bounded(1);
        self.schedule(DiskRequest::Read { page_id, done })?;

        let page = wait
            .recv()
            .map_err(|e| KeelError::DiskScheduler(format!("worker dropped request: {e}")))??;
        data.copy_from_slice(&page[..]);
        Ok(())
    }

    /// Writes a page and blocks until the worker has flushed it.
    pub fn schedule_write_sync(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE);

        let mut page = Box::new([0u8; PAGE_SIZE]);
        page.copy_from_slice(data);

        let (done, wait) = bounded(1);
        self.schedule(DiskRequest::Write {
            page_id,
            data: page,
            done,
        })?;

        wait.recv()
            .map_err(|e| KeelError::DiskScheduler(format!("worker dropped request: {e}")))?
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    fn run_worker(disk_manager: Arc<DiskManager>, receiver: Receiver<DiskRequest>) {
        // recv fails once every sender is gone; that is the shutdown signal.
        while let Ok(request) = receiver.recv() {
            match request {
                DiskRequest::Read { page_id, done } => {
                    let mut page = Box::new([0u8; PAGE_SIZE]);
                    let result = disk_manager
                        .read_page(page_id, &mut page[..])
                        .map(|()| page);
                    let _ = done.send(result);
                }
                DiskRequest::Write {
                    page_id,
                    data,
                    done,
                } => {
                    let _ = done.send(disk_manager.write_page(page_id, &data[..]));
                }
            }
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.request_sender.take();
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}
