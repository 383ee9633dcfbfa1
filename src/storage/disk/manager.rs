use std::{
    collections::{HashMap, VecDeque},
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::debug;

use crate::storage::page::page::{page_constants::PAGE_SIZE, PageId};

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("failed to open database file {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("I/O error on page {page_id}: {source}")]
    Io {
        page_id: PageId,
        source: std::io::Error,
    },

    #[error("buffer of {len} bytes does not hold a full page")]
    ShortBuffer { len: usize },
}

pub type DiskResult<T> = Result<T, DiskError>;

/// Owns the database file and the mapping from page ids to file offsets.
///
/// Page ids are handed out by the buffer pool and grow without bound, so
/// offsets are assigned lazily on first write. Slots freed by deallocation
/// are recycled before the file grows. A page that was never written has no
/// slot; reading it yields a zeroed image.
pub struct Manager {
    db_io: File,
    db_path: PathBuf,

    page_offsets: HashMap<PageId, u64>,
    free_slots: VecDeque<u64>,
    next_offset: u64,

    num_reads: u64,
    num_writes: u64,
    num_deallocs: u64,
}

impl Manager {
    pub fn open(path: impl AsRef<Path>) -> DiskResult<Self> {
        let path = path.as_ref();
        let db_io = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|source| DiskError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Manager {
            db_io,
            db_path: path.to_path_buf(),
            page_offsets: HashMap::new(),
            free_slots: VecDeque::new(),
            next_offset: 0,
            num_reads: 0,
            num_writes: 0,
            num_deallocs: 0,
        })
    }

    pub fn write_page(&mut self, page_id: PageId, page_data: &[u8]) -> DiskResult<()> {
        if page_data.len() < PAGE_SIZE {
            return Err(DiskError::ShortBuffer {
                len: page_data.len(),
            });
        }

        let offset = self.slot_for(page_id);

        self.db_io
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.db_io.write_all(&page_data[..PAGE_SIZE]))
            .and_then(|_| self.db_io.flush())
            .map_err(|source| DiskError::Io { page_id, source })?;

        self.num_writes += 1;
        Ok(())
    }

    pub fn read_page(&mut self, page_id: PageId, page_data: &mut [u8]) -> DiskResult<()> {
        if page_data.len() < PAGE_SIZE {
            return Err(DiskError::ShortBuffer {
                len: page_data.len(),
            });
        }

        match self.page_offsets.get(&page_id) {
            Some(&offset) => {
                self.db_io
                    .seek(SeekFrom::Start(offset))
                    .and_then(|_| self.db_io.read_exact(&mut page_data[..PAGE_SIZE]))
                    .map_err(|source| DiskError::Io { page_id, source })?;
                self.num_reads += 1;
            }
            None => {
                // Never written: a fresh page reads as all zeroes.
                page_data[..PAGE_SIZE].fill(0);
            }
        }
        Ok(())
    }

    pub fn deallocate_page(&mut self, page_id: PageId) -> DiskResult<()> {
        if let Some(offset) = self.page_offsets.remove(&page_id) {
            self.free_slots.push_back(offset);
            self.num_deallocs += 1;
            debug!(page_id, offset, "released page slot");
        }
        Ok(())
    }

    /// Offset of the page's slot, assigning one on first write.
    fn slot_for(&mut self, page_id: PageId) -> u64 {
        if let Some(&offset) = self.page_offsets.get(&page_id) {
            return offset;
        }
        let offset = self.free_slots.pop_front().unwrap_or_else(|| {
            let offset = self.next_offset;
            self.next_offset += PAGE_SIZE as u64;
            offset
        });
        self.page_offsets.insert(page_id, offset);
        offset
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn num_reads(&self) -> u64 {
        self.num_reads
    }

    pub fn num_writes(&self) -> u64 {
        self.num_writes
    }

    pub fn num_deallocs(&self) -> u64 {
        self.num_deallocs
    }
}
