//! Disk Manager - low-level file I/O for database pages.
//!
//! The [`DiskManager`] handles all direct file operations:
//! - Reading and writing pages
//! - Allocating new pages
//! - Truncating the file during recovery
//!
//! It is also the [`CacheSource`] of the page store: cache misses read a
//! page from here and evictions write dirty pages back.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use crate::buffer::CacheSource;
use crate::common::config::PAGE_SIZE;
use crate::common::{Error, PageId, Result};
use crate::storage::page::Page;

/// Manages disk I/O for a single page file.
///
/// # File Layout
/// Pages are laid out sequentially and numbered from 1:
/// ```text
/// ┌─────────┬─────────┬─────────┬─────────┐
/// │ Page 1  │ Page 2  │  ...    │ Page N  │
/// │ (8KB)   │ (8KB)   │         │ (8KB)   │
/// └─────────┴─────────┴─────────┴─────────┘
/// Offset:  0      8192    ...   (N-1)×8192
/// ```
///
/// # Thread Safety
/// - Reads take the file lock shared and use positional reads, so
///   readers of different pages proceed in parallel
/// - Writes, allocation and truncation take it exclusively
///
/// # Durability
/// Every write is followed by `fsync()`.
pub struct DiskManager {
    file: RwLock<File>,
    /// Number of pages in the file.
    page_count: AtomicU32,
    path: PathBuf,
}

impl DiskManager {
    /// Create a new page file.
    ///
    /// # Errors
    /// Returns `Error::FileExists` if the file already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| Error::from_open(path, e))?;

        Ok(Self {
            file: RwLock::new(file),
            page_count: AtomicU32::new(0),
            path: path.to_path_buf(),
        })
    }

    /// Open an existing page file.
    ///
    /// # Errors
    /// Returns `Error::FileNotExists` if the file doesn't exist, or
    /// `Error::FileCannotRW` if it cannot be opened for read/write.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::from_open(path, e))?;

        // Calculate page count from file size
        let file_size = file.metadata()?.len();
        let page_count = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self {
            file: RwLock::new(file),
            page_count: AtomicU32::new(page_count),
            path: path.to_path_buf(),
        })
    }

    /// Read a page from disk.
    ///
    /// # Errors
    /// Returns `Error::PageNotFound` if the page doesn't exist.
    pub fn read_page(&self, page_id: PageId) -> Result<Page> {
        let file = self.file.read();
        self.check_bounds(page_id)?;

        let mut buf = vec![0u8; PAGE_SIZE].into_boxed_slice();
        read_exact_at(&file, &mut buf, page_id.file_offset())?;

        Ok(Page::from_bytes(page_id, buf))
    }

    /// Write page bytes to disk.
    ///
    /// The page must have been previously allocated with `allocate_page()`.
    ///
    /// # Errors
    /// Returns `Error::PageNotFound` if the page hasn't been allocated.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        let mut file = self.file.write();
        self.check_bounds(page_id)?;

        file.seek(SeekFrom::Start(page_id.file_offset()))?;
        file.write_all(&data[..PAGE_SIZE])?;
        file.sync_all()?; // fsync for durability

        Ok(())
    }

    /// Write `page` through to disk and clear its dirty flag.
    pub fn flush(&self, page: &Page) -> Result<()> {
        let data = page.read();
        self.write_page(page.page_id(), &data)?;
        page.clear_dirty();
        Ok(())
    }

    /// Append a new page initialized with `init` (zero-padded to a page).
    ///
    /// The page is written through to disk before its number is returned.
    pub fn allocate_page(&self, init: &[u8]) -> Result<PageId> {
        let mut file = self.file.write();
        let page_id = PageId::new(self.page_count.load(Ordering::Acquire) + 1);

        let mut buf = vec![0u8; PAGE_SIZE];
        let len = init.len().min(PAGE_SIZE);
        buf[..len].copy_from_slice(&init[..len]);

        file.seek(SeekFrom::Start(page_id.file_offset()))?;
        file.write_all(&buf)?;
        file.sync_all()?;

        self.page_count.store(page_id.0, Ordering::Release);
        debug!(page_id = page_id.0, "disk.allocate");
        Ok(page_id)
    }

    /// Drop every page numbered above `max_page`.
    pub fn truncate(&self, max_page: u32) -> Result<()> {
        let file = self.file.write();
        file.set_len(max_page as u64 * PAGE_SIZE as u64)?;
        file.sync_all()?;
        self.page_count.store(max_page, Ordering::Release);
        debug!(max_page, "disk.truncate");
        Ok(())
    }

    /// Force buffered file metadata to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    /// Get the number of pages in the file.
    #[inline]
    pub fn page_count(&self) -> u32 {
        self.page_count.load(Ordering::Acquire)
    }

    /// Get the total size of the page file in bytes.
    #[inline]
    pub fn file_size(&self) -> u64 {
        self.page_count() as u64 * PAGE_SIZE as u64
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_bounds(&self, page_id: PageId) -> Result<()> {
        if !page_id.is_valid() || page_id.0 > self.page_count() {
            return Err(Error::PageNotFound(page_id.0));
        }
        Ok(())
    }
}

impl CacheSource for DiskManager {
    type Item = Page;

    fn load(&self, key: u64) -> Result<Page> {
        self.read_page(PageId::new(key as u32))
    }

    fn evict(&self, _key: u64, page: &Page) -> Result<()> {
        if page.is_dirty() {
            self.flush(page)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
