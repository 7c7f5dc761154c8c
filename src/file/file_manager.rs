use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::{FileError, FileResult};
use super::{PageId, PAGE_SIZE};

/// Handle to an open paged file.
///
/// A handle is bound to exactly one file at a time and owns the OS file
/// descriptor while bound. It keeps three monotone counters of page
/// operations performed through it; the counters saturate and never reset.
#[derive(Debug, Default)]
pub struct FileHandle {
    file: Option<File>,
    path: Option<PathBuf>,
    read_page_counter: u32,
    write_page_counter: u32,
    append_page_counter: u32,
}

impl FileHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this handle is currently bound to a file
    pub fn is_bound(&self) -> bool {
        self.file.is_some()
    }

    fn file_mut(&mut self) -> FileResult<&mut File> {
        self.file.as_mut().ok_or(FileError::HandleUnbound)
    }

    /// Read page `page_num` into `buffer` (exactly one page of bytes)
    pub fn read_page(&mut self, page_num: PageId, buffer: &mut [u8]) -> FileResult<()> {
        if buffer.len() != PAGE_SIZE {
            return Err(FileError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: buffer.len(),
            });
        }

        let page_count = self.page_count()?;
        if page_num >= page_count {
            return Err(FileError::PageOutOfRange {
                page_num,
                page_count,
            });
        }

        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(page_num as u64 * PAGE_SIZE as u64))?;
        file.read_exact(buffer)?;

        self.read_page_counter = self.read_page_counter.saturating_add(1);
        Ok(())
    }

    /// Write `buffer` (exactly one page of bytes) to page `page_num`
    pub fn write_page(&mut self, page_num: PageId, buffer: &[u8]) -> FileResult<()> {
        if buffer.len() != PAGE_SIZE {
            return Err(FileError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: buffer.len(),
            });
        }

        let page_count = self.page_count()?;
        if page_num >= page_count {
            return Err(FileError::PageOutOfRange {
                page_num,
                page_count,
            });
        }

        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(page_num as u64 * PAGE_SIZE as u64))?;
        file.write_all(buffer)?;

        self.write_page_counter = self.write_page_counter.saturating_add(1);
        Ok(())
    }

    /// Append `buffer` as a new page at the end of the file.
    /// The new page's number is `page_count() - 1` after this returns.
    pub fn append_page(&mut self, buffer: &[u8]) -> FileResult<()> {
        if buffer.len() != PAGE_SIZE {
            return Err(FileError::InvalidPageSize {
                expected: PAGE_SIZE,
                actual: buffer.len(),
            });
        }

        let file = self.file_mut()?;
        file.seek(SeekFrom::End(0))?;
        file.write_all(buffer)?;

        self.append_page_counter = self.append_page_counter.saturating_add(1);
        Ok(())
    }

    /// Get the number of pages in the file
    pub fn page_count(&self) -> FileResult<PageId> {
        let file = self.file.as_ref().ok_or(FileError::HandleUnbound)?;
        let file_size = file.metadata()?.len();
        Ok((file_size / PAGE_SIZE as u64) as PageId)
    }

    /// Snapshot the (read, write, append) page counters
    pub fn collect_counter_values(&self) -> (u32, u32, u32) {
        (
            self.read_page_counter,
            self.write_page_counter,
            self.append_page_counter,
        )
    }
}

/// Manages paged file operations.
///
/// Every page operation on a bound handle is a direct file I/O against a
/// fixed offset; there is no buffering layer in between.
pub struct PagedFileManager;

impl PagedFileManager {
    pub fn new() -> Self {
        Self
    }

    /// Create a new file; fails if it already exists
    pub fn create_file<P: AsRef<Path>>(&self, path: P) -> FileResult<()> {
        let path = path.as_ref();

        if path.exists() {
            return Err(FileError::FileAlreadyExists(path.display().to_string()));
        }

        OpenOptions::new().write(true).create_new(true).open(path)?;
        debug!(path = %path.display(), "created paged file");
        Ok(())
    }

    /// Destroy (delete) a file; fails if it does not exist
    pub fn destroy_file<P: AsRef<Path>>(&self, path: P) -> FileResult<()> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(FileError::FileNotFound(path.display().to_string()));
        }

        std::fs::remove_file(path)?;
        debug!(path = %path.display(), "destroyed paged file");
        Ok(())
    }

    /// Bind `handle` to an existing file.
    /// Fails if the handle is already bound or the file does not exist.
    /// Multiple distinct handles on the same file are permitted; callers
    /// must serialise access across handles themselves.
    pub fn open_file<P: AsRef<Path>>(&self, path: P, handle: &mut FileHandle) -> FileResult<()> {
        let path = path.as_ref();

        if let Some(bound) = &handle.path {
            return Err(FileError::HandleAlreadyBound(bound.display().to_string()));
        }

        if !path.exists() {
            return Err(FileError::FileNotFound(path.display().to_string()));
        }

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        handle.file = Some(file);
        handle.path = Some(path.to_path_buf());
        Ok(())
    }

    /// Unbind `handle` from its file, releasing the descriptor.
    /// The counters survive the close.
    pub fn close_file(&self, handle: &mut FileHandle) -> FileResult<()> {
        if handle.file.is_none() {
            return Err(FileError::HandleUnbound);
        }

        handle.file = None;
        handle.path = None;
        Ok(())
    }
}

impl Default for PagedFileManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_dir() -> TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn test_create_file() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let manager = PagedFileManager::new();

        assert!(manager.create_file(&test_file).is_ok());
        assert!(test_file.exists());
    }

    #[test]
    fn test_create_file_already_exists() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        let result = manager.create_file(&test_file);
        assert!(matches!(result, Err(FileError::FileAlreadyExists(_))));
    }

    #[test]
    fn test_open_close_file() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();

        let mut handle = FileHandle::new();
        manager.open_file(&test_file, &mut handle).unwrap();
        assert!(handle.is_bound());

        manager.close_file(&mut handle).unwrap();
        assert!(!handle.is_bound());
    }

    #[test]
    fn test_open_nonexistent_file() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("nonexistent.db");
        let manager = PagedFileManager::new();

        let mut handle = FileHandle::new();
        let result = manager.open_file(&test_file, &mut handle);
        assert!(matches!(result, Err(FileError::FileNotFound(_))));
    }

    #[test]
    fn test_open_already_bound_handle() {
        let temp_dir = setup_test_dir();
        let file_a = temp_dir.path().join("a.db");
        let file_b = temp_dir.path().join("b.db");
        let manager = PagedFileManager::new();

        manager.create_file(&file_a).unwrap();
        manager.create_file(&file_b).unwrap();

        let mut handle = FileHandle::new();
        manager.open_file(&file_a, &mut handle).unwrap();

        let result = manager.open_file(&file_b, &mut handle);
        assert!(matches!(result, Err(FileError::HandleAlreadyBound(_))));
    }

    #[test]
    fn test_close_unbound_handle() {
        let manager = PagedFileManager::new();
        let mut handle = FileHandle::new();

        let result = manager.close_file(&mut handle);
        assert!(matches!(result, Err(FileError::HandleUnbound)));
    }

    #[test]
    fn test_two_handles_on_same_file() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();

        let mut h1 = FileHandle::new();
        let mut h2 = FileHandle::new();
        manager.open_file(&test_file, &mut h1).unwrap();
        manager.open_file(&test_file, &mut h2).unwrap();

        manager.close_file(&mut h1).unwrap();
        manager.close_file(&mut h2).unwrap();
    }

    #[test]
    fn test_append_read_write_page() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        let mut handle = FileHandle::new();
        manager.open_file(&test_file, &mut handle).unwrap();

        let mut page = vec![0u8; PAGE_SIZE];
        page[0] = 42;
        page[100] = 99;
        page[PAGE_SIZE - 1] = 255;

        handle.append_page(&page).unwrap();
        assert_eq!(handle.page_count().unwrap(), 1);

        let mut read_back = vec![0u8; PAGE_SIZE];
        handle.read_page(0, &mut read_back).unwrap();
        assert_eq!(read_back, page);

        page[0] = 7;
        handle.write_page(0, &page).unwrap();
        handle.read_page(0, &mut read_back).unwrap();
        assert_eq!(read_back[0], 7);
    }

    #[test]
    fn test_read_page_out_of_range() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        let mut handle = FileHandle::new();
        manager.open_file(&test_file, &mut handle).unwrap();

        let mut buffer = vec![0u8; PAGE_SIZE];
        let result = handle.read_page(0, &mut buffer);
        assert!(matches!(result, Err(FileError::PageOutOfRange { .. })));

        handle.append_page(&buffer).unwrap();
        assert!(handle.read_page(0, &mut buffer).is_ok());
        let result = handle.read_page(1, &mut buffer);
        assert!(matches!(result, Err(FileError::PageOutOfRange { .. })));
    }

    #[test]
    fn test_write_page_out_of_range() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        let mut handle = FileHandle::new();
        manager.open_file(&test_file, &mut handle).unwrap();

        let buffer = vec![0u8; PAGE_SIZE];
        let result = handle.write_page(0, &buffer);
        assert!(matches!(result, Err(FileError::PageOutOfRange { .. })));
    }

    #[test]
    fn test_invalid_buffer_size() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        let mut handle = FileHandle::new();
        manager.open_file(&test_file, &mut handle).unwrap();

        let mut small = vec![0u8; PAGE_SIZE - 1];
        assert!(matches!(
            handle.read_page(0, &mut small),
            Err(FileError::InvalidPageSize { .. })
        ));

        let large = vec![0u8; PAGE_SIZE + 1];
        assert!(matches!(
            handle.append_page(&large),
            Err(FileError::InvalidPageSize { .. })
        ));
    }

    #[test]
    fn test_counters_increment() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        let mut handle = FileHandle::new();
        manager.open_file(&test_file, &mut handle).unwrap();

        assert_eq!(handle.collect_counter_values(), (0, 0, 0));

        let mut buffer = vec![0u8; PAGE_SIZE];
        handle.append_page(&buffer).unwrap();
        handle.append_page(&buffer).unwrap();
        assert_eq!(handle.collect_counter_values(), (0, 0, 2));

        handle.read_page(0, &mut buffer).unwrap();
        assert_eq!(handle.collect_counter_values(), (1, 0, 2));

        handle.write_page(1, &buffer).unwrap();
        assert_eq!(handle.collect_counter_values(), (1, 1, 2));

        // Failed operations do not bump counters
        let _ = handle.read_page(10, &mut buffer);
        assert_eq!(handle.collect_counter_values(), (1, 1, 2));
    }

    #[test]
    fn test_counters_survive_close() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        let mut handle = FileHandle::new();
        manager.open_file(&test_file, &mut handle).unwrap();

        let buffer = vec![0u8; PAGE_SIZE];
        handle.append_page(&buffer).unwrap();
        manager.close_file(&mut handle).unwrap();

        assert_eq!(handle.collect_counter_values(), (0, 0, 1));
    }

    #[test]
    fn test_page_count_across_handles() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();

        let mut writer = FileHandle::new();
        manager.open_file(&test_file, &mut writer).unwrap();
        let buffer = vec![0u8; PAGE_SIZE];
        for _ in 0..5 {
            writer.append_page(&buffer).unwrap();
        }
        manager.close_file(&mut writer).unwrap();

        let mut reader = FileHandle::new();
        manager.open_file(&test_file, &mut reader).unwrap();
        assert_eq!(reader.page_count().unwrap(), 5);
    }

    #[test]
    fn test_destroy_file() {
        let temp_dir = setup_test_dir();
        let test_file = temp_dir.path().join("test.db");
        let manager = PagedFileManager::new();

        manager.create_file(&test_file).unwrap();
        manager.destroy_file(&test_file).unwrap();
        assert!(!test_file.exists());

        let result = manager.destroy_file(&test_file);
        assert!(matches!(result, Err(FileError::FileNotFound(_))));
    }
}
