use super::traits::{FileMetadata, FileSystem, RandomAccessFile, Storage, WritableFile};
use parking_lot::RwLock;
use std::cmp;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// --- In-Memory File (For Testing) ---

/// 内存文件。
///
/// 内容放在 `Arc<RwLock<Vec<u8>>>` 里，clone 出来的句柄共享同一份数据，
/// 测试可以在 channel 之外直接检查"磁盘"上的内容。
#[derive(Clone, Default)]
pub struct MemFile {
    data: Arc<RwLock<Vec<u8>>>,
    closed: bool,
}

impl MemFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以已有内容构造，追加游标位于末尾
    pub fn with_contents(contents: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(contents)),
            closed: false,
        }
    }

    /// 当前文件内容的快照
    pub fn contents(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    fn check_open(&self) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "file is closed"));
        }
        Ok(())
    }
}

impl RandomAccessFile for MemFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.check_open()?;
        let guard = self.data.read();
        let start = offset as usize;
        if start >= guard.len() {
            return Ok(0);
        }
        let end = cmp::min(start + buf.len(), guard.len());
        let n = end - start;
        buf[..n].copy_from_slice(&guard[start..end]);
        Ok(n)
    }
    fn len(&self) -> io::Result<u64> {
        Ok(self.data.read().len() as u64)
    }
}

impl Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_open()?;
        self.data.write().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl WritableFile for MemFile {
    fn position(&self) -> io::Result<u64> {
        self.check_open()?;
        Ok(self.data.read().len() as u64)
    }
    fn sync(&mut self, _metadata: bool) -> io::Result<()> {
        self.check_open() // 内存操作不需要 sync
    }
    fn close(&mut self) -> io::Result<()> {
        self.check_open()?;
        self.closed = true;
        Ok(())
    }
}

impl Storage for MemFile {}

// --- In-Memory File System (For Testing) ---

#[derive(Clone, Default)]
pub struct MemFileSystem {
    // Path -> File Content
    files: Arc<RwLock<HashMap<PathBuf, MemFile>>>,
}

impl MemFileSystem {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileSystem for MemFileSystem {
    fn open_file(&self, path: &Path) -> io::Result<Box<dyn Storage>> {
        let guard = self.files.read();
        let file = guard
            .get(path)
            .ok_or(io::Error::new(io::ErrorKind::NotFound, "File not found"))?;
        Ok(Box::new(MemFile {
            data: file.data.clone(),
            closed: false,
        }))
    }
    fn create_file(&self, path: &Path) -> io::Result<Box<dyn Storage>> {
        let file = MemFile::new();
        self.files.write().insert(path.to_path_buf(), file.clone());
        Ok(Box::new(file))
    }
    fn exists(&self, path: &Path) -> bool {
        self.files.read().contains_key(path)
    }
    fn create_dir_all(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }
    fn metadata(&self, path: &Path) -> io::Result<FileMetadata> {
        let guard = self.files.read();
        let file = guard
            .get(path)
            .ok_or(io::Error::new(io::ErrorKind::NotFound, "File not found"))?;
        Ok(FileMetadata {
            len: file.data.read().len() as u64,
            is_file: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_contents_between_handles() {
        let fs = MemFileSystem::new();
        let path = Path::new("ledgers/0001.log");
        let mut writer = fs.create_file(path).unwrap();
        writer.write_all(b"entry-1").unwrap();

        let reader = fs.open_file(path).unwrap();
        assert_eq!(reader.position().unwrap(), 7);
        let mut buf = [0u8; 5];
        assert_eq!(reader.read_at(&mut buf, 2).unwrap(), 5);
        assert_eq!(&buf, b"try-1");
        assert_eq!(fs.metadata(path).unwrap().len, 7);
    }

    #[test]
    fn test_read_at_past_end_returns_zero() {
        let file = MemFile::with_contents(b"abc".to_vec());
        let mut buf = [0u8; 4];
        assert_eq!(file.read_at(&mut buf, 3).unwrap(), 0);
        assert_eq!(file.read_at(&mut buf, 1).unwrap(), 2);
    }

    #[test]
    fn test_missing_file() {
        let fs = MemFileSystem::new();
        assert!(!fs.exists(Path::new("nope")));
        assert!(fs.open_file(Path::new("nope")).is_err());
    }

    #[test]
    fn test_close_twice_fails() {
        let mut file = MemFile::new();
        file.close().unwrap();
        assert!(file.close().is_err());
        assert!(file.write(b"x").is_err());
    }
}
