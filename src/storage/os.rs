use super::traits::{FileMetadata, FileSystem, RandomAccessFile, Storage, WritableFile};
use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        use std::os::unix::fs::FileExt;
        fn read_at_impl(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
            FileExt::read_at(file, buf, offset)
        }
    } else if #[cfg(windows)] {
        use std::os::windows::fs::FileExt;
        fn read_at_impl(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
            FileExt::seek_read(file, buf, offset)
        }
    } else {
        // 兜底逻辑：在不支持的平台上也能编译通过，但运行时返回错误
        fn read_at_impl(_file: &File, _buf: &mut [u8], _offset: u64) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "Platform not supported"))
        }
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "file is closed")
}

/// 封装 std::fs::File。
///
/// `position` 记录追加游标，`close` 之后句柄被释放，后续调用全部返回错误。
pub struct OsFile {
    inner: Option<File>,
    position: u64,
}

impl OsFile {
    /// 包装一个已经打开的文件，追加游标移动到文件末尾
    pub fn new(mut file: File) -> io::Result<Self> {
        let position = file.seek(SeekFrom::End(0))?;
        Ok(Self {
            inner: Some(file),
            position,
        })
    }

    fn file(&self) -> io::Result<&File> {
        self.inner.as_ref().ok_or_else(closed_error)
    }

    fn file_mut(&mut self) -> io::Result<&mut File> {
        self.inner.as_mut().ok_or_else(closed_error)
    }
}

impl RandomAccessFile for OsFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        read_at_impl(self.file()?, buf, offset)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.file()?.metadata()?.len())
    }
}

impl Write for OsFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file_mut()?.write(buf)?;
        self.position += n as u64;
        Ok(n)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.file_mut()?.flush()
    }
}

impl WritableFile for OsFile {
    fn position(&self) -> io::Result<u64> {
        self.file()?;
        Ok(self.position)
    }

    fn sync(&mut self, metadata: bool) -> io::Result<()> {
        let file = self.file()?;
        if metadata {
            file.sync_all() // <--- 真正的物理落盘指令，连同 inode 元数据
        } else {
            file.sync_data()
        }
    }

    fn close(&mut self) -> io::Result<()> {
        // File 在 drop 时关闭 fd
        self.inner.take().map(drop).ok_or_else(closed_error)
    }
}

impl Storage for OsFile {}

/// 默认的 OS 文件系统实现
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn open_file(&self, path: &Path) -> io::Result<Box<dyn Storage>> {
        let file = File::options().read(true).write(true).open(path)?;
        Ok(Box::new(OsFile::new(file)?))
    }

    fn create_file(&self, path: &Path) -> io::Result<Box<dyn Storage>> {
        let file = File::options()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)?;

        // 创建文件后 sync 父目录，防止断电导致文件丢失 (Dentry loss)
        if let Some(parent) = path.parent() {
            // 忽略目录 sync 错误，某些环境（如只读挂载）可能不允许，但不应阻断流程
            let _ = File::open(parent).and_then(|f| f.sync_all());
        }

        Ok(Box::new(OsFile::new(file)?))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn metadata(&self, path: &Path) -> io::Result<FileMetadata> {
        let meta = std::fs::metadata(path)?;
        Ok(FileMetadata {
            len: meta.len(),
            is_file: meta.is_file(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_write_read_at() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entry.log");
        let fs = OsFileSystem;

        let mut file = fs.create_file(&path).unwrap();
        assert_eq!(file.position().unwrap(), 0);
        assert_eq!(file.write(b"hello world").unwrap(), 11);
        assert_eq!(file.position().unwrap(), 11);
        file.sync(true).unwrap();

        let mut buf = [0u8; 5];
        assert_eq!(file.read_at(&mut buf, 6).unwrap(), 5);
        assert_eq!(&buf, b"world");
        // EOF
        assert_eq!(file.read_at(&mut buf, 11).unwrap(), 0);
        assert!(fs.metadata(&path).unwrap().is_file);
    }

    #[test]
    fn test_reopen_positions_at_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entry.log");
        let fs = OsFileSystem;

        let mut file = fs.create_file(&path).unwrap();
        file.write_all(b"abc").unwrap();
        file.close().unwrap();

        let mut file = fs.open_file(&path).unwrap();
        assert_eq!(file.position().unwrap(), 3);
        file.write_all(b"def").unwrap();
        file.sync(false).unwrap();
        assert_eq!(file.len().unwrap(), 6);
    }

    #[test]
    fn test_use_after_close_fails() {
        let dir = tempdir().unwrap();
        let fs = OsFileSystem;
        let mut file = fs.create_file(&dir.path().join("closed.log")).unwrap();
        file.close().unwrap();

        assert!(file.write(b"x").is_err());
        assert!(file.sync(false).is_err());
        assert!(file.position().is_err());
        assert!(file.close().is_err());
    }
}
