use std::io;
use std::path::Path;

/// [Capability Trait] 随机读取能力
///
/// 对应场景：BufferedChannel 读路径中，已经 flush 到文件的那部分数据。
/// 核心特性：
/// 1. `read_at` 是无状态的（不改变文件游标），支持多线程并发读取。
/// 2. 类似于 Unix 的 `pread`。offset 位于文件末尾或之后时返回 `Ok(0)`。
pub trait RandomAccessFile: Send + Sync {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
    fn len(&self) -> io::Result<u64>;
}

/// [Capability Trait] 顺序写入能力
///
/// 对应场景：BufferedChannel 的 flush 路径。
/// 核心特性：
/// 1. 继承 `std::io::Write`，`write` 返回实际接受的字节数。
/// 2. `position` 返回已经写入的字节数（下一次追加的位置）。
/// 3. 提供 `sync` (fsync) 确保数据落盘，`metadata == true` 时连同元数据一起落盘。
/// 4. `close` 只会被调用一次。
pub trait WritableFile: io::Write + Send + Sync {
    fn position(&self) -> io::Result<u64>;
    fn sync(&mut self, metadata: bool) -> io::Result<()>;
    fn close(&mut self) -> io::Result<()>;
}

/// [Composite Trait] 全能存储对象
///
/// BufferedChannel 底层的文件：既需要追加写，也需要随机读。
pub trait Storage: RandomAccessFile + WritableFile {}

// --- Boilerplate: 动态分发 (Dynamic Dispatch) 适配 ---
//
// Box<dyn Storage> 不会自动实现 Storage，需要手动把调用转发给内部对象 (**self)，
// 这样 BufferedChannel<Box<dyn Storage>> 才能正常工作。

impl RandomAccessFile for Box<dyn Storage> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(buf, offset)
    }
    fn len(&self) -> io::Result<u64> {
        (**self).len()
    }
}

impl WritableFile for Box<dyn Storage> {
    fn position(&self) -> io::Result<u64> {
        (**self).position()
    }
    fn sync(&mut self, metadata: bool) -> io::Result<()> {
        (**self).sync(metadata)
    }
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

impl Storage for Box<dyn Storage> {}

/// [Factory Trait] 文件系统抽象
///
/// 文件怎么打开不属于 channel 的职责，这里只给 binary 和测试用。
/// 可以注入 `MemFileSystem` 进行纯内存测试。
pub trait FileSystem: Send + Sync {
    /// 打开已有文件，追加游标位于文件末尾
    fn open_file(&self, path: &Path) -> io::Result<Box<dyn Storage>>;
    /// 创建（或截断）文件
    fn create_file(&self, path: &Path) -> io::Result<Box<dyn Storage>>;
    fn exists(&self, path: &Path) -> bool;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    fn metadata(&self, path: &Path) -> io::Result<FileMetadata>;
}

#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub len: u64,
    pub is_file: bool,
}
