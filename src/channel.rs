//! 带缓冲的顺序写 / 随机读通道。
//!
//! 写入先累积在固定容量的 write buffer 里，满了才一次性交给底层文件；
//! 读取可以落在三个位置中的任意组合：write buffer（尚未 flush）、
//! read cache（可选，缓存最近一次从文件读到的窗口）、底层文件。
//!
//! 三个位置计数器单调不减：
//! - `write_position`：write 接受过的全部字节数（读者眼中的逻辑末尾）
//! - `file_channel_position`：已经 flush 给底层文件的字节数（不一定落盘）
//! - `unpersisted_bytes`：上一次 force 之后 flush 出去的字节数
//!
//! 除了 `clear()` 之外，任何公开操作结束后都满足
//! `write_position == file_channel_position + write_buffer.len()`。

use crate::buffer::BufferPool;
use crate::error::ChannelError;
use crate::storage::{RandomAccessFile, Storage};
use parking_lot::{Mutex, RwLock};
use std::cmp;
use std::io;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOptions {
    /// write buffer 容量，必须大于 0
    pub write_capacity: usize,
    /// read cache 容量，0 表示不启用
    pub read_capacity: usize,
    /// `flush_and_force_write_if_regular_flush` 的 force 阈值
    pub unpersisted_bytes_bound: u64,
}

impl ChannelOptions {
    pub fn new(write_capacity: usize) -> Self {
        Self {
            write_capacity,
            read_capacity: 0,
            unpersisted_bytes_bound: 0,
        }
    }

    pub fn with_read_capacity(mut self, read_capacity: usize) -> Self {
        self.read_capacity = read_capacity;
        self
    }

    pub fn with_unpersisted_bytes_bound(mut self, bound: u64) -> Self {
        self.unpersisted_bytes_bound = bound;
        self
    }
}

/// 写者独占修改的状态：文件、write buffer、三个计数器。
struct WriteState<S> {
    file: S,
    write_buffer: Vec<u8>,
    write_position: u64,
    file_channel_position: u64,
    unpersisted_bytes: u64,
    closed: bool,
}

impl<S: Storage> WriteState<S> {
    fn ensure_open(&self) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        Ok(())
    }

    /// 把整个 write buffer 交给底层文件。
    ///
    /// 写失败时只扣掉文件真正接受了的那部分，计数器和 buffer 保持一致。
    fn flush(&mut self) -> Result<(), ChannelError> {
        if self.write_buffer.is_empty() {
            return Ok(());
        }

        let mut written = 0;
        let result = loop {
            if written == self.write_buffer.len() {
                break Ok(());
            }
            match self.file.write(&self.write_buffer[written..]) {
                Ok(0) => {
                    break Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "underlying file accepted no bytes",
                    ));
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };

        self.write_buffer.drain(..written);
        self.file_channel_position += written as u64;
        self.unpersisted_bytes += written as u64;
        debug!(
            written,
            file_channel_position = self.file_channel_position,
            "flushed write buffer"
        );
        result.map_err(ChannelError::from)
    }

    fn force(&mut self, metadata: bool) -> Result<u64, ChannelError> {
        let position = self.file.position()?;
        self.file.sync(metadata)?;
        self.unpersisted_bytes = 0;
        debug!(position, metadata, "forced file");
        Ok(position)
    }
}

/// 最近一次从文件读到的窗口 `[start, start + buf.len())`。
struct ReadCache {
    buf: Vec<u8>,
    start: Option<u64>,
    capacity: usize,
}

impl ReadCache {
    /// 从 `position` 开始拷贝命中的前缀，返回拷贝的字节数
    fn copy_hit(&self, position: u64, dest: &mut [u8]) -> usize {
        let Some(start) = self.start else {
            return 0;
        };
        if position < start || position - start >= self.buf.len() as u64 {
            return 0;
        }
        let offset = (position - start) as usize;
        let n = cmp::min(self.buf.len() - offset, dest.len());
        dest[..n].copy_from_slice(&self.buf[offset..offset + n]);
        n
    }

    /// 从 `position` 重新填充，最多 `capacity` 字节且不越过 `limit`，至少读到 `min` 字节
    fn refill<F: RandomAccessFile + ?Sized>(
        &mut self,
        file: &F,
        position: u64,
        limit: u64,
        min: usize,
    ) -> Result<(), ChannelError> {
        let want = cmp::min(self.capacity as u64, limit - position) as usize;
        self.start = None;
        self.buf.clear();
        self.buf.resize(want, 0);
        match read_at_least(file, &mut self.buf, position, min) {
            Ok(n) => {
                self.buf.truncate(n);
                self.start = Some(position);
                debug!(position, len = n, "refilled read cache");
                Ok(())
            }
            Err(e) => {
                self.buf.clear();
                Err(e)
            }
        }
    }
}

/// 反复 `read_at` 直到至少读到 `min` 字节；文件提前结束视为 short read
fn read_at_least<F: RandomAccessFile + ?Sized>(
    file: &F,
    buf: &mut [u8],
    position: u64,
    min: usize,
) -> Result<usize, ChannelError> {
    let mut filled = 0;
    while filled < min {
        match file.read_at(&mut buf[filled..], position + filled as u64) {
            Ok(0) => {
                return Err(ChannelError::ShortRead {
                    position,
                    expected: min,
                    actual: filled,
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// 一个写者、多个读者共享的缓冲通道。
///
/// 所有方法都只需要 `&self`，可以放进 `Arc` 在线程间共享：
/// 写操作持有状态的写锁，读操作持有读锁，读者之间互不阻塞
/// （read cache 单独一把 Mutex，只在读文件时使用）。
pub struct BufferedChannel<S: Storage> {
    state: RwLock<WriteState<S>>,
    read_cache: Option<Mutex<ReadCache>>,
    write_capacity: usize,
    unpersisted_bytes_bound: u64,
    pool: Arc<BufferPool>,
}

impl<S: Storage> BufferedChannel<S> {
    /// 只有 write buffer，没有 read cache，每次条件 force 都会执行
    pub fn new(file: S, write_capacity: usize) -> Result<Self, ChannelError> {
        Self::with_options(
            Arc::new(BufferPool::default()),
            file,
            ChannelOptions::new(write_capacity),
        )
    }

    /// 绑定到一个已经打开的文件，逻辑位置从文件现有长度开始（支持重新打开）
    pub fn with_options(
        pool: Arc<BufferPool>,
        file: S,
        options: ChannelOptions,
    ) -> Result<Self, ChannelError> {
        if options.write_capacity == 0 {
            return Err(ChannelError::InvalidArgument(
                "write capacity must be greater than 0".to_string(),
            ));
        }

        let position = file.position()?;
        let write_buffer = pool.acquire(options.write_capacity);
        let read_cache = (options.read_capacity > 0).then(|| {
            Mutex::new(ReadCache {
                buf: pool.acquire(options.read_capacity),
                start: None,
                capacity: options.read_capacity,
            })
        });

        info!(
            position,
            write_capacity = options.write_capacity,
            read_capacity = options.read_capacity,
            unpersisted_bytes_bound = options.unpersisted_bytes_bound,
            "opened buffered channel"
        );

        Ok(Self {
            state: RwLock::new(WriteState {
                file,
                write_buffer,
                write_position: position,
                file_channel_position: position,
                unpersisted_bytes: 0,
                closed: false,
            }),
            read_cache,
            write_capacity: options.write_capacity,
            unpersisted_bytes_bound: options.unpersisted_bytes_bound,
            pool,
        })
    }

    /// 追加数据。write buffer 被写满的那一刻立即 flush，
    /// 所以一次调用可能触发零次、一次或多次底层写，每次恰好 `write_capacity` 字节。
    pub fn write(&self, data: &[u8]) -> Result<(), ChannelError> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        state.ensure_open()?;

        let mut copied = 0;
        while copied < data.len() {
            let room = self.write_capacity - state.write_buffer.len();
            let n = cmp::min(room, data.len() - copied);
            state
                .write_buffer
                .extend_from_slice(&data[copied..copied + n]);
            copied += n;
            state.write_position += n as u64;

            if state.write_buffer.len() == self.write_capacity {
                state.flush()?;
            }
        }
        Ok(())
    }

    /// 仅刷新到操作系统 (快，不保证断电不丢)
    pub fn flush(&self) -> Result<(), ChannelError> {
        let mut state = self.state.write();
        state.ensure_open()?;
        state.flush()
    }

    /// 对底层文件执行 sync，返回此时文件的位置，即已经持久化的偏移。
    ///
    /// 不会 flush write buffer：还留在 buffer 里的字节没有交给文件，自然也不会落盘。
    pub fn force_write(&self, force_metadata: bool) -> Result<u64, ChannelError> {
        let mut state = self.state.write();
        state.ensure_open()?;
        state.force(force_metadata)
    }

    /// ⚡️ 真正的落盘 (慢，安全)：flush + force，返回持久化的偏移
    pub fn flush_and_force_write(&self, force_metadata: bool) -> Result<u64, ChannelError> {
        let mut state = self.state.write();
        state.ensure_open()?;
        state.flush()?;
        state.force(force_metadata)
    }

    /// flush 之后，只有 `unpersisted_bytes >= unpersisted_bytes_bound` 时才 force。
    ///
    /// 返回 `Some(持久化偏移)` 表示执行了 force，`None` 表示跳过。
    pub fn flush_and_force_write_if_regular_flush(
        &self,
        force_metadata: bool,
    ) -> Result<Option<u64>, ChannelError> {
        let mut state = self.state.write();
        state.ensure_open()?;
        state.flush()?;
        if state.unpersisted_bytes >= self.unpersisted_bytes_bound {
            return state.force(force_metadata).map(Some);
        }
        Ok(None)
    }

    /// 从绝对偏移 `position` 读取 `length` 字节到 `dest[..length]`。
    ///
    /// 已 flush 的前缀走 read cache 或一次文件读取，未 flush 的后缀直接从 write buffer 拷贝。
    /// 不允许部分读取：凑不齐 `length` 字节就返回错误。
    pub fn read(&self, dest: &mut [u8], position: u64, length: usize) -> Result<usize, ChannelError> {
        if dest.len() < length {
            return Err(ChannelError::InvalidArgument(format!(
                "destination holds {} bytes, {} requested",
                dest.len(),
                length
            )));
        }

        let state = self.state.read();
        state.ensure_open()?;

        let end = position.checked_add(length as u64);
        if end.is_none_or(|end| end > state.write_position) {
            return Err(ChannelError::ReadPastEnd {
                position,
                length,
                write_position: state.write_position,
            });
        }
        if length == 0 {
            return Ok(0);
        }

        let flushed = state.file_channel_position;
        let dest = &mut dest[..length];
        let split = if position >= flushed {
            0
        } else {
            cmp::min(length as u64, flushed - position) as usize
        };
        let (file_part, buffered_part) = dest.split_at_mut(split);

        if !file_part.is_empty() {
            self.read_flushed(&state.file, file_part, position, flushed)?;
        }

        if !buffered_part.is_empty() {
            let offset = (position + split as u64 - flushed) as usize;
            let available = state.write_buffer.len().saturating_sub(offset);
            // clear() 丢弃过的区间已经找不回来了
            if available < buffered_part.len() {
                return Err(ChannelError::ShortRead {
                    position: position + split as u64,
                    expected: buffered_part.len(),
                    actual: available,
                });
            }
            buffered_part
                .copy_from_slice(&state.write_buffer[offset..offset + buffered_part.len()]);
        }

        Ok(length)
    }

    /// 先校验区间再分配目标 buffer，避免超大 `length` 在分配时直接失败
    pub fn read_to_vec(&self, position: u64, length: usize) -> Result<Vec<u8>, ChannelError> {
        let write_position = self.position();
        let end = position.checked_add(length as u64);
        if end.is_none_or(|end| end > write_position) {
            return Err(ChannelError::ReadPastEnd {
                position,
                length,
                write_position,
            });
        }
        let mut dest = vec![0u8; length];
        self.read(&mut dest, position, length)?;
        Ok(dest)
    }

    fn read_flushed(
        &self,
        file: &S,
        dest: &mut [u8],
        position: u64,
        flushed: u64,
    ) -> Result<(), ChannelError> {
        let Some(cache) = &self.read_cache else {
            let len = dest.len();
            read_at_least(file, dest, position, len)?;
            return Ok(());
        };

        let mut cache = cache.lock();
        let hit = cache.copy_hit(position, dest);
        if hit == dest.len() {
            return Ok(());
        }

        let rest = &mut dest[hit..];
        let offset = position + hit as u64;
        let len = rest.len();
        if len > cache.capacity {
            // 比 cache 还大，直接读进目标，保证只有一次文件读取
            read_at_least(file, rest, offset, len)?;
            return Ok(());
        }

        cache.refill(file, offset, flushed, len)?;
        cache.copy_hit(offset, rest);
        Ok(())
    }

    /// 丢弃 write buffer 中尚未 flush 的数据，`position()` 和 `file_channel_position()` 不变。
    ///
    /// 被丢弃的区间仍然计入 `position()`，之后再读这段会返回 `ShortRead`。
    pub fn clear(&self) -> Result<(), ChannelError> {
        let mut state = self.state.write();
        state.ensure_open()?;
        let discarded = state.write_buffer.len();
        state.write_buffer.clear();
        debug!(discarded, "cleared write buffer");
        Ok(())
    }

    /// 关闭通道：尽力 flush 残留数据，归还 buffer，关闭底层文件（只关一次）。
    ///
    /// 重复调用直接返回 `Ok(())`。
    pub fn close(&self) -> Result<(), ChannelError> {
        let mut state = self.state.write();
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        let flushed = state.flush();

        self.pool.release(std::mem::take(&mut state.write_buffer));
        if let Some(cache) = &self.read_cache {
            let mut cache = cache.lock();
            cache.start = None;
            self.pool.release(std::mem::take(&mut cache.buf));
        }

        let closed = state.file.close().map_err(ChannelError::from);
        info!(
            position = state.write_position,
            file_channel_position = state.file_channel_position,
            "closed buffered channel"
        );
        flushed.and(closed)
    }

    /// 逻辑写入位置：write 接受过的全部字节
    pub fn position(&self) -> u64 {
        self.state.read().write_position
    }

    pub fn file_channel_position(&self) -> u64 {
        self.state.read().file_channel_position
    }

    pub fn num_of_bytes_in_write_buffer(&self) -> usize {
        self.state.read().write_buffer.len()
    }

    pub fn unpersisted_bytes(&self) -> u64 {
        self.state.read().unpersisted_bytes
    }

    pub fn unpersisted_bytes_bound(&self) -> u64 {
        self.unpersisted_bytes_bound
    }

    pub fn write_capacity(&self) -> usize {
        self.write_capacity
    }

    pub fn read_capacity(&self) -> usize {
        self.read_cache
            .as_ref()
            .map_or(0, |cache| cache.lock().capacity)
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }
}

impl<S: Storage> Drop for BufferedChannel<S> {
    fn drop(&mut self) {
        if self.state.get_mut().closed {
            return;
        }
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close buffered channel on drop");
        }
    }
}
