mod memory;
mod os;
mod traits;

pub use memory::{MemFile, MemFileSystem};
pub use os::{OsFile, OsFileSystem};
pub use traits::{FileMetadata, FileSystem, RandomAccessFile, Storage, WritableFile};
