//! Buffered sequential-write / random-read channel for bookie entry logs.
//!
//! - `BufferedChannel` - write buffer + optional read cache over one file,
//!   with separate flushed / forced positions
//! - `storage` - the file collaborator (OS-backed and in-memory)
//! - `BufferPool` - byte buffers handed to channels and taken back on close

pub mod buffer;
pub mod channel;
pub mod config;
pub mod error;
pub mod storage;

pub use buffer::BufferPool;
pub use channel::{BufferedChannel, ChannelOptions};
pub use config::{ChannelConfig, WriteMod};
pub use error::ChannelError;
