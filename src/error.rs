use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(
        "Read past end: position {position} + length {length} exceeds write position {write_position}"
    )]
    ReadPastEnd {
        position: u64,
        length: usize,
        write_position: u64,
    },

    #[error("Short read at position {position}: expected {expected} bytes, got {actual}")]
    ShortRead {
        position: u64,
        expected: usize,
        actual: usize,
    },

    #[error("Channel is closed")]
    Closed,

    #[error("Config Error: {0}")]
    Config(String),
}
