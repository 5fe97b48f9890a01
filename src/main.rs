use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use buffered_channel::config::DEFAULT_CONFIG_FILE;
use buffered_channel::storage::{FileSystem, OsFileSystem, Storage};
use buffered_channel::{BufferPool, BufferedChannel, ChannelConfig, ChannelError, WriteMod};
use tracing_subscriber::EnvFilter;

fn open_channel(config: &ChannelConfig) -> anyhow::Result<BufferedChannel<Box<dyn Storage>>> {
    let fs = OsFileSystem;
    if let Some(parent) = config.data_file.parent() {
        fs.create_dir_all(parent)?;
    }
    // 存在则 open（追加），不存在则 create
    let file = if fs.exists(&config.data_file) {
        fs.open_file(&config.data_file)?
    } else {
        fs.create_file(&config.data_file)?
    };
    let channel =
        BufferedChannel::with_options(Arc::new(BufferPool::default()), file, config.options())?;
    Ok(channel)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let config = ChannelConfig::load(Path::new(DEFAULT_CONFIG_FILE))
        .context("failed to load channel config")?;
    let channel = open_channel(&config)
        .with_context(|| format!("failed to open {}", config.data_file.display()))?;

    println!("Buffered channel on {}", config.data_file.display());
    println!("Commands: APPEND <text> | READ <pos> <len> | FLUSH | SYNC | CLEAR | STAT | EXIT");

    let mut input = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;
        input.clear();

        if io::stdin().read_line(&mut input)? == 0 {
            break; // EOF
        }
        let trimmed = input.trim();
        if trimmed.is_empty() {
            continue;
        }

        let (command, rest) = trimmed.split_once(' ').unwrap_or((trimmed, ""));
        match command.to_uppercase().as_str() {
            "APPEND" => {
                let start = channel.position();
                let result = channel.write(rest.as_bytes()).and_then(|_| match config.write_mod {
                    WriteMod::Sync => channel
                        .flush_and_force_write(config.force_metadata)
                        .map(|_| ()),
                    WriteMod::Buffer => Ok(()),
                    WriteMod::Regular => channel
                        .flush_and_force_write_if_regular_flush(config.force_metadata)
                        .map(|_| ()),
                });
                match result {
                    Ok(()) => println!("OK {} {}", start, rest.len()),
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            "READ" => {
                let mut args = rest.split_whitespace().map(str::parse::<u64>);
                match (args.next(), args.next()) {
                    (Some(Ok(pos)), Some(Ok(len))) => {
                        let result = usize::try_from(len)
                            .map_err(|e| ChannelError::InvalidArgument(e.to_string()))
                            .and_then(|len| channel.read_to_vec(pos, len));
                        match result {
                            Ok(buf) => match String::from_utf8(buf) {
                                Ok(s) => println!("{}", s),
                                Err(e) => println!("{:?}", e.into_bytes()),
                            },
                            Err(e) => eprintln!("Error: {}", e),
                        }
                    }
                    _ => println!("Usage: READ <pos> <len>"),
                }
            }
            "FLUSH" => match channel.flush() {
                Ok(()) => println!("OK {}", channel.file_channel_position()),
                Err(e) => eprintln!("Error: {}", e),
            },
            "SYNC" => match channel.flush_and_force_write(config.force_metadata) {
                Ok(pos) => println!("OK {}", pos),
                Err(e) => eprintln!("Error: {}", e),
            },
            "CLEAR" => match channel.clear() {
                Ok(()) => println!("OK"),
                Err(e) => eprintln!("Error: {}", e),
            },
            "STAT" => {
                println!("position:          {}", channel.position());
                println!("flushed:           {}", channel.file_channel_position());
                println!("buffered:          {}", channel.num_of_bytes_in_write_buffer());
                println!("unpersisted:       {}", channel.unpersisted_bytes());
                println!("unpersisted bound: {}", channel.unpersisted_bytes_bound());
                println!("write capacity:    {}", channel.write_capacity());
                println!("read capacity:     {}", channel.read_capacity());
            }
            "EXIT" => break,
            other => println!("Unknown command: {}", other),
        }
    }

    channel.close()?;
    Ok(())
}
