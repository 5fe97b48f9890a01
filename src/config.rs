use crate::channel::ChannelOptions;
use crate::error::ChannelError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 每次追加之后的落盘策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMod {
    // 立即 flush + force
    Sync,
    // 等待缓冲区满之后再自动 flush
    Buffer,
    // flush，未持久化字节超过阈值才 force
    Regular,
}

pub const DEFAULT_CONFIG_FILE: &str = "channel.conf";
pub const DEFAULT_DATA_FILE: &str = "./data/entry.log";
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 64 * 1024; // 64 KB
pub const DEFAULT_READ_BUFFER_SIZE: usize = 512;
pub const DEFAULT_UNPERSISTED_BYTES_BOUND: u64 = 0;
pub const DEFAULT_WRITE_MOD: WriteMod = WriteMod::Regular;

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub data_file: PathBuf,
    pub write_buffer_size: usize,
    pub read_buffer_size: usize,
    pub unpersisted_bytes_bound: u64,
    pub force_metadata: bool,
    pub write_mod: WriteMod,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from(DEFAULT_DATA_FILE),
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            unpersisted_bytes_bound: DEFAULT_UNPERSISTED_BYTES_BOUND,
            force_metadata: false,
            write_mod: DEFAULT_WRITE_MOD,
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ChannelError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e| {
        ChannelError::Config(format!("Invalid {} '{}': {}", key, value, e))
    })
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.write_buffer_size == 0 {
            return Err("write_buffer_size must be greater than 0".to_string());
        }
        if self.data_file.as_os_str().is_empty() {
            return Err("data_file must not be empty".to_string());
        }
        Ok(())
    }

    /// 读取 `key = value` 格式的配置文件，`#` 开头为注释。文件不存在时使用默认值。
    pub fn load(path: &Path) -> Result<Self, ChannelError> {
        if !path.exists() {
            info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let mut config = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "data_file" => config.data_file = PathBuf::from(value),
                "write_buffer_size" => {
                    config.write_buffer_size = parse_value("write_buffer_size", value)?
                }
                "read_buffer_size" => {
                    config.read_buffer_size = parse_value("read_buffer_size", value)?
                }
                "unpersisted_bytes_bound" => {
                    config.unpersisted_bytes_bound = parse_value("unpersisted_bytes_bound", value)?
                }
                "force_metadata" => config.force_metadata = parse_value("force_metadata", value)?,
                "write_mod" => match value.to_lowercase().as_str() {
                    "sync" => config.write_mod = WriteMod::Sync,
                    "buffer" => config.write_mod = WriteMod::Buffer,
                    "regular" => config.write_mod = WriteMod::Regular,
                    unknown => {
                        return Err(ChannelError::Config(format!(
                            "Unknown write_mod variant: '{}'",
                            unknown
                        )));
                    }
                },
                unknown => warn!(key = unknown, "ignoring unknown config key"),
            }
        }

        config.validate().map_err(ChannelError::Config)?;
        Ok(config)
    }

    pub fn options(&self) -> ChannelOptions {
        ChannelOptions::new(self.write_buffer_size)
            .with_read_capacity(self.read_buffer_size)
            .with_unpersisted_bytes_bound(self.unpersisted_bytes_bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = ChannelConfig::load(&dir.path().join("missing.conf")).unwrap();
        assert_eq!(config.write_buffer_size, DEFAULT_WRITE_BUFFER_SIZE);
        assert_eq!(config.write_mod, WriteMod::Regular);
        assert!(!config.force_metadata);
    }

    #[test]
    fn test_load_all_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        fs::write(
            &path,
            "# bookie entry log\n\
             data_file = /var/lib/bookie/0.log\n\
             write_buffer_size = 100\n\
             read_buffer_size=64\n\
             unpersisted_bytes_bound = 128\n\
             force_metadata = true\n\
             write_mod = SYNC\n\
             something_else = 1\n",
        )
        .unwrap();

        let config = ChannelConfig::load(&path).unwrap();
        assert_eq!(config.data_file, PathBuf::from("/var/lib/bookie/0.log"));
        assert_eq!(config.write_buffer_size, 100);
        assert_eq!(config.read_buffer_size, 64);
        assert_eq!(config.unpersisted_bytes_bound, 128);
        assert!(config.force_metadata);
        assert_eq!(config.write_mod, WriteMod::Sync);
        assert_eq!(
            config.options(),
            ChannelOptions::new(100)
                .with_read_capacity(64)
                .with_unpersisted_bytes_bound(128)
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);

        fs::write(&path, "write_buffer_size = lots\n").unwrap();
        assert!(matches!(
            ChannelConfig::load(&path),
            Err(ChannelError::Config(_))
        ));

        fs::write(&path, "write_buffer_size = 0\n").unwrap();
        assert!(matches!(
            ChannelConfig::load(&path),
            Err(ChannelError::Config(_))
        ));

        fs::write(&path, "write_mod = eventually\n").unwrap();
        assert!(matches!(
            ChannelConfig::load(&path),
            Err(ChannelError::Config(_))
        ));
    }
}
