//! Harness configuration.
//!
//! Loaded from a JSON file by the runner; every field has a default so an
//! empty object `{}` is a valid config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hal::{DemuxFilterSettings, DemuxInputSettings};

pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 3_000;
pub const FMQ_SIZE_4K: u32 = 0x1000;
pub const FMQ_SIZE_1M: u32 = 0x10_0000;
pub const DEFAULT_CHUNK_PACKETS: usize = 6;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Bound on every wait for an asynchronous outcome.
    /// Default: 3000 ms
    pub wait_timeout_ms: u64,

    /// Buffer size requested for each filter queue.
    /// Default: 4 KiB
    pub filter_queue_size: u32,

    /// Buffer size requested for the input queue.
    /// Default: 1 MiB
    pub input_queue_size: u32,

    /// Packets per feeder write.
    /// Default: 6
    pub chunk_packets: usize,

    /// Settings applied to the input path.
    pub input: DemuxInputSettings,

    /// Directory for generated input files. Default: system temp dir.
    pub data_dir: Option<PathBuf>,

    /// Externally supplied playback input and golden outputs.
    pub playback: Option<PlaybackFixture>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            filter_queue_size: FMQ_SIZE_4K,
            input_queue_size: FMQ_SIZE_1M,
            chunk_packets: DEFAULT_CHUNK_PACKETS,
            input: DemuxInputSettings::default(),
            data_dir: None,
            playback: None,
        }
    }
}

/// An input file plus one golden output file per filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackFixture {
    pub input_file: PathBuf,
    pub filters: Vec<FilterFixture>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterFixture {
    pub settings: DemuxFilterSettings,
    pub golden_file: PathBuf,
}

impl HarnessConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wait_timeout_ms == 0 {
            return Err(ConfigError::Invalid("wait_timeout_ms must be non-zero"));
        }
        if self.input.packet_size == 0 {
            return Err(ConfigError::Invalid("input.packet_size must be non-zero"));
        }
        if self.chunk_packets == 0 {
            return Err(ConfigError::Invalid("chunk_packets must be non-zero"));
        }
        let chunk = self.input.packet_size as usize * self.chunk_packets;
        if chunk > self.input_queue_size as usize {
            return Err(ConfigError::Invalid("feeder chunk larger than the input queue"));
        }
        Ok(())
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::DemuxDataFormat;

    #[test]
    fn test_harness_config_default() {
        let config = HarnessConfig::default();
        assert_eq!(config.wait_timeout(), Duration::from_secs(3));
        assert_eq!(config.filter_queue_size, 0x1000);
        assert_eq!(config.input_queue_size, 0x10_0000);
        assert_eq!(config.chunk_packets, 6);
        assert_eq!(config.input.status_mask, 0xf);
        assert_eq!(config.input.data_format, DemuxDataFormat::Ts);
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_object_uses_defaults() {
        let config: HarnessConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.wait_timeout_ms, DEFAULT_WAIT_TIMEOUT_MS);
        assert!(config.playback.is_none());
    }

    #[test]
    fn test_load_rejects_oversized_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vts.json");
        std::fs::write(&path, r#"{"input_queue_size": 512, "chunk_packets": 6}"#).unwrap();
        match HarnessConfig::load(&path) {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("chunk")),
            other => panic!("expected invalid config, got {other:?}"),
        }
    }

    #[test]
    fn test_load_playback_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vts.json");
        std::fs::write(
            &path,
            r#"{
                "wait_timeout_ms": 500,
                "playback": {
                    "input_file": "/data/test1.ts",
                    "filters": [
                        { "settings": { "Section": { "tpid": 256, "table_id": null } },
                          "golden_file": "/data/section.bin" }
                    ]
                }
            }"#,
        )
        .unwrap();
        let config = HarnessConfig::load(&path).unwrap();
        assert_eq!(config.wait_timeout(), Duration::from_millis(500));
        let playback = config.playback.unwrap();
        assert_eq!(playback.filters.len(), 1);
        assert_eq!(playback.filters[0].settings.tpid(), 256);
    }
}
