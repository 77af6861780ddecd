//! CLI configuration.
//!
//! Stored as TOML, by default at `~/.config/ferry/config.toml`. Every field has
//! a default, so a partial file only overrides what it names.

use anyhow::Context;
use ferry_core::ReceiverLimits;
use ferry_files::DEFAULT_CHUNK_SIZE;
use ferry_signal::CoordinatorConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest accepted room lifetime, one year
pub const MAX_ROOM_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Signaling server settings
    pub server: ServerConfig,
    /// Room lifecycle settings
    pub rooms: RoomsConfig,
    /// Transfer settings
    pub transfer: TransferConfig,
}

/// Signaling server settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,
    /// Base URL share links point at
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5000".to_string(),
            public_url: "http://localhost:5000".to_string(),
        }
    }
}

/// Room lifecycle settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    /// Room lifetime in seconds
    pub ttl_secs: u64,
    /// Interval between expiry sweeps in seconds
    pub sweep_interval_secs: u64,
    /// Maximum live rooms
    pub max_rooms: usize,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 60 * 60,
            sweep_interval_secs: 60,
            max_rooms: 10_000,
        }
    }
}

/// Transfer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Chunk size in bytes
    pub chunk_size: usize,
    /// Undelivered messages a data channel holds before `send` waits
    pub channel_capacity: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            channel_capacity: 64,
        }
    }
}

impl Config {
    /// Default configuration file location
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("ferry")
            .join("config.toml")
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Load from the default location, or fall back to defaults
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Replace the bind port with `port` (the `PORT` environment variable)
    pub fn apply_port_override(&mut self, port: Option<&str>) -> anyhow::Result<()> {
        let Some(port) = port else {
            return Ok(());
        };
        let port: u16 = port
            .trim()
            .parse()
            .with_context(|| format!("Invalid PORT value: {port:?}"))?;
        let mut addr = self.bind_addr()?;
        addr.set_port(port);
        self.server.bind = addr.to_string();
        Ok(())
    }

    /// Check values before use
    pub fn validate(&self) -> anyhow::Result<()> {
        self.bind_addr()?;

        let url = url::Url::parse(&self.server.public_url)
            .with_context(|| format!("Invalid public_url: {}", self.server.public_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("public_url must be http or https, got {}", url.scheme());
        }

        if self.rooms.ttl_secs == 0 {
            anyhow::bail!("rooms.ttl_secs must be non-zero");
        }
        if self.rooms.ttl_secs > MAX_ROOM_TTL_SECS {
            anyhow::bail!(
                "rooms.ttl_secs must be at most {}, got {}",
                MAX_ROOM_TTL_SECS,
                self.rooms.ttl_secs
            );
        }
        if self.rooms.sweep_interval_secs == 0 {
            anyhow::bail!("rooms.sweep_interval_secs must be non-zero");
        }
        if self.rooms.max_rooms == 0 {
            anyhow::bail!("rooms.max_rooms must be non-zero");
        }
        if self.transfer.chunk_size == 0 {
            anyhow::bail!("transfer.chunk_size must be non-zero");
        }
        // Receivers refuse larger chunks
        let max_chunk_size = ReceiverLimits::default().max_chunk_size;
        if self.transfer.chunk_size > max_chunk_size {
            anyhow::bail!(
                "transfer.chunk_size must be at most {}, got {}",
                max_chunk_size,
                self.transfer.chunk_size
            );
        }
        if self.transfer.channel_capacity == 0 {
            anyhow::bail!("transfer.channel_capacity must be non-zero");
        }
        Ok(())
    }

    /// Parsed listen address
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.server
            .bind
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.server.bind))
    }

    /// Interval between expiry sweeps
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.rooms.sweep_interval_secs)
    }

    /// Settings for the room coordinator
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            public_url: self.server.public_url.clone(),
            room_ttl: Duration::from_secs(self.rooms.ttl_secs),
            max_rooms: self.rooms.max_rooms,
        }
    }

    /// Render as TOML
    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:5000");
        assert_eq!(config.transfer.chunk_size, 16_384);
        assert_eq!(
            config.coordinator_config().room_ttl,
            Duration::from_secs(86_400)
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[server]\npublic_url = \"https://ferry.example\"\n\n[transfer]\nchunk_size = 8192\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.public_url, "https://ferry.example");
        assert_eq!(config.server.bind, "0.0.0.0:5000");
        assert_eq!(config.transfer.chunk_size, 8192);
        assert_eq!(config.transfer.channel_capacity, 64);
        assert_eq!(config.rooms, RoomsConfig::default());
    }

    #[test]
    fn test_load_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let err = Config::load(&temp_dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_toml_render_parses_back() {
        let config = Config::default();
        let parsed: Config = toml::from_str(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_port_override() {
        let mut config = Config::default();
        config.apply_port_override(Some("8080")).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8080");

        config.apply_port_override(None).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8080");

        assert!(config.apply_port_override(Some("eighty")).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.transfer.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.public_url = "ftp://ferry.example".into();
        assert!(config.validate().unwrap_err().to_string().contains("http"));

        let mut config = Config::default();
        config.server.bind = "localhost".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rooms.ttl_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_room_ttl() {
        let mut config = Config::default();
        config.rooms.ttl_secs = MAX_ROOM_TTL_SECS;
        config.validate().unwrap();

        config.rooms.ttl_secs = u64::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rooms.ttl_secs"));
    }

    #[test]
    fn test_validate_bounds_chunk_size_to_receiver_limit() {
        let limit = ReceiverLimits::default().max_chunk_size;

        let mut config = Config::default();
        config.transfer.chunk_size = limit;
        config.validate().unwrap();

        config.transfer.chunk_size = limit + 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("transfer.chunk_size"));
    }
}
