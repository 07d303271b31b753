//! Presentation-core configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::buffer::BufferKind;
use crate::clock;
use crate::perf;

/// Top-level configuration for the presentation core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Buffer pool settings.
    pub pool: PoolConfig,
    /// Clock synchronization tuning.
    pub clock: ClockConfig,
    /// Performance sampling.
    pub perf: PerfConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Buffer pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Buffer backing: "cpu" or "gpu".
    pub backing: String,
}

/// Clock synchronization tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Period between outbound pings in milliseconds.
    pub ping_period_ms: u64,
    /// Offset sample ring capacity.
    pub sample_capacity: usize,
    /// Samples required before offsets are trusted.
    pub min_samples: usize,
}

/// Performance sampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerfConfig {
    /// Frame-latency samples retained.
    pub latency_samples: usize,
    /// Seconds between latency log reports (0 disables).
    pub report_period_secs: u64,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level.
    pub level: String,
    /// Optional log file.
    pub file: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            clock: ClockConfig::default(),
            perf: PerfConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            backing: "cpu".into(),
        }
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            ping_period_ms: clock::PING_PERIOD.as_millis() as u64,
            sample_capacity: clock::SAMPLE_CAPACITY,
            min_samples: clock::MIN_SAMPLE_COUNT,
        }
    }
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            latency_samples: perf::FRAME_LATENCY_SAMPLE_SIZE,
            report_period_secs: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: String::new(),
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────

impl PoolConfig {
    /// The configured buffer backing, defaulting to CPU mapping on an
    /// unrecognized value.
    pub fn buffer_kind(&self) -> BufferKind {
        match self.backing.as_str() {
            "gpu" => BufferKind::GpuHandle,
            "cpu" => BufferKind::CpuMapped,
            other => {
                tracing::warn!("unknown pool backing {other:?}; using cpu");
                BufferKind::CpuMapped
            }
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl CoreConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let cfg = Self::default();
        let text = toml::to_string_pretty(&cfg).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = CoreConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("ping_period_ms"));
        assert!(text.contains("latency_samples"));
    }

    #[test]
    fn roundtrip_config() {
        let cfg = CoreConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: CoreConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.clock.sample_capacity, clock::SAMPLE_CAPACITY);
        assert_eq!(parsed.perf.latency_samples, perf::FRAME_LATENCY_SAMPLE_SIZE);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let parsed: CoreConfig = toml::from_str("[clock]\nping_period_ms = 250\n").unwrap();
        assert_eq!(parsed.clock.ping_period_ms, 250);
        assert_eq!(parsed.clock.min_samples, clock::MIN_SAMPLE_COUNT);
        assert_eq!(parsed.pool.backing, "cpu");
    }

    #[test]
    fn pool_backing_parses() {
        let mut cfg = PoolConfig::default();
        assert_eq!(cfg.buffer_kind(), BufferKind::CpuMapped);
        cfg.backing = "gpu".into();
        assert_eq!(cfg.buffer_kind(), BufferKind::GpuHandle);
        cfg.backing = "quantum".into();
        assert_eq!(cfg.buffer_kind(), BufferKind::CpuMapped);
    }
}
