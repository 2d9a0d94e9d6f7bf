// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-role configuration, loadable from TOML. These stand in for the
//! FHiCL documents a real deployment would use; the shape is the same,
//! just a different grammar.

use daq_reqproto::WindowMode;
use daq_smem::{BroadcastConfig, SmemConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::CoreError;

fn load<T: serde::de::DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, CoreError> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| CoreError::Config(e.to_string()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    pub rank: i32,
    /// Destination ranks this reader may send fragments to, before routing
    /// narrows it down per-sequence.
    pub enabled_destinations: Vec<i32>,
    #[serde(default)]
    pub request_mode: RequestModeConfig,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_data_buffer_depth")]
    pub data_buffer_depth_fragments: usize,
    #[serde(default = "default_true")]
    pub circular_buffer_mode: bool,
    #[serde(default = "default_window_close_timeout_us")]
    pub window_close_timeout_us: u64,
    #[serde(default = "default_missing_request_window_timeout_us")]
    pub missing_request_window_timeout_us: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RequestModeConfig {
    #[default]
    Ignored,
    Single,
    Buffer,
    Window {
        offset: i64,
        width: u64,
    },
}

impl From<RequestModeConfig> for WindowMode {
    fn from(mode: RequestModeConfig) -> Self {
        match mode {
            RequestModeConfig::Ignored => WindowMode::Ignored,
            RequestModeConfig::Single => WindowMode::Single,
            RequestModeConfig::Buffer => WindowMode::Buffer,
            RequestModeConfig::Window { offset, width } => WindowMode::Window { offset, width },
        }
    }
}

impl ReaderConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        load(path)
    }
}

/// TOML-facing mirror of [`daq_smem::SmemConfig`] plus
/// [`daq_smem::BroadcastConfig`]; durations are expressed in whole
/// milliseconds since neither config type implements `serde` itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderConfig {
    pub rank: i32,
    pub enabled_sources: Vec<i32>,

    #[serde(default = "default_buffer_count")]
    pub buffer_count: usize,
    #[serde(default = "default_max_fragment_size_bytes")]
    pub max_fragment_size_bytes: usize,
    pub expected_fragments_per_event: usize,
    #[serde(default)]
    pub overwrite_mode: bool,
    #[serde(default)]
    pub broadcast_mode: bool,
    #[serde(default = "default_stale_buffer_timeout_ms")]
    pub stale_buffer_timeout_ms: u64,
    #[serde(default = "default_maximum_oversize_fragment_count")]
    pub maximum_oversize_fragment_count: u64,
    #[serde(default = "default_expected_art_event_processing_time_us")]
    pub expected_art_event_processing_time_us: u64,
    /// Whether a released event's `event_id` is its `sequence_id` (true)
    /// or its earliest fragment's `timestamp` (false).
    #[serde(default = "default_true")]
    pub use_sequence_id_for_event_number: bool,

    #[serde(default = "default_buffer_count")]
    pub broadcast_buffer_count: usize,
    #[serde(default = "default_broadcast_timeout_ms")]
    pub broadcast_timeout_ms: u64,
}

impl BuilderConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        load(path)
    }

    pub fn smem_config(&self) -> SmemConfig {
        SmemConfig {
            buffer_count: self.buffer_count,
            max_fragment_size_bytes: self.max_fragment_size_bytes,
            expected_fragments_per_event: self.expected_fragments_per_event,
            overwrite_mode: self.overwrite_mode,
            broadcast_mode: self.broadcast_mode,
            stale_buffer_timeout: Duration::from_millis(self.stale_buffer_timeout_ms),
            maximum_oversize_fragment_count: self.maximum_oversize_fragment_count,
            expected_art_event_processing_time_us: self.expected_art_event_processing_time_us,
            use_sequence_id_for_event_number: self.use_sequence_id_for_event_number,
        }
    }

    pub fn broadcast_config(&self) -> BroadcastConfig {
        BroadcastConfig {
            buffer_count: self.broadcast_buffer_count,
            timeout: Duration::from_millis(self.broadcast_timeout_ms),
        }
    }
}

fn default_buffer_count() -> usize {
    10
}
fn default_max_fragment_size_bytes() -> usize {
    1 << 20
}
fn default_stale_buffer_timeout_ms() -> u64 {
    5_000
}
fn default_maximum_oversize_fragment_count() -> u64 {
    1
}
fn default_expected_art_event_processing_time_us() -> u64 {
    100_000
}
fn default_broadcast_timeout_ms() -> u64 {
    3_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub rank: i32,
    #[serde(default = "default_true")]
    pub restart_on_crash: bool,
}

impl ConsumerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        load(path)
    }
}

fn default_true() -> bool {
    true
}

fn default_request_delay_ms() -> u64 {
    10
}

fn default_data_buffer_depth() -> usize {
    1000
}

fn default_window_close_timeout_us() -> u64 {
    500_000
}

fn default_missing_request_window_timeout_us() -> u64 {
    5_000_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_config_parses_window_mode_from_toml() {
        let toml = r#"
            rank = 1
            enabled_destinations = [2, 3]

            [request_mode]
            kind = "Window"
            offset = -1
            width = 3
        "#;
        let config: ReaderConfig = toml::from_str(toml).unwrap();
        assert!(matches!(
            WindowMode::from(config.request_mode),
            WindowMode::Window { offset: -1, width: 3 }
        ));
    }

    #[test]
    fn reader_config_defaults_request_mode_to_ignored() {
        let toml = r#"
            rank = 1
            enabled_destinations = []
        "#;
        let config: ReaderConfig = toml::from_str(toml).unwrap();
        assert!(matches!(WindowMode::from(config.request_mode), WindowMode::Ignored));
    }

    #[test]
    fn builder_config_fills_defaults_and_converts_to_smem_config() {
        let toml = r#"
            rank = 5
            enabled_sources = [1, 2]
            expected_fragments_per_event = 2
        "#;
        let config: BuilderConfig = toml::from_str(toml).unwrap();
        let smem = config.smem_config();
        assert_eq!(smem.buffer_count, 10);
        assert_eq!(smem.expected_fragments_per_event, 2);
        assert!(smem.use_sequence_id_for_event_number);
        let broadcast = config.broadcast_config();
        assert_eq!(broadcast.buffer_count, 10);
    }
}
