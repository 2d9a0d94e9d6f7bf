// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Configuration for the event manager and its broadcast ring.
//!
//! Fields are named after the concrete knob they control rather than
//! collapsed into a handful of opaque tuning numbers, so a config file
//! reads as documentation of the buffer lifecycle it drives.

use std::time::Duration;

/// Configuration of the main event ring.
#[derive(Debug, Clone)]
pub struct SmemConfig {
    /// Number of buffers in the event ring (incomplete + pending consumers).
    pub buffer_count: usize,
    /// Maximum size of a single fragment, in bytes.
    pub max_fragment_size_bytes: usize,
    /// Number of fragments expected per event before it is complete.
    pub expected_fragments_per_event: usize,
    /// Whether `Full`/`Reading` buffers may be recycled when no `Empty`
    /// buffer is available (non-reliable mode).
    pub overwrite_mode: bool,
    /// When true, a consumer's release returns the buffer to `Full`
    /// instead of `Empty`, so multiple consumer processes can each see
    /// every event once.
    pub broadcast_mode: bool,
    /// Deadline after which an `Active` (still-writing) buffer is
    /// forcibly reaped as incomplete. Resets on every operation.
    pub stale_buffer_timeout: Duration,
    /// Number of oversize fragments tolerated before writes start failing
    /// outright. `0` disables the limit.
    pub maximum_oversize_fragment_count: u64,
    /// Used by `end_of_data()` to bound how long it waits for consumers
    /// to drain: `expected_art_event_processing_time_us * buffer_count`.
    pub expected_art_event_processing_time_us: u64,
    /// Whether a released event's `event_id` is its `sequence_id` (true)
    /// or the timestamp of its first fragment (false).
    pub use_sequence_id_for_event_number: bool,
}

impl Default for SmemConfig {
    fn default() -> Self {
        Self {
            buffer_count: 10,
            max_fragment_size_bytes: 1 << 20,
            expected_fragments_per_event: 1,
            overwrite_mode: false,
            broadcast_mode: false,
            stale_buffer_timeout: Duration::from_secs(5),
            maximum_oversize_fragment_count: 1,
            expected_art_event_processing_time_us: 100_000,
            use_sequence_id_for_event_number: true,
        }
    }
}

/// Configuration of the secondary broadcast ring used for control
/// fragments (Init, EndOfRun, EndOfSubrun, EndOfData, Shutdown).
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    pub buffer_count: usize,
    pub timeout: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            buffer_count: 10,
            timeout: Duration::from_millis(3000),
        }
    }
}
