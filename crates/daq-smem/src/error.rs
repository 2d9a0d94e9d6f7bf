// SPDX-License-Identifier: Apache-2.0 OR MIT

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SmemError {
    #[error("no buffer available within timeout")]
    Busy,

    #[error("fragment of {size} bytes exceeds max_fragment_size_bytes of {max}")]
    Oversize { size: usize, max: usize },

    #[error("maximum_oversize_fragment_count exceeded ({count} oversize fragments dropped)")]
    TooManyOversizeFragments { count: u64 },

    #[error("broadcast ring had no free buffer within the configured timeout")]
    BroadcastTimeout,
}
