// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Windowing modes: how a fragment generator answers a request against its
//! local fragment buffer.

use crate::buffer::FragmentBuffer;

/// How a generator responds to an incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMode {
    /// Requests are tracked but never gate emission; the source emits
    /// freely regardless of what's requested.
    Ignored,
    /// Emit exactly one fragment whose timestamp matches the request, or an
    /// `Empty` fragment carrying the request's timestamp if none exists.
    Single,
    /// Emit every buffered fragment as one `Container`.
    Buffer,
    /// Emit a `Container` of every fragment with timestamp in
    /// `[ts + offset, ts + offset + width)`.
    Window { offset: i64, width: u64 },
}

/// Outcome of evaluating a `Window` request against the current buffer
/// contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowOutcome {
    /// The window can be answered now.
    Ready { timestamps: Vec<u64>, missing_data: bool },
    /// The window's upper bound isn't covered by the buffer yet; the caller
    /// should wait (bounded by `window_close_timeout_us`) and retry.
    Pending,
}

impl WindowMode {
    /// Evaluate a `Window { offset, width }` request. Panics if called on a
    /// non-`Window` variant; callers dispatch on the mode first.
    pub fn evaluate_window(offset: i64, width: u64, request_ts: u64, buffer: &FragmentBuffer, timed_out: bool) -> WindowOutcome {
        let lo = request_ts.wrapping_add_signed(offset);
        let hi = lo.saturating_add(width);
        let span = match buffer.timestamp_span() {
            Some(span) => span,
            None => {
                return if timed_out {
                    WindowOutcome::Ready { timestamps: vec![], missing_data: true }
                } else {
                    WindowOutcome::Pending
                };
            }
        };
        let (buf_lo, buf_hi) = span;
        let covers_end = hi.saturating_sub(1) <= buf_hi;
        if covers_end {
            let timestamps = buffer.timestamps_in_range(lo, hi);
            let missing_data = lo < buf_lo;
            WindowOutcome::Ready { timestamps, missing_data }
        } else if timed_out {
            let timestamps = buffer.timestamps_in_range(lo, hi);
            WindowOutcome::Ready { timestamps, missing_data: true }
        } else {
            WindowOutcome::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_proto::{Fragment, FragmentType};

    fn buffer_with(timestamps: &[u64]) -> FragmentBuffer {
        let mut buffer = FragmentBuffer::new(timestamps.len().max(1), false);
        for (i, &ts) in timestamps.iter().enumerate() {
            buffer.push(Fragment::new(i as u64, i as u16, ts, FragmentType::Data, vec![], vec![]));
        }
        buffer
    }

    #[test]
    fn window_hit_returns_exact_range() {
        let buffer = buffer_with(&[2, 3, 4, 5, 6]);
        let outcome = WindowMode::evaluate_window(0, 3, 3, &buffer, false);
        assert_eq!(
            outcome,
            WindowOutcome::Ready { timestamps: vec![3, 4, 5], missing_data: false }
        );
    }

    #[test]
    fn window_entirely_before_buffer_start_is_immediately_missing() {
        let buffer = buffer_with(&[10, 11, 12]);
        let outcome = WindowMode::evaluate_window(0, 2, 0, &buffer, false);
        assert_eq!(outcome, WindowOutcome::Ready { timestamps: vec![], missing_data: true });
    }

    #[test]
    fn window_beyond_buffer_end_waits_then_times_out() {
        let buffer = buffer_with(&[2, 3, 4, 5, 6]);
        assert_eq!(WindowMode::evaluate_window(0, 3, 8, &buffer, false), WindowOutcome::Pending);
        assert_eq!(
            WindowMode::evaluate_window(0, 3, 8, &buffer, true),
            WindowOutcome::Ready { timestamps: vec![], missing_data: true }
        );
    }

    #[test]
    fn window_matching_buffer_boundary_exactly_has_no_missing_data() {
        let buffer = buffer_with(&[2, 3, 4, 5, 6]);
        let outcome = WindowMode::evaluate_window(0, 5, 2, &buffer, false);
        assert_eq!(
            outcome,
            WindowOutcome::Ready { timestamps: vec![2, 3, 4, 5, 6], missing_data: false }
        );
    }
}
