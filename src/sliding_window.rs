//! The bounded FIFO time series behind each plot.
//!
//! One pipeline owns the writes; one renderer reads snapshots. Both go
//! through the same lock because a live resize can race with a read.
//! The window is always exactly `capacity` points long: it starts
//! pre-filled with synthetic indices and zero values, and every append
//! evicts the oldest point.

use std::collections::VecDeque;

/// Fixed-capacity sliding window of `(sample index, derived value)`
/// points, plus the packet-tracking state of the pipeline that feeds it.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    xs: VecDeque<i64>,
    ys: VecDeque<f64>,
    capacity: usize,
    last_seen_packet_id: Option<u8>,
    sample_counter: i64,
}

impl SlidingWindow {
    /// Creates a window pre-filled with `capacity` points: indices
    /// `-capacity..0`, values all zero.
    pub fn new(capacity: usize) -> Self {
        Self {
            xs: (-(capacity as i64)..0).collect(),
            ys: std::iter::repeat(0.0).take(capacity).collect(),
            capacity,
            last_seen_packet_id: None,
            sample_counter: -1,
        }
    }

    /// Current number of points; equal to the capacity at all times.
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.xs.len(), self.ys.len());
        self.xs.len()
    }

    /// True when the window holds no points (capacity zero).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured window length.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Packet id of the newest sample appended, if any yet.
    pub fn last_seen_packet_id(&self) -> Option<u8> {
        self.last_seen_packet_id
    }

    /// Index of the newest appended sample.
    pub fn sample_counter(&self) -> i64 {
        self.sample_counter
    }

    /// Records one observation of the owning channel's slot. If
    /// `packet_id` differs from the last one seen, the sample counter
    /// advances by the wrapped packet-id distance (how many packets
    /// actually elapsed, mod 256), the point is appended, and the oldest
    /// point is evicted. An unchanged id appends nothing.
    ///
    /// Returns whether a point was appended.
    pub fn observe(&mut self, packet_id: u8, value: f64) -> bool {
        let advance = match self.last_seen_packet_id {
            Some(last) if last == packet_id => return false,
            Some(last) => packet_id.wrapping_sub(last) as i64,
            None => 1,
        };

        self.sample_counter += advance;
        self.xs.push_back(self.sample_counter);
        self.ys.push_back(value);
        self.xs.pop_front();
        self.ys.pop_front();
        true
    }

    /// Changes the window length. Growing prepends synthetic zero-valued
    /// points whose indices keep the x sequence contiguous and increasing;
    /// shrinking drops the oldest points. The capacity field is updated
    /// last.
    pub fn resize(&mut self, new_len: usize) {
        let old_len = self.capacity;
        if new_len > old_len {
            let diff = (new_len - old_len) as i64;
            // Index just below the oldest point currently held.
            let oldest = self.sample_counter + 1 - old_len as i64;
            for x in ((oldest - diff)..oldest).rev() {
                self.xs.push_front(x);
                self.ys.push_front(0.0);
            }
        } else {
            for _ in 0..(old_len - new_len) {
                self.xs.pop_front();
                self.ys.pop_front();
            }
        }
        self.capacity = new_len;
        debug_assert_eq!(self.xs.len(), self.capacity);
    }

    /// Copies the points out as `(x, y)` pairs for rendering.
    pub fn snapshot(&self) -> Vec<(f64, f64)> {
        self.xs
            .iter()
            .zip(self.ys.iter())
            .map(|(&x, &y)| (x as f64, y))
            .collect()
    }
}
