// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A fixed-width histogram of per-message processing latency.
//!
//! The deadline controller (§4.5) reads this at the 99.9th percentile every
//! minute to decide whether the stream-wide ack deadline should move.

use std::sync::atomic::{AtomicU64, Ordering};

use super::config::MAX_ACK_DEADLINE_SECONDS;

const BUCKET_COUNT: usize = MAX_ACK_DEADLINE_SECONDS as usize + 1;

/// Bucketed histogram over `[0, MAX_ACK_DEADLINE_SECONDS]` integer seconds.
///
/// Recording is lock-free (one atomic increment per call); `percentile` scans
/// the buckets and may observe a snapshot that is slightly stale with respect
/// to concurrent recorders, which is acceptable per §4.6.
#[derive(Debug)]
pub struct LatencyDistribution {
    buckets: Vec<AtomicU64>,
}

impl LatencyDistribution {
    pub fn new() -> Self {
        Self {
            buckets: (0..BUCKET_COUNT).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Records a receive-to-decision latency, in whole seconds. Values above
    /// `MAX_ACK_DEADLINE_SECONDS` are clamped into the top bucket.
    pub fn record(&self, seconds: u64) {
        let index = seconds.min(MAX_ACK_DEADLINE_SECONDS as u64) as usize;
        self.buckets[index].fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the smallest `k` such that the cumulative count through `k` is
    /// at least `p`% of the total recorded count, or `None` if nothing has
    /// been recorded yet.
    pub fn percentile(&self, p: f64) -> Option<i32> {
        let snapshot: Vec<u64> = self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect();
        let total: u64 = snapshot.iter().sum();
        if total == 0 {
            return None;
        }
        // Ceiling division so "p% of total" rounds the threshold up, matching
        // the "at least p%" requirement exactly at boundary counts.
        let threshold = ((total as f64) * (p / 100.0)).ceil() as u64;
        let threshold = threshold.max(1);
        let mut cumulative = 0u64;
        for (seconds, count) in snapshot.into_iter().enumerate() {
            cumulative += count;
            if cumulative >= threshold {
                return Some(seconds as i32);
            }
        }
        Some(MAX_ACK_DEADLINE_SECONDS)
    }
}

impl Default for LatencyDistribution {
    fn default() -> Self {
        Self::new()
    }
}
