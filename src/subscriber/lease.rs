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

//! The lease-expiration scheduler: [`LeaseHandle`], [`ExpirationBucket`], and
//! [`ExpirationTable`].
//!
//! This is the ordered-multimap half of the lease extender (§4.3, §9 "Ordered
//! multimap of expirations"). It owns every handle that has been registered
//! and not yet swept away as decided; the extender actor in
//! [`super::extender`] is the only thing that ever sweeps it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// A `tokio::time::Instant` rather than `std::time::Instant` so the extender
// actor's tests can drive this table under a paused, manually-advanced
// clock.
use tokio::time::{Duration, Instant};

use super::config::INITIAL_ACK_DEADLINE_EXTENSION_SECONDS;

/// One received, not-yet-decided message.
///
/// `decided` is set exactly once, by whichever happens first: the receiver's
/// completion path, or (never, in practice, but defensively handled) the
/// sweep observing it past decision. The extender's sweep checks `decided`
/// without needing any lock beyond the table's, per §4.2's "atomic `decided`"
/// requirement.
#[derive(Debug)]
pub struct LeaseHandle {
    pub ack_id: String,
    pub byte_size: usize,
    pub received_at: Instant,
    decided: AtomicBool,
}

impl LeaseHandle {
    fn new(ack_id: String, byte_size: usize, received_at: Instant) -> Arc<Self> {
        Arc::new(Self {
            ack_id,
            byte_size,
            received_at,
            decided: AtomicBool::new(false),
        })
    }

    /// Marks the handle decided. Returns `true` the first time this is
    /// called, `false` on any subsequent call -- callers use this to ensure
    /// a handle's terminal decision is recorded exactly once.
    pub fn mark_decided(&self) -> bool {
        !self.decided.swap(true, Ordering::AcqRel)
    }

    pub fn is_decided(&self) -> bool {
        self.decided.load(Ordering::Acquire)
    }
}

/// A group of lease handles sharing a common expiration instant.
///
/// `next_extension_seconds` starts at
/// [`INITIAL_ACK_DEADLINE_EXTENSION_SECONDS`] and doubles every time
/// [`ExpirationBucket::extend`] runs, per §3's "Expiration Bucket".
#[derive(Debug)]
pub struct ExpirationBucket {
    pub handles: Vec<Arc<LeaseHandle>>,
    pub next_extension_seconds: i32,
}

impl ExpirationBucket {
    fn new(handles: Vec<Arc<LeaseHandle>>) -> Self {
        Self {
            handles,
            next_extension_seconds: INITIAL_ACK_DEADLINE_EXTENSION_SECONDS,
        }
    }

    /// Computes the new expiration (`now + next_extension_seconds`) and
    /// doubles `next_extension_seconds` for the following extension.
    fn extend(&mut self, now: Instant) -> Instant {
        let new_expiration = now + Duration::from_secs(self.next_extension_seconds as u64);
        self.next_extension_seconds = self.next_extension_seconds.saturating_mul(2);
        new_expiration
    }
}

/// A total order over `Instant` suitable for use as a `BTreeMap` key.
///
/// `Instant` does not implement `Ord` directly in a way that composes with
/// the "earliest expiration" queries the sweep needs to run repeatedly with a
/// tie-breaker for buckets registered at the exact same nanosecond (two
/// batches delivered back to back with an identical deadline); the tie is
/// broken by insertion sequence so both buckets survive independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExpirationKey {
    instant_nanos: u128,
    sequence: u64,
}

/// Ordered multimap from expiration instant to the bucket of handles sharing
/// it (§3 "Expiration Table", §9 "Ordered multimap of expirations").
///
/// A `BTreeMap` gives ordered iteration, point removal, and bulk re-insertion
/// under a new key directly, with no need for a hand-rolled heap with
/// lazy deletes.
#[derive(Debug, Default)]
pub struct ExpirationTable {
    buckets: BTreeMap<ExpirationKey, ExpirationBucket>,
    epoch: InstantEpoch,
    next_sequence: u64,
}

/// Lazily-initialized reference instant so [`ExpirationKey`] can store plain
/// `u128` nanosecond offsets (total order, `Copy`, usable as a map key)
/// instead of carrying `Instant` comparisons that are monotonic but not
/// `Ord`-derivable across platforms in a `const` context.
#[derive(Debug)]
struct InstantEpoch(Instant);

impl Default for InstantEpoch {
    fn default() -> Self {
        Self(Instant::now())
    }
}

impl ExpirationTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn key_for(&mut self, when: Instant) -> ExpirationKey {
        let nanos = when.saturating_duration_since(self.epoch.0).as_nanos();
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        ExpirationKey {
            instant_nanos: nanos,
            sequence,
        }
    }

    /// Registers a freshly delivered batch of messages as one new bucket
    /// keyed at `expiration` (§4.2: "Place all handles into a single new
    /// Expiration Bucket").
    ///
    /// Returns the bucket's key, which callers use to decide whether the
    /// extension alarm needs to be rearmed earlier (§4.3).
    pub fn insert_batch(
        &mut self,
        expiration: Instant,
        messages: impl IntoIterator<Item = (String, usize, Instant)>,
    ) -> (ExpirationKey, Vec<Arc<LeaseHandle>>) {
        let handles: Vec<Arc<LeaseHandle>> = messages
            .into_iter()
            .map(|(ack_id, byte_size, received_at)| LeaseHandle::new(ack_id, byte_size, received_at))
            .collect();
        let key = self.key_for(expiration);
        self.buckets.insert(key, ExpirationBucket::new(handles.clone()));
        (key, handles)
    }

    /// The expiration instant of the earliest (soonest) bucket, if any.
    pub fn earliest_expiration(&self) -> Option<Instant> {
        self.buckets
            .first_key_value()
            .map(|(key, _)| self.epoch.0 + Duration::from_nanos(key.instant_nanos as u64))
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Runs the sweep described in §4.3 steps 2-3: walks buckets in ascending
    /// key order, extends every bucket whose expiration is at or before
    /// `cut_over`, drops decided handles, re-inserts survivors under their
    /// new expiration, and emits one `(ack_id, extension_seconds)` pair per
    /// surviving handle.
    ///
    /// Returns the modify-deadline pairs to send, and the expiration of the
    /// first bucket past `cut_over` (the next alarm time), if any remains.
    pub fn sweep(&mut self, now: Instant, cut_over: Instant) -> (Vec<(String, i32)>, Option<Instant>) {
        let cut_over_nanos = cut_over.saturating_duration_since(self.epoch.0).as_nanos();
        // Keys strictly after the cut-over boundary are untouched; split_off
        // gives us exactly the "at or before cut_over" prefix to drain. The
        // boundary key's sequence is `u64::MAX` -- higher than any real
        // bucket's -- so a bucket whose expiration lands on exactly the same
        // nanosecond as `cut_over` still sorts *before* the boundary and is
        // included, matching §4.3's closed "expiration <= cutOver" bound.
        let remainder = self.buckets.split_off(&ExpirationKey {
            instant_nanos: cut_over_nanos,
            sequence: u64::MAX,
        });
        let due: BTreeMap<ExpirationKey, ExpirationBucket> =
            std::mem::replace(&mut self.buckets, remainder);

        let mut modify_deadlines = Vec::new();
        for (_, mut bucket) in due {
            let new_expiration = bucket.extend(now);
            let extension_seconds = new_expiration
                .saturating_duration_since(now)
                .as_secs()
                .max(0) as i32;
            let survivors: Vec<Arc<LeaseHandle>> = bucket
                .handles
                .into_iter()
                .filter(|h| !h.is_decided())
                .collect();
            for handle in &survivors {
                modify_deadlines.push((handle.ack_id.clone(), extension_seconds));
            }
            if !survivors.is_empty() {
                let new_key = self.key_for(new_expiration);
                bucket.handles = survivors;
                self.buckets.insert(new_key, bucket);
            }
        }

        let next_alarm = self.earliest_expiration();
        (modify_deadlines, next_alarm)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn ack_id(n: u32) -> String {
        format!("ack-{n}")
    }

    #[tokio::test]
    async fn insert_batch_creates_one_bucket() {
        let mut table = ExpirationTable::new();
        let now = Instant::now();
        let expiry = now + Duration::from_secs(10);
        let (_key, handles) = table.insert_batch(
            expiry,
            vec![
                (ack_id(1), 10, now),
                (ack_id(2), 20, now),
            ],
        );
        assert_eq!(handles.len(), 2);
        assert_eq!(table.len(), 1);
        assert_eq!(table.earliest_expiration(), Some(expiry));
    }

    #[tokio::test]
    async fn sweep_extends_undecided_and_doubles_next_extension() {
        let mut table = ExpirationTable::new();
        let now = Instant::now();
        let expiry = now + Duration::from_millis(10);
        table.insert_batch(expiry, vec![(ack_id(1), 10, now)]);

        let later = now + Duration::from_millis(20);
        let cut_over = later;
        let (modify_deadlines, next_alarm) = table.sweep(later, cut_over);

        assert_eq!(modify_deadlines.len(), 1);
        assert_eq!(modify_deadlines[0].0, ack_id(1));
        assert_eq!(modify_deadlines[0].1, INITIAL_ACK_DEADLINE_EXTENSION_SECONDS);
        // The handle survives, re-inserted under a new key ~2s out.
        assert!(next_alarm.is_some());
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn sweep_drops_decided_handles_and_empties_the_bucket() {
        let mut table = ExpirationTable::new();
        let now = Instant::now();
        let expiry = now + Duration::from_millis(10);
        let (_key, handles) = table.insert_batch(expiry, vec![(ack_id(1), 10, now)]);
        assert!(handles[0].mark_decided());

        let later = now + Duration::from_millis(20);
        let (modify_deadlines, next_alarm) = table.sweep(later, later);

        assert!(modify_deadlines.is_empty());
        assert!(next_alarm.is_none());
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn sweep_leaves_buckets_past_cut_over_untouched() {
        let mut table = ExpirationTable::new();
        let now = Instant::now();
        let soon = now + Duration::from_millis(10);
        let later_expiry = now + Duration::from_secs(100);
        table.insert_batch(soon, vec![(ack_id(1), 10, now)]);
        table.insert_batch(later_expiry, vec![(ack_id(2), 10, now)]);

        let cut_over = now + Duration::from_millis(20);
        let (modify_deadlines, next_alarm) = table.sweep(cut_over, cut_over);

        assert_eq!(modify_deadlines.len(), 1);
        assert_eq!(modify_deadlines[0].0, ack_id(1));
        // The far-future bucket is the next alarm target.
        assert_eq!(next_alarm, Some(later_expiry));
        assert_eq!(table.len(), 2); // re-inserted "ack-1" bucket + untouched "ack-2" bucket
    }

    #[tokio::test]
    async fn sweep_includes_a_bucket_whose_expiration_exactly_equals_cut_over() {
        // §4.3's bound is closed ("expiration <= cutOver"); a bucket expiring
        // at exactly the cut-over instant must still be swept, not skipped.
        let mut table = ExpirationTable::new();
        let now = Instant::now();
        let expiry = now + Duration::from_millis(10);
        table.insert_batch(expiry, vec![(ack_id(1), 10, now)]);

        let (modify_deadlines, _) = table.sweep(expiry, expiry);

        assert_eq!(modify_deadlines.len(), 1);
        assert_eq!(modify_deadlines[0].0, ack_id(1));
    }

    #[tokio::test]
    async fn extension_seconds_double_on_each_sweep() {
        let mut table = ExpirationTable::new();
        let now = Instant::now();
        let expiry = now + Duration::from_millis(10);
        table.insert_batch(expiry, vec![(ack_id(1), 10, now)]);

        let t1 = now + Duration::from_millis(20);
        let (first, _) = table.sweep(t1, t1);
        assert_eq!(first[0].1, 2);

        let t2 = t1 + Duration::from_secs(3);
        let (second, _) = table.sweep(t2, t2);
        assert_eq!(second[0].1, 4);
    }
}
