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

//! Coalesces pending acks and nacks into size-capped request frames (§4.4).
//!
//! This is the plain-data half of the ack/nack batcher: it owns the pending
//! sets and knows how to partition them into frames, but it has no opinion
//! about timers or where frames go. [`super::extender::LeaseExtender`] is the
//! single-owner task that drives it, the same split `lease_state.rs` /
//! `lease_loop.rs` use.

use std::collections::HashSet;

use super::config::MAX_PER_REQUEST_CHANGES;
use super::model::StreamingPullRequest;

#[derive(Debug, Default)]
pub(crate) struct AckBatcher {
    pending_acks: HashSet<String>,
    pending_nacks: HashSet<String>,
}

impl AckBatcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_ack(&mut self, ack_id: String) {
        self.pending_acks.insert(ack_id);
    }

    pub(crate) fn add_nack(&mut self, ack_id: String) {
        self.pending_nacks.insert(ack_id);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending_acks.is_empty() && self.pending_nacks.is_empty()
    }

    /// Builds the outbound frames for a flush (§4.4 steps 1-4).
    ///
    /// `extra_modify_deadlines` carries the lease extender's re-extension
    /// pairs for this sweep; nacks are folded in as zero-extension pairs so
    /// both travel through the same chunking logic.
    pub(crate) fn build_requests(
        &mut self,
        extra_modify_deadlines: Vec<(String, i32)>,
    ) -> Vec<StreamingPullRequest> {
        let ack_ids: Vec<String> = self.pending_acks.drain().collect();
        let mut modify_deadlines: Vec<(String, i32)> =
            self.pending_nacks.drain().map(|id| (id, 0)).collect();
        modify_deadlines.extend(extra_modify_deadlines);

        let ack_chunks = chunk(ack_ids, MAX_PER_REQUEST_CHANGES);
        let modify_chunks = chunk(modify_deadlines, MAX_PER_REQUEST_CHANGES);
        let frame_count = ack_chunks.len().max(modify_chunks.len());

        let mut ack_chunks = ack_chunks.into_iter();
        let mut modify_chunks = modify_chunks.into_iter();
        (0..frame_count)
            .map(|_| {
                let acks = ack_chunks.next().unwrap_or_default();
                let modify = modify_chunks.next().unwrap_or_default();
                let (modify_deadline_ack_ids, modify_deadline_seconds) =
                    modify.into_iter().unzip();
                StreamingPullRequest {
                    ack_ids: acks,
                    modify_deadline_ack_ids,
                    modify_deadline_seconds,
                    ..Default::default()
                }
            })
            .collect()
    }
}

fn chunk<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }
    items
        .into_iter()
        .fold(Vec::new(), |mut chunks: Vec<Vec<T>>, item| {
            match chunks.last_mut() {
                Some(last) if last.len() < size => last.push(item),
                _ => chunks.push(vec![item]),
            }
            chunks
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_batcher_yields_no_frames() {
        let mut b = AckBatcher::new();
        assert!(b.build_requests(Vec::new()).is_empty());
    }

    #[test]
    fn acks_and_nacks_share_one_frame_when_small() {
        let mut b = AckBatcher::new();
        b.add_ack("A1".into());
        b.add_nack("B1".into());
        let frames = b.build_requests(Vec::new());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].ack_ids, vec!["A1".to_string()]);
        assert_eq!(frames[0].modify_deadline_ack_ids, vec!["B1".to_string()]);
        assert_eq!(frames[0].modify_deadline_seconds, vec![0]);
    }

    #[test]
    fn extender_pairs_are_folded_into_modify_deadlines() {
        let mut b = AckBatcher::new();
        let frames = b.build_requests(vec![("C1".to_string(), 2)]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].modify_deadline_ack_ids, vec!["C1".to_string()]);
        assert_eq!(frames[0].modify_deadline_seconds, vec![2]);
    }

    #[test]
    fn batch_chunking_scenario() {
        // End-to-end scenario 4: 15,000 acks flush as exactly two frames.
        let mut b = AckBatcher::new();
        for i in 0..15_000 {
            b.add_ack(format!("ack-{i}"));
        }
        let frames = b.build_requests(Vec::new());
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].ack_ids.len(), MAX_PER_REQUEST_CHANGES);
        assert_eq!(frames[1].ack_ids.len(), 5_000);
    }

    #[test]
    fn modify_deadline_chunking_is_independent_of_acks() {
        let mut b = AckBatcher::new();
        for i in 0..MAX_PER_REQUEST_CHANGES + 1 {
            b.add_nack(format!("nack-{i}"));
        }
        b.add_ack("A1".into());
        let frames = b.build_requests(Vec::new());
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].modify_deadline_ack_ids.len(), MAX_PER_REQUEST_CHANGES);
        assert_eq!(frames[1].modify_deadline_ack_ids.len(), 1);
        // The single ack id rides along on the first frame.
        assert_eq!(frames[0].ack_ids, vec!["A1".to_string()]);
        assert!(frames[1].ack_ids.is_empty());
    }

    #[test]
    fn no_frame_exceeds_the_per_request_cap() {
        let mut b = AckBatcher::new();
        for i in 0..(MAX_PER_REQUEST_CHANGES * 2 + 7) {
            b.add_ack(format!("ack-{i}"));
        }
        for frame in b.build_requests(Vec::new()) {
            assert!(frame.ack_ids.len() <= MAX_PER_REQUEST_CHANGES);
            assert!(frame.modify_deadline_ack_ids.len() <= MAX_PER_REQUEST_CHANGES);
        }
    }
}
