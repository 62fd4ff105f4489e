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

//! Constants and tunables for the streaming pull subscriber.
//!
//! Names and values mirror the external interfaces in the design document
//! (§6); they are the only numbers that should ever be hand-typed elsewhere
//! in this crate.

use std::time::Duration;

/// The backoff used for the first reconnect attempt, and the value the
/// backoff resets to after any clean stream close.
pub const INITIAL_CHANNEL_RECONNECT_BACKOFF: Duration = Duration::from_millis(100);

/// The maximum number of ack ids, or modify-deadline entries, carried by a
/// single outbound request frame.
pub const MAX_PER_REQUEST_CHANGES: usize = 10_000;

/// The minimum value `stream_ack_deadline_seconds` may take.
pub const MIN_ACK_DEADLINE_SECONDS: i32 = 10;

/// The maximum value `stream_ack_deadline_seconds` may take. Also the width
/// (minus one) of the latency histogram.
pub const MAX_ACK_DEADLINE_SECONDS: i32 = 600;

/// The stream-wide ack deadline used before any configured padding or
/// adaptive update has taken effect.
pub const INITIAL_ACK_DEADLINE_SECONDS: i32 = 10;

/// The `next_extension_seconds` an expiration bucket starts with.
pub const INITIAL_ACK_DEADLINE_EXTENSION_SECONDS: i32 = 2;

/// How often the deadline controller recomputes `stream_ack_deadline_seconds`.
pub const ACK_DEADLINE_UPDATE_PERIOD: Duration = Duration::from_secs(60);

/// The percentile of the latency distribution the deadline controller reads.
pub const PERCENTILE_FOR_ACK_DEADLINE_UPDATES: f64 = 99.9;

/// The debounce delay before the first pending ack/nack is flushed.
pub const PENDING_ACKS_SEND_DELAY: Duration = Duration::from_millis(100);

/// Configuration for a single streaming pull subscriber.
///
/// Mirrors the fluent defaults of `StreamingPull` in the teacher crate, with
/// the addition of `padding` (§6 glossary: the safety margin subtracted from
/// a lease's expiration when scheduling its extension sweep). Construct with
/// [`SubscriberConfig::new`] and adjust with the `with_*` setters; every
/// setter consumes and returns `Self`, the same fluent shape as
/// `subscriber/builder.rs`'s `set_*` methods in the teacher crate.
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub(crate) subscription: String,
    pub(crate) padding: Duration,
    pub(crate) initial_stream_ack_deadline_seconds: i32,
    pub(crate) max_outstanding_messages: i64,
    pub(crate) max_outstanding_bytes: i64,
}

impl SubscriberConfig {
    /// Creates a configuration for `subscription` (`projects/*/subscriptions/*`)
    /// with every other value at its documented default.
    pub fn new(subscription: impl Into<String>) -> Self {
        Self {
            subscription: subscription.into(),
            padding: Duration::from_secs(3),
            initial_stream_ack_deadline_seconds: INITIAL_ACK_DEADLINE_SECONDS,
            max_outstanding_messages: 1_000,
            max_outstanding_bytes: 1_000 * 1024 * 1024,
        }
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    pub fn padding(&self) -> Duration {
        self.padding
    }

    pub fn initial_stream_ack_deadline_seconds(&self) -> i32 {
        self.initial_stream_ack_deadline_seconds
    }

    pub fn max_outstanding_messages(&self) -> i64 {
        self.max_outstanding_messages
    }

    pub fn max_outstanding_bytes(&self) -> i64 {
        self.max_outstanding_bytes
    }

    /// Sets the safety margin subtracted from a lease's expiration when
    /// scheduling the lease extender's sweep (§6 glossary: "Padding").
    pub fn with_padding(mut self, padding: Duration) -> Self {
        self.padding = padding;
        self
    }

    /// Sets the stream-wide ack deadline used before any adaptive update has
    /// taken effect. Clamped to `[MIN_ACK_DEADLINE_SECONDS,
    /// MAX_ACK_DEADLINE_SECONDS]` when the subscriber starts.
    pub fn with_initial_stream_ack_deadline_seconds(mut self, seconds: i32) -> Self {
        self.initial_stream_ack_deadline_seconds = seconds;
        self
    }

    /// Sets the maximum number of outstanding (unacked) messages the default
    /// [`super::flow_control::SemaphoreFlowController`] admits.
    pub fn with_max_outstanding_messages(mut self, count: i64) -> Self {
        self.max_outstanding_messages = count;
        self
    }

    /// Sets the maximum outstanding (unacked) byte total the default
    /// [`super::flow_control::SemaphoreFlowController`] admits.
    pub fn with_max_outstanding_bytes(mut self, bytes: i64) -> Self {
        self.max_outstanding_bytes = bytes;
        self
    }
}
