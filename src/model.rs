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

//! Plain request/response types for the streaming pull RPC.
//!
//! The wire framing itself (protobuf encoding, gRPC HTTP/2 details) is an
//! out-of-scope collaborator, see the crate docs. These types only need to
//! carry the fields the core reads and writes, per the RPC stream contract.

use std::collections::HashMap;

use bytes::Bytes;

/// An inbound message delivered by the service.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PubsubMessage {
    pub data: Bytes,
    pub attributes: HashMap<String, String>,
    pub message_id: String,
    pub ordering_key: String,
}

/// One message delivered on a `StreamingPullResponse`, paired with its ack id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub message: PubsubMessage,
    pub delivery_attempt: i32,
}

/// An inbound frame: zero or more newly delivered messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamingPullResponse {
    pub received_messages: Vec<ReceivedMessage>,
}

/// An outbound frame.
///
/// `subscription` is only meaningful on the very first request of a stream.
/// `ack_ids`, and the parallel `modify_deadline_ack_ids` /
/// `modify_deadline_seconds` arrays, may be populated on any request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamingPullRequest {
    pub subscription: String,
    pub stream_ack_deadline_seconds: i32,
    pub ack_ids: Vec<String>,
    pub modify_deadline_ack_ids: Vec<String>,
    pub modify_deadline_seconds: Vec<i32>,
}

impl StreamingPullRequest {
    /// Builds the initial request naming the subscription and the starting
    /// stream-wide ack deadline (§4.1 step 2).
    pub fn initial(subscription: impl Into<String>, stream_ack_deadline_seconds: i32) -> Self {
        Self {
            subscription: subscription.into(),
            stream_ack_deadline_seconds,
            ..Default::default()
        }
    }

    /// Builds a request that only updates the stream-wide ack deadline (§4.5
    /// step 3). Carries no acks or modify-deadline pairs.
    pub fn deadline_update(stream_ack_deadline_seconds: i32) -> Self {
        Self {
            stream_ack_deadline_seconds,
            ..Default::default()
        }
    }

    /// Whether this request carries no payload at all (used to avoid
    /// emitting empty frames from the batcher).
    pub fn is_empty(&self) -> bool {
        self.ack_ids.is_empty() && self.modify_deadline_ack_ids.is_empty()
    }
}
