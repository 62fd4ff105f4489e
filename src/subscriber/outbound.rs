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

//! A reconnect-stable handle to "whichever stream is currently open".
//!
//! The batcher, the lease extender, and the deadline controller all push
//! request frames onto the outbound half of the bidirectional stream, but
//! none of them own the stream: the supervisor does, and it replaces the
//! outbound sender on every reconnect (§4.1). Routing every push through this
//! cell resolves the second open question in §9 -- a deadline-controller tick
//! that fires mid-reconnect lands on whatever stream is current, or is a
//! harmless no-op against a closed channel if none is.

use tokio::sync::{mpsc, watch};

use super::model::StreamingPullRequest;

/// A `Clone`-able sink that forwards to the current stream's outbound
/// channel, if one is open.
#[derive(Debug, Clone)]
pub(crate) struct OutboundSink {
    current: watch::Sender<Option<mpsc::Sender<StreamingPullRequest>>>,
}

impl OutboundSink {
    pub(crate) fn new() -> Self {
        Self {
            current: watch::Sender::new(None),
        }
    }

    /// Installs the outbound sender for a freshly opened stream, replacing
    /// whatever was there before.
    pub(crate) fn set(&self, sender: mpsc::Sender<StreamingPullRequest>) {
        self.current.send_replace(Some(sender));
    }

    /// Clears the current sender, e.g. because the stream closed.
    pub(crate) fn clear(&self) {
        self.current.send_replace(None);
    }

    /// Pushes a request onto the current stream. Returns `false` if there is
    /// no current stream, or if the current stream's channel is closed --
    /// both are logged as a dropped frame rather than retried, per §9.
    pub(crate) async fn send(&self, request: StreamingPullRequest) -> bool {
        let sender = self.current.borrow().clone();
        match sender {
            Some(tx) => match tx.send(request).await {
                Ok(()) => true,
                Err(_) => {
                    tracing::debug!("dropped outbound frame: stream channel closed");
                    false
                }
            },
            None => {
                tracing::debug!("dropped outbound frame: no stream currently open");
                false
            }
        }
    }
}

impl Default for OutboundSink {
    fn default() -> Self {
        Self::new()
    }
}
