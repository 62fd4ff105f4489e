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

//! The RPC transport boundary (§1, §4.9, §6).
//!
//! The wire framing itself -- protobuf encoding, gRPC/HTTP2 details, per-call
//! credentials -- is an out-of-scope collaborator. This module only needs a
//! seam narrow enough to mock: something that accepts an outbound request
//! channel and hands back an inbound response stream.

use tokio::sync::mpsc;

use super::model::{StreamingPullRequest, StreamingPullResponse};

/// One open `StreamingPull` stream's inbound half.
///
/// Automatic inbound flow control must be disableable at the transport; the
/// supervisor calls `next_message` exactly once per frame it is ready to
/// accept (§4.1, §6).
pub trait PullStream: std::fmt::Debug + Send {
    fn next_message(
        &mut self,
    ) -> impl std::future::Future<Output = crate::Result<Option<StreamingPullResponse>>> + Send;
}

/// Abstracts the bidirectional `StreamingPull` RPC (§1, §6).
///
/// The wire framing, per-call credentials, and channel transport itself are
/// out-of-scope collaborators (§1); a host wires a concrete type implementing
/// this trait over its own gRPC stack. Tests substitute a `mockall`-generated
/// mock driven by an in-memory channel.
#[async_trait::async_trait]
pub trait Stub: std::fmt::Debug + Send + Sync {
    type Stream: PullStream;

    async fn streaming_pull(
        &self,
        request_rx: mpsc::Receiver<StreamingPullRequest>,
    ) -> crate::Result<Self::Stream>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Status;

    /// An in-memory inbound stream: an mpsc receiver of pre-scripted
    /// responses (or errors), standing in for a tonic-style response stream.
    #[derive(Debug)]
    pub(crate) struct MockPullStream(pub(crate) mpsc::Receiver<Result<StreamingPullResponse, Status>>);

    impl PullStream for MockPullStream {
        async fn next_message(&mut self) -> crate::Result<Option<StreamingPullResponse>> {
            match self.0.recv().await {
                None => Ok(None),
                Some(Ok(resp)) => Ok(Some(resp)),
                Some(Err(status)) => Err(crate::Error::Transport(status)),
            }
        }
    }

    mockall::mock! {
        #[derive(Debug)]
        pub(crate) Stub {}
        #[async_trait::async_trait]
        impl Stub for Stub {
            type Stream = MockPullStream;
            async fn streaming_pull(
                &self,
                request_rx: mpsc::Receiver<StreamingPullRequest>,
            ) -> crate::Result<MockPullStream>;
        }
    }
}
