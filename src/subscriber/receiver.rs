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

//! The user receiver boundary (§6): an asynchronous function from message to
//! ack/nack decision.
//!
//! Modeled as a trait rather than a bare closure so hosts can hold state
//! (a parsed config, a downstream client) across calls, the same shape
//! `Handler`/`AtLeastOnce` gives the ack/nack side.

use super::model::PubsubMessage;

/// The decision a receiver makes about a delivered message (§1, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Ack,
    Nack,
}

/// A user-supplied message handler.
///
/// The receiver must not block its calling task indefinitely: the framework
/// gates how many messages are outstanding via the [`super::flow_control::FlowController`],
/// not by limiting how long any single call may run.
///
/// Returning `Err` is treated identically to returning `Ok(Decision::Nack)`,
/// except that it is additionally logged at `WARN` with the message's ack id
/// (§4.2, §7).
#[async_trait::async_trait]
pub trait Receiver: Send + Sync {
    async fn receive(&self, message: PubsubMessage) -> crate::Result<Decision>;
}

/// Adapts a plain async closure into a [`Receiver`].
///
/// Most callers only need a single function; implementing a whole trait for
/// that is unnecessary ceremony.
pub struct FnReceiver<F>(F);

impl<F> FnReceiver<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait::async_trait]
impl<F, Fut> Receiver for FnReceiver<F>
where
    F: Fn(PubsubMessage) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = crate::Result<Decision>> + Send,
{
    async fn receive(&self, message: PubsubMessage) -> crate::Result<Decision> {
        (self.0)(message).await
    }
}
