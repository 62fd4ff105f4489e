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

//! The flow controller boundary (§6).
//!
//! Bounding outstanding messages and bytes is explicitly out of scope for
//! this core (§1): it is injected as a collaborator the dispatcher reserves
//! credit from and releases credit to. [`SemaphoreFlowController`] is a
//! reasonable default built from `tokio::sync::Semaphore`; hosts that already
//! track outstanding bytes/counts elsewhere can supply their own.

use std::sync::Arc;

use tokio::sync::Semaphore;

/// Bounds outstanding messages and bytes reserved by the dispatcher (§6).
///
/// `reserve` is expected to block the caller rather than reject -- the
/// dispatcher treats a successful reservation as unconditional backpressure,
/// not a thing that can fail (§4.2).
#[async_trait::async_trait]
pub trait FlowController: std::fmt::Debug + Send + Sync {
    /// Blocks until `count` messages and `bytes` bytes of credit are
    /// available, then reserves them.
    async fn reserve(&self, count: usize, bytes: usize);

    /// Returns previously reserved credit.
    fn release(&self, count: usize, bytes: usize);
}

/// A [`FlowController`] backed by two `tokio::sync::Semaphore`s, one for
/// message count and one for byte size.
#[derive(Debug)]
pub struct SemaphoreFlowController {
    messages: Arc<Semaphore>,
    bytes: Arc<Semaphore>,
}

impl SemaphoreFlowController {
    pub fn new(max_outstanding_messages: usize, max_outstanding_bytes: usize) -> Self {
        Self {
            messages: Arc::new(Semaphore::new(max_outstanding_messages)),
            bytes: Arc::new(Semaphore::new(max_outstanding_bytes)),
        }
    }
}

#[async_trait::async_trait]
impl FlowController for SemaphoreFlowController {
    async fn reserve(&self, count: usize, bytes: usize) {
        // Acquire in a fixed order (messages, then bytes) to avoid deadlocking
        // against a hypothetical second caller reserving in the other order.
        let msg_permits = self
            .messages
            .clone()
            .acquire_many_owned(count as u32)
            .await
            .expect("semaphore is never closed");
        let byte_permits = self
            .bytes
            .clone()
            .acquire_many_owned(bytes.max(1) as u32)
            .await
            .expect("semaphore is never closed");
        // Leak the permits: `release` below re-adds them explicitly, since the
        // reservation and its release happen on different call sites (the
        // dispatcher and the completion path) rather than via RAII scope.
        msg_permits.forget();
        byte_permits.forget();
    }

    fn release(&self, count: usize, bytes: usize) {
        self.messages.add_permits(count);
        self.bytes.add_permits(bytes.max(1));
    }
}
