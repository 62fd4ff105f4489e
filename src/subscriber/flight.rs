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

//! The messages-in-flight gate (§4.7): a counter plus a wait primitive used
//! at shutdown to drain in-flight receiver callbacks.

use std::sync::atomic::{AtomicI64, Ordering};

use tokio::sync::Notify;

#[derive(Debug, Default)]
pub(crate) struct InFlightGate {
    count: AtomicI64,
    notify: Notify,
}

impl InFlightGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adjusts the in-flight count by `delta` (positive when the dispatcher
    /// hands off a batch, negative as each receiver callback completes).
    /// Crossing down to zero wakes any shutdown waiter.
    pub(crate) fn adjust(&self, delta: i64) {
        let prev = self.count.fetch_add(delta, Ordering::AcqRel);
        if prev + delta <= 0 {
            self.notify.notify_waiters();
        }
    }

    pub(crate) fn count(&self) -> i64 {
        self.count.load(Ordering::Acquire)
    }

    /// Blocks until the in-flight count reaches zero (§4.1 shutdown step a).
    pub(crate) async fn wait_no_messages(&self) {
        loop {
            // Register for a notification *before* checking the count, or a
            // decrement landing between the check and the `notified().await`
            // would be missed.
            let notified = self.notify.notified();
            if self.count.load(Ordering::Acquire) <= 0 {
                return;
            }
            notified.await;
        }
    }
}
