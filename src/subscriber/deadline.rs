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

//! The adaptive deadline controller (§4.5): a slow periodic task that moves
//! the stream-wide ack deadline toward the 99.9th percentile of observed
//! handling latency.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::config::{
    ACK_DEADLINE_UPDATE_PERIOD, MAX_ACK_DEADLINE_SECONDS, MIN_ACK_DEADLINE_SECONDS,
    PERCENTILE_FOR_ACK_DEADLINE_UPDATES,
};
use super::latency::LatencyDistribution;
use super::model::StreamingPullRequest;
use super::outbound::OutboundSink;

/// The current stream-wide ack deadline, shared between the controller and
/// the stream supervisor (the supervisor reads it when (re)establishing a
/// stream; see §4.1 step 2).
#[derive(Debug)]
pub(crate) struct StreamAckDeadline {
    seconds: AtomicI32,
}

impl StreamAckDeadline {
    pub(crate) fn new(initial_seconds: i32) -> Self {
        Self {
            seconds: AtomicI32::new(clamp(initial_seconds)),
        }
    }

    pub(crate) fn get(&self) -> i32 {
        self.seconds.load(Ordering::Acquire)
    }

    fn set(&self, seconds: i32) {
        self.seconds.store(seconds, Ordering::Release);
    }
}

fn clamp(seconds: i32) -> i32 {
    seconds.clamp(MIN_ACK_DEADLINE_SECONDS, MAX_ACK_DEADLINE_SECONDS)
}

/// Owns the periodic deadline-recomputation task.
#[derive(Debug)]
pub(crate) struct DeadlineController {
    join: tokio::task::JoinHandle<()>,
    shutdown: CancellationToken,
}

impl DeadlineController {
    pub(crate) fn spawn(
        deadline: Arc<StreamAckDeadline>,
        latency: Arc<LatencyDistribution>,
        padding_seconds: i32,
        outbound: OutboundSink,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let task_shutdown = shutdown.clone();
        let join = tokio::spawn(async move {
            let mut tick = tokio::time::interval(ACK_DEADLINE_UPDATE_PERIOD);
            tick.tick().await; // first tick fires immediately; consume it.
            loop {
                tokio::select! {
                    _ = task_shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        run_tick(&deadline, &latency, padding_seconds, &outbound).await;
                    }
                }
            }
        });
        Self { join, shutdown }
    }

    pub(crate) async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.join.await;
    }
}

/// Runs one tick of §4.5's recomputation, used directly by tests so the
/// clamp/compare/push logic can be verified without needing a full
/// `DeadlineController` task and its `Interval`.
async fn run_tick(
    deadline: &StreamAckDeadline,
    latency: &LatencyDistribution,
    padding_seconds: i32,
    outbound: &OutboundSink,
) {
    let Some(p999) = latency.percentile(PERCENTILE_FOR_ACK_DEADLINE_UPDATES) else {
        return;
    };
    let candidate = clamp(p999.max(padding_seconds));
    let current = deadline.get();
    if candidate != current {
        deadline.set(candidate);
        tracing::debug!(from = current, to = candidate, "updating stream ack deadline");
        outbound.send(StreamingPullRequest::deadline_update(candidate)).await;
    }
}
