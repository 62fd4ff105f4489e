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

//! The lease extender actor (§4.3): the single task that owns the
//! [`ExpirationTable`] and the [`AckBatcher`], and reacts to newly received
//! batches, ack/nack decisions, and its own timers.
//!
//! Following `lease_loop.rs`'s actor-over-channels shape, a single task
//! owning this state needs no locks at all: the `alarmsLock`/table monitor/
//! pending-set monitors a naive port of §5's concurrency table would call
//! for are subsumed by "only one task ever touches this state". Registration
//! and decisions arrive as messages; the extension
//! and debounce alarms are just `tokio::time::sleep_until` futures recomputed
//! every loop iteration from the table's current earliest expiration, so
//! there is no separate "cancel and rearm" bookkeeping to get wrong.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::batcher::AckBatcher;
use super::config::PENDING_ACKS_SEND_DELAY;
use super::lease::{ExpirationTable, LeaseHandle};
use super::outbound::OutboundSink;
use super::receiver::Decision;

/// A freshly delivered batch of messages to place under one expiration
/// bucket (§4.2).
pub(crate) struct RegisterBatch {
    pub(crate) expiration: Instant,
    pub(crate) messages: Vec<(String, usize, Instant)>,
}

/// A cheaply `Clone`-able handle for feeding the extender actor, held by the
/// dispatcher and by every per-message completion task.
#[derive(Debug, Clone)]
pub(crate) struct LeaseExtenderHandle {
    register_tx: mpsc::UnboundedSender<RegisterBatch>,
    decision_tx: mpsc::UnboundedSender<(String, Decision)>,
}

impl LeaseExtenderHandle {
    /// Registers a freshly received batch (§4.2).
    pub(crate) fn register(&self, batch: RegisterBatch) {
        let _ = self.register_tx.send(batch);
    }

    /// Records a message's terminal decision (§4.2 completion path).
    pub(crate) fn decide(&self, ack_id: String, decision: Decision) {
        let _ = self.decision_tx.send((ack_id, decision));
    }
}

/// Owns the extender actor task: spawned once per stream supervisor and torn
/// down exactly once at shutdown.
#[derive(Debug)]
pub(crate) struct LeaseExtender {
    join: tokio::task::JoinHandle<()>,
    handle: LeaseExtenderHandle,
    shutdown: CancellationToken,
}

impl LeaseExtender {
    pub(crate) fn spawn(padding: Duration, outbound: OutboundSink) -> Self {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (decision_tx, decision_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let actor = Actor {
            table: ExpirationTable::new(),
            index: HashMap::new(),
            batcher: AckBatcher::new(),
            padding,
            outbound,
            register_rx,
            decision_rx,
            shutdown: shutdown.clone(),
        };
        let join = tokio::spawn(actor.run());

        Self {
            join,
            handle: LeaseExtenderHandle {
                register_tx,
                decision_tx,
            },
            shutdown,
        }
    }

    /// A cloneable handle for the dispatcher and completion-path tasks.
    pub(crate) fn handle(&self) -> LeaseExtenderHandle {
        self.handle.clone()
    }

    /// Registers a freshly received batch (§4.2).
    pub(crate) fn register(&self, batch: RegisterBatch) {
        self.handle.register(batch);
    }

    /// Records a message's terminal decision (§4.2 completion path).
    pub(crate) fn decide(&self, ack_id: String, decision: Decision) {
        self.handle.decide(ack_id, decision);
    }

    /// Cancels the extension/debounce alarms, runs a final synchronous
    /// flush, and waits for the actor task to exit (§4.1 shutdown b, c).
    pub(crate) async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.join.await;
    }
}

struct Actor {
    table: ExpirationTable,
    /// Ack id -> handle, so acks/nacks can mark a handle decided in O(1)
    /// without the extender's sweep needing any index of its own.
    index: HashMap<String, Arc<LeaseHandle>>,
    batcher: AckBatcher,
    padding: Duration,
    outbound: OutboundSink,
    register_rx: mpsc::UnboundedReceiver<RegisterBatch>,
    decision_rx: mpsc::UnboundedReceiver<(String, Decision)>,
    shutdown: CancellationToken,
}

/// A sentinel far enough in the future that a "no alarm scheduled" timer
/// never fires during any realistic test or process lifetime.
const NO_ALARM: Duration = Duration::from_secs(86_400 * 365);

impl Actor {
    async fn run(mut self) {
        let mut debounce_deadline: Option<Instant> = None;

        loop {
            let now = Instant::now();
            let extension_at = self
                .table
                .earliest_expiration()
                .map(|exp| exp.checked_sub(self.padding).unwrap_or(now))
                .unwrap_or(now + NO_ALARM);
            let debounce_at = debounce_deadline.unwrap_or(now + NO_ALARM);

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                batch = self.register_rx.recv() => {
                    match batch {
                        None => break,
                        Some(batch) => self.handle_register(batch),
                    }
                }
                decision = self.decision_rx.recv() => {
                    if let Some((ack_id, decision)) = decision {
                        if self.handle_decision(ack_id, decision) && debounce_deadline.is_none() {
                            debounce_deadline = Some(Instant::now() + PENDING_ACKS_SEND_DELAY);
                        }
                    }
                }
                _ = tokio::time::sleep_until(extension_at) => {
                    debounce_deadline = None;
                    self.sweep_and_flush(now).await;
                }
                _ = tokio::time::sleep_until(debounce_at) => {
                    debounce_deadline = None;
                    self.flush().await;
                }
            }
        }

        // The cancellation branch above is `biased` ahead of the channels, so
        // it can fire while a decision (already sent by a completion task
        // that has since decremented in-flight) is still sitting unread in
        // `decision_rx`. Drain both channels with `try_recv` before the final
        // flush so a decision never goes missing on the way out, mirroring
        // `lease_loop.rs`'s `shutdown()` helper in the teacher crate.
        self.drain_pending_channels();
        self.flush().await;
    }

    /// Consumes every message already buffered in `register_rx`/`decision_rx`
    /// without blocking. Run once, right after the shutdown signal is
    /// observed and before the final flush, so in-flight sends that raced
    /// with cancellation are not lost.
    fn drain_pending_channels(&mut self) {
        while let Ok(batch) = self.register_rx.try_recv() {
            self.handle_register(batch);
        }
        while let Ok((ack_id, decision)) = self.decision_rx.try_recv() {
            self.handle_decision(ack_id, decision);
        }
    }

    fn handle_register(&mut self, batch: RegisterBatch) {
        let (_key, handles) = self.table.insert_batch(batch.expiration, batch.messages);
        for handle in handles {
            self.index.insert(handle.ack_id.clone(), handle);
        }
    }

    /// Returns `true` if this decision newly populated the batcher (i.e. the
    /// debounce alarm should be armed if it is not already).
    fn handle_decision(&mut self, ack_id: String, decision: Decision) -> bool {
        let Some(handle) = self.index.remove(&ack_id) else {
            // Already decided (duplicate) or swept away; nothing to do. The
            // server is idempotent over ack ids so this is not an error.
            return false;
        };
        if !handle.mark_decided() {
            return false;
        }
        match decision {
            Decision::Ack => self.batcher.add_ack(ack_id),
            Decision::Nack => self.batcher.add_nack(ack_id),
        }
        true
    }

    async fn sweep_and_flush(&mut self, now: Instant) {
        let cut_over = now + self.padding + Duration::from_millis(500);
        let (modify_deadlines, _next_alarm) = self.table.sweep(now, cut_over);
        // Any handle the sweep dropped for being decided is also gone from
        // our index's perspective already (removed in `handle_decision`); any
        // survivor is still indexed and still pending.
        self.send_frames(modify_deadlines).await;
    }

    async fn flush(&mut self) {
        self.send_frames(Vec::new()).await;
    }

    async fn send_frames(&mut self, modify_deadlines: Vec<(String, i32)>) {
        if modify_deadlines.is_empty() && self.batcher.is_empty() {
            return;
        }
        let frames = self.batcher.build_requests(modify_deadlines);
        tracing::debug!(frame_count = frames.len(), "flushing ack/nack batch");
        for frame in frames {
            self.outbound.send(frame).await;
        }
    }
}
