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

//! `processReceivedMessages` (§4.2): hands each message in an inbound frame
//! to the user receiver, registers its lease, and wires the receiver's
//! eventual decision back to the extender, the flow controller, and the
//! latency distribution.

use std::sync::Arc;

use tokio::time::Instant;

use super::extender::{LeaseExtenderHandle, RegisterBatch};
use super::flight::InFlightGate;
use super::flow_control::FlowController;
use super::latency::LatencyDistribution;
use super::model::StreamingPullResponse;
use super::receiver::{Decision, Receiver};

/// Everything the dispatcher needs to process one inbound frame.
///
/// Held by the stream supervisor and handed one frame at a time; cheap to
/// clone since every field is already reference-counted or a clone handle.
#[derive(Clone)]
pub(crate) struct Dispatcher<R, F> {
    pub(crate) receiver: Arc<R>,
    pub(crate) flow_controller: Arc<F>,
    pub(crate) latency: Arc<LatencyDistribution>,
    pub(crate) in_flight: Arc<InFlightGate>,
    pub(crate) extender: LeaseExtenderHandle,
}

impl<R, F> Dispatcher<R, F>
where
    R: Receiver + 'static,
    F: FlowController + 'static,
{
    /// Processes one inbound response frame (§4.2).
    ///
    /// Registers all of the frame's messages under a single new expiration
    /// bucket, spawns one task per message to run the receiver and route its
    /// decision, then reserves flow-control credit for the whole batch. The
    /// reservation is awaited last (and only gates the caller's return, which
    /// in turn gates the supervisor's next `request(1)`) so an already
    /// delivered batch starts running through the receiver immediately even
    /// under backpressure, rather than sitting idle behind a blocked
    /// `reserve` -- per §4.2's ordering, reserving is what throttles the
    /// *next* inbound frame, not the receiver calls for this one.
    pub(crate) async fn dispatch(&self, response: StreamingPullResponse, stream_ack_deadline_seconds: i32) {
        if response.received_messages.is_empty() {
            return;
        }

        let now = Instant::now();
        let expiration = now + std::time::Duration::from_secs(stream_ack_deadline_seconds.max(0) as u64);
        let batch_count = response.received_messages.len();
        let batch_bytes: usize = response
            .received_messages
            .iter()
            .map(|m| m.message.data.len())
            .sum();

        self.extender.register(RegisterBatch {
            expiration,
            messages: response
                .received_messages
                .iter()
                .map(|m| (m.ack_id.clone(), m.message.data.len(), now))
                .collect(),
        });

        self.in_flight.adjust(batch_count as i64);

        for received in response.received_messages {
            let dispatcher = self.clone();
            let byte_size = received.message.data.len();
            tokio::spawn(async move {
                dispatcher.run_one(received.ack_id, received.message, byte_size, now).await;
            });
        }

        self.flow_controller.reserve(batch_count, batch_bytes).await;
    }

    async fn run_one(&self, ack_id: String, message: super::model::PubsubMessage, byte_size: usize, received_at: Instant) {
        let outcome = self.receiver.receive(message).await;
        let decision = match outcome {
            Ok(decision) => decision,
            Err(err) => {
                tracing::warn!(ack_id = %ack_id, error = %err, "receiver failed to process message");
                Decision::Nack
            }
        };

        if decision == Decision::Ack {
            let elapsed = Instant::now().saturating_duration_since(received_at);
            // Ceiling of receive-to-ack seconds (§4.6).
            let whole_seconds = elapsed.as_secs() + u64::from(elapsed.subsec_nanos() > 0);
            self.latency.record(whole_seconds);
        }

        self.extender.decide(ack_id, decision);
        self.flow_controller.release(1, byte_size);
        self.in_flight.adjust(-1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::flow_control::SemaphoreFlowController;
    use crate::subscriber::model::{PubsubMessage, ReceivedMessage};
    use crate::subscriber::outbound::OutboundSink;
    use crate::subscriber::receiver::FnReceiver;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn make_response(ack_ids: &[&str]) -> StreamingPullResponse {
        StreamingPullResponse {
            received_messages: ack_ids
                .iter()
                .map(|id| ReceivedMessage {
                    ack_id: id.to_string(),
                    message: PubsubMessage {
                        data: bytes::Bytes::from_static(&[0u8; 10]),
                        ..Default::default()
                    },
                    delivery_attempt: 1,
                })
                .collect(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn happy_ack_reaches_the_extender_and_releases_credit() {
        let outbound = OutboundSink::new();
        let (tx, mut rx) = mpsc::channel(16);
        outbound.set(tx);
        let extender = super::super::extender::LeaseExtender::spawn(Duration::from_secs(3), outbound);

        let flow_controller = Arc::new(SemaphoreFlowController::new(10, 1024));
        let in_flight = Arc::new(InFlightGate::new());
        let receiver = Arc::new(FnReceiver::new(|_m| async { Ok(Decision::Ack) }));

        let dispatcher = Dispatcher {
            receiver,
            flow_controller: flow_controller.clone(),
            latency: Arc::new(LatencyDistribution::new()),
            in_flight: in_flight.clone(),
            extender: extender.handle(),
        };

        dispatcher.dispatch(make_response(&["A1"]), 10).await;
        in_flight.wait_no_messages().await;

        tokio::time::advance(super::super::config::PENDING_ACKS_SEND_DELAY).await;
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.ack_ids, vec!["A1".to_string()]);

        extender.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn receiver_error_is_treated_as_nack() {
        let outbound = OutboundSink::new();
        let (tx, mut rx) = mpsc::channel(16);
        outbound.set(tx);
        let extender = super::super::extender::LeaseExtender::spawn(Duration::from_secs(3), outbound);

        let flow_controller = Arc::new(SemaphoreFlowController::new(10, 1024));
        let in_flight = Arc::new(InFlightGate::new());
        let receiver = Arc::new(FnReceiver::new(|_m| async {
            Err(crate::Error::Receiver {
                ack_id: "B1".into(),
                reason: "boom".into(),
            })
        }));

        let dispatcher = Dispatcher {
            receiver,
            flow_controller,
            latency: Arc::new(LatencyDistribution::new()),
            in_flight: in_flight.clone(),
            extender: extender.handle(),
        };

        dispatcher.dispatch(make_response(&["B1"]), 10).await;
        in_flight.wait_no_messages().await;

        tokio::time::advance(super::super::config::PENDING_ACKS_SEND_DELAY).await;
        let frame = rx.recv().await.unwrap();
        assert!(frame.ack_ids.is_empty());
        assert_eq!(frame.modify_deadline_ack_ids, vec!["B1".to_string()]);
        assert_eq!(frame.modify_deadline_seconds, vec![0]);

        extender.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn every_message_in_a_batch_is_dispatched() {
        let outbound = OutboundSink::new();
        let (tx, _rx) = mpsc::channel(16);
        outbound.set(tx);
        let extender = super::super::extender::LeaseExtender::spawn(Duration::from_secs(3), outbound);

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let receiver = Arc::new(FnReceiver::new(move |_m| {
            let seen = seen_clone.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(Decision::Ack)
            }
        }));
        let flow_controller = Arc::new(SemaphoreFlowController::new(10, 1024));
        let in_flight = Arc::new(InFlightGate::new());

        let dispatcher = Dispatcher {
            receiver,
            flow_controller,
            latency: Arc::new(LatencyDistribution::new()),
            in_flight: in_flight.clone(),
            extender: extender.handle(),
        };

        dispatcher.dispatch(make_response(&["A1", "A2", "A3"]), 10).await;
        in_flight.wait_no_messages().await;
        assert_eq!(seen.load(Ordering::SeqCst), 3);

        extender.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn receiver_runs_even_while_flow_control_credit_is_exhausted() {
        // §4.2's ordering only gates the *next* inbound frame on `reserve`;
        // an already-delivered message must reach the receiver immediately,
        // not sit blocked behind a saturated flow controller.
        let outbound = OutboundSink::new();
        let (tx, _rx) = mpsc::channel(16);
        outbound.set(tx);
        let extender = super::super::extender::LeaseExtender::spawn(Duration::from_secs(3), outbound);

        // No credit at all: `reserve` blocks forever.
        let flow_controller = Arc::new(SemaphoreFlowController::new(0, 0));
        let in_flight = Arc::new(InFlightGate::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let receiver = Arc::new(FnReceiver::new(move |_m| {
            let seen = seen_clone.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(Decision::Ack)
            }
        }));

        let dispatcher = Dispatcher {
            receiver,
            flow_controller,
            latency: Arc::new(LatencyDistribution::new()),
            in_flight: in_flight.clone(),
            extender: extender.handle(),
        };

        // `dispatch` itself blocks on the exhausted flow controller, so run it
        // as a background task and assert the receiver still ran.
        let dispatch = tokio::spawn(async move {
            dispatcher.dispatch(make_response(&["A1"]), 10).await;
        });
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(seen.load(Ordering::SeqCst), 1, "receiver should have run despite no flow-control credit");
        assert!(!dispatch.is_finished(), "dispatch should still be blocked on reserve");

        dispatch.abort();
        extender.shutdown().await;
    }
}
