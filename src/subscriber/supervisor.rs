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

//! The stream supervisor (§4.1): owns the bidirectional RPC, opens it,
//! drives the "request one frame, dispatch it, request the next" loop, and
//! reconnects with exponential backoff on retryable errors.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::config::INITIAL_CHANNEL_RECONNECT_BACKOFF;
use super::deadline::StreamAckDeadline;
use super::dispatcher::Dispatcher;
use super::flow_control::FlowController;
use super::lifecycle::{Lifecycle, State};
use super::model::StreamingPullRequest;
use super::outbound::OutboundSink;
use super::receiver::Receiver;
use super::stub::{PullStream, Stub};

/// Drives one subscriber's bidirectional stream for its entire lifetime,
/// reconnecting as needed (§4.1).
pub(crate) struct Supervisor<S, R, F>
where
    S: Stub,
{
    stub: Arc<S>,
    subscription: String,
    deadline: Arc<StreamAckDeadline>,
    outbound: OutboundSink,
    dispatcher: Dispatcher<R, F>,
    lifecycle: Arc<Lifecycle>,
    shutdown: CancellationToken,
}

impl<S, R, F> Supervisor<S, R, F>
where
    S: Stub + 'static,
    R: Receiver + 'static,
    F: FlowController + 'static,
{
    pub(crate) fn new(
        stub: Arc<S>,
        subscription: String,
        deadline: Arc<StreamAckDeadline>,
        outbound: OutboundSink,
        dispatcher: Dispatcher<R, F>,
        lifecycle: Arc<Lifecycle>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            stub,
            subscription,
            deadline,
            outbound,
            dispatcher,
            lifecycle,
            shutdown,
        }
    }

    /// Runs the reconnect loop until shut down or a fatal error occurs
    /// (§4.1 steps 5-6).
    pub(crate) async fn run(mut self) {
        self.lifecycle.transition_to(State::Starting);
        let mut backoff = INITIAL_CHANNEL_RECONNECT_BACKOFF;
        let mut first_attempt = true;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            match self.open_and_serve(first_attempt).await {
                StreamOutcome::ShuttingDown => break,
                StreamOutcome::ClosedCleanly => {
                    tracing::debug!("stream closed cleanly, reopening");
                    backoff = INITIAL_CHANNEL_RECONNECT_BACKOFF;
                    first_attempt = false;
                }
                StreamOutcome::Error(err) => {
                    if !self.lifecycle.is_alive() {
                        break;
                    }
                    if err.is_retryable() {
                        tracing::warn!(error = %err, backoff = ?backoff, "stream error, reconnecting");
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = self.shutdown.cancelled() => break,
                        }
                        backoff *= 2;
                        first_attempt = false;
                    } else {
                        tracing::error!(error = %err, "fatal stream error");
                        self.lifecycle.transition_to(State::Failed);
                        break;
                    }
                }
            }
        }

        self.outbound.clear();
    }

    async fn open_and_serve(&mut self, first_attempt: bool) -> StreamOutcome {
        let _ = first_attempt;
        let (request_tx, request_rx) = mpsc::channel(1);
        let initial = StreamingPullRequest::initial(&self.subscription, self.deadline.get());
        if request_tx.send(initial).await.is_err() {
            return StreamOutcome::Error(crate::Error::NotAlive);
        }

        let mut stream = match self.stub.streaming_pull(request_rx).await {
            Ok(stream) => stream,
            Err(err) => return StreamOutcome::Error(err),
        };

        self.outbound.set(request_tx);
        self.lifecycle.transition_to(State::Running);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return StreamOutcome::ShuttingDown,
                next = stream.next_message() => {
                    match next {
                        Ok(Some(response)) => {
                            self.dispatcher.dispatch(response, self.deadline.get()).await;
                        }
                        Ok(None) => return StreamOutcome::ClosedCleanly,
                        Err(err) => return StreamOutcome::Error(err),
                    }
                }
            }
        }
    }
}

enum StreamOutcome {
    ShuttingDown,
    ClosedCleanly,
    Error(crate::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::flight::InFlightGate;
    use crate::subscriber::flow_control::SemaphoreFlowController;
    use crate::subscriber::latency::LatencyDistribution;
    use crate::subscriber::model::{PubsubMessage, ReceivedMessage, StreamingPullResponse};
    use crate::subscriber::receiver::FnReceiver;
    use crate::subscriber::stub::tests::{MockPullStream, MockStub};
    use crate::subscriber::extender::LeaseExtender;
    use crate::error::{Code, Status};

    fn make_dispatcher(
        extender: &LeaseExtender,
    ) -> Dispatcher<FnReceiver<impl Fn(PubsubMessage) -> std::future::Ready<crate::Result<super::super::receiver::Decision>> + Send + Sync>, SemaphoreFlowController> {
        Dispatcher {
            receiver: Arc::new(FnReceiver::new(|_m| std::future::ready(Ok(super::super::receiver::Decision::Ack)))),
            flow_controller: Arc::new(SemaphoreFlowController::new(100, 1024 * 1024)),
            latency: Arc::new(LatencyDistribution::new()),
            in_flight: Arc::new(InFlightGate::new()),
            extender: extender.handle(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn opens_stream_and_dispatches_one_response() {
        let outbound = OutboundSink::new();
        let extender = LeaseExtender::spawn(Duration::from_secs(3), outbound.clone());
        let dispatcher = make_dispatcher(&extender);
        let lifecycle = Arc::new(Lifecycle::new());
        let deadline = Arc::new(StreamAckDeadline::new(10));

        let (resp_tx, resp_rx) = mpsc::channel(4);
        let mut mock = MockStub::new();
        mock.expect_streaming_pull()
            .times(1)
            .return_once(move |_rx| Ok(MockPullStream(resp_rx)));

        resp_tx
            .send(Ok(StreamingPullResponse {
                received_messages: vec![ReceivedMessage {
                    ack_id: "A1".to_string(),
                    message: PubsubMessage::default(),
                    delivery_attempt: 1,
                }],
            }))
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        let supervisor = Supervisor::new(
            Arc::new(mock),
            "projects/p/subscriptions/s".to_string(),
            deadline,
            outbound,
            dispatcher,
            lifecycle.clone(),
            shutdown.clone(),
        );

        let join = tokio::spawn(supervisor.run());
        tokio::task::yield_now().await;
        assert_eq!(lifecycle.state(), State::Running);

        shutdown.cancel();
        join.await.unwrap();
        drop(resp_tx);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_error_triggers_backoff_reconnect() {
        let outbound = OutboundSink::new();
        let extender = LeaseExtender::spawn(Duration::from_secs(3), outbound.clone());
        let dispatcher = make_dispatcher(&extender);
        let lifecycle = Arc::new(Lifecycle::new());
        let deadline = Arc::new(StreamAckDeadline::new(10));

        let mut mock = MockStub::new();
        mock.expect_streaming_pull().times(1).returning(|_rx| {
            let (_tx, rx) = mpsc::channel::<Result<StreamingPullResponse, Status>>(1);
            drop(_tx);
            Ok(MockPullStream(rx))
        });
        mock.expect_streaming_pull().times(1).returning(|_rx| {
            let (tx, rx) = mpsc::channel::<Result<StreamingPullResponse, Status>>(1);
            std::mem::forget(tx);
            Ok(MockPullStream(rx))
        });

        let shutdown = CancellationToken::new();
        let supervisor = Supervisor::new(
            Arc::new(mock),
            "projects/p/subscriptions/s".to_string(),
            deadline,
            outbound,
            dispatcher,
            lifecycle.clone(),
            shutdown.clone(),
        );

        let join = tokio::spawn(supervisor.run());
        // First stream closes cleanly (channel dropped -> None), triggering
        // an immediate reopen with no backoff.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(lifecycle.state(), State::Running);

        shutdown.cancel();
        join.await.unwrap();
        let _ = Code::Unavailable;
    }
}
