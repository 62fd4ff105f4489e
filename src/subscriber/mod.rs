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

//! The streaming pull subscriber core.
//!
//! [`StreamingPullSubscriber`] is the lifecycle façade (§4.8): it owns every
//! other component in this module and exposes the `CREATED -> STARTING ->
//! RUNNING -> STOPPING -> TERMINATED`/`FAILED` state machine to the host as
//! `start`/`stop`. Everything else here is an implementation detail reachable
//! only through that façade, the `Receiver`/`FlowController`/`Stub` traits a
//! host implements, or [`SubscriberConfig`].

mod batcher;
pub mod config;
mod deadline;
mod dispatcher;
mod extender;
mod flight;
pub mod flow_control;
mod latency;
mod lease;
mod lifecycle;
mod outbound;
pub mod receiver;
pub mod stub;

/// Plain request/response/message types for the streaming pull RPC (§3, §6).
///
/// Re-exported here (rather than duplicated) so every submodule can write
/// `super::model::Foo` for its wire types.
pub(crate) use crate::model;

mod supervisor;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use config::SubscriberConfig;
pub use flow_control::{FlowController, SemaphoreFlowController};
pub use lifecycle::State;
pub use receiver::{Decision, FnReceiver, Receiver};
pub use stub::{PullStream, Stub};

use deadline::{DeadlineController, StreamAckDeadline};
use dispatcher::Dispatcher;
use extender::LeaseExtender;
use flight::InFlightGate;
use latency::LatencyDistribution;
use lifecycle::Lifecycle;
use outbound::OutboundSink;
use supervisor::Supervisor;

/// A streaming pull subscriber: the lifecycle façade described in §4.8.
///
/// Owns the stream supervisor, the lease extender, and the deadline
/// controller, and wires them to a host-supplied [`Stub`] (the RPC
/// transport), [`Receiver`] (the message handler), and [`FlowController`].
/// `S`, `R`, and `F` default to nothing in particular -- a host names
/// concrete types, or uses [`SemaphoreFlowController`] and [`FnReceiver`] for
/// the latter two when a bespoke implementation is not needed. Most hosts
/// reach for [`StreamingPullSubscriber::builder`] rather than [`Self::new`]
/// directly; see its docs for the fluent configuration surface (§4.10).
///
/// # Example
///
/// ```ignore
/// use google_cloud_pubsub_subscriber::subscriber::{Decision, FnReceiver, StreamingPullSubscriber};
///
/// # async fn sample<S: google_cloud_pubsub_subscriber::subscriber::Stub + 'static>(stub: S) -> google_cloud_pubsub_subscriber::Result<()> {
/// let receiver = FnReceiver::new(|_message| async { Ok(Decision::Ack) });
///
/// let mut subscriber = StreamingPullSubscriber::builder(
///     "projects/my-project/subscriptions/my-subscription",
///     stub,
///     receiver,
/// )
/// .with_max_outstanding_messages(2_000)
/// .start()
/// .await?;
/// // ... run until the host wants to stop ...
/// subscriber.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct StreamingPullSubscriber<S, R, F>
where
    S: Stub + 'static,
    R: Receiver + 'static,
    F: FlowController + 'static,
{
    config: SubscriberConfig,
    stub: Arc<S>,
    receiver: Arc<R>,
    flow_controller: Arc<F>,
    lifecycle: Arc<Lifecycle>,
    in_flight: Arc<InFlightGate>,
    running: Option<Running>,
}

/// The task handles and collaborator shutdown hooks that only exist while
/// the subscriber is `STARTING`/`RUNNING` (§4.1 shutdown, §4.8).
struct Running {
    extender: LeaseExtender,
    deadline_controller: DeadlineController,
    supervisor_shutdown: CancellationToken,
    supervisor_join: JoinHandle<()>,
}

impl<S, R, F> StreamingPullSubscriber<S, R, F>
where
    S: Stub + 'static,
    R: Receiver + 'static,
    F: FlowController + 'static,
{
    /// Builds a subscriber for `config.subscription()`, not yet started.
    pub fn new(config: SubscriberConfig, stub: S, receiver: R, flow_controller: F) -> Self {
        Self {
            config,
            stub: Arc::new(stub),
            receiver: Arc::new(receiver),
            flow_controller: Arc::new(flow_controller),
            lifecycle: Arc::new(Lifecycle::new()),
            in_flight: Arc::new(InFlightGate::new()),
            running: None,
        }
    }

    /// The subscriber's current lifecycle state (§4.8).
    pub fn state(&self) -> State {
        self.lifecycle.state()
    }

    /// True while `STARTING` or `RUNNING` (§4.8).
    pub fn is_alive(&self) -> bool {
        self.lifecycle.is_alive()
    }

    /// Starts the subscriber: spawns the lease extender, the deadline
    /// controller, and the stream supervisor, then returns once the
    /// supervisor has begun its reconnect loop (§4.1 steps 1-4).
    ///
    /// Returns [`crate::Error::NotAlive`] if called more than once.
    pub async fn start(&mut self) -> crate::Result<()> {
        if !matches!(self.lifecycle.state(), State::Created) {
            return Err(crate::Error::NotAlive);
        }

        let outbound = OutboundSink::new();
        let latency = Arc::new(LatencyDistribution::new());

        let extender = LeaseExtender::spawn(self.config.padding(), outbound.clone());
        let dispatcher = Dispatcher {
            receiver: self.receiver.clone(),
            flow_controller: self.flow_controller.clone(),
            latency: latency.clone(),
            in_flight: self.in_flight.clone(),
            extender: extender.handle(),
        };

        let deadline = Arc::new(StreamAckDeadline::new(
            self.config.initial_stream_ack_deadline_seconds(),
        ));
        let padding_seconds = self.config.padding().as_secs() as i32;
        let deadline_controller = DeadlineController::spawn(
            deadline.clone(),
            latency,
            padding_seconds,
            outbound.clone(),
        );

        let supervisor_shutdown = CancellationToken::new();
        let supervisor = Supervisor::new(
            self.stub.clone(),
            self.config.subscription().to_string(),
            deadline,
            outbound,
            dispatcher,
            self.lifecycle.clone(),
            supervisor_shutdown.clone(),
        );
        let supervisor_join = tokio::spawn(supervisor.run());

        self.running = Some(Running {
            extender,
            deadline_controller,
            supervisor_shutdown,
            supervisor_join,
        });

        Ok(())
    }

    /// Stops the subscriber, in the order §4.1 "Shutdown" specifies: (a)
    /// drain in-flight receiver callbacks, (b)-(c) cancel the lease
    /// extender's alarms and run its final flush, (d) cancel the deadline
    /// controller, (e) close the stream.
    ///
    /// A no-op if the subscriber was never started or is already stopped.
    pub async fn stop(&mut self) -> crate::Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        if matches!(self.lifecycle.state(), State::Running | State::Starting) {
            self.lifecycle.transition_to(State::Stopping);
        }

        self.in_flight.wait_no_messages().await;
        running.extender.shutdown().await;
        running.deadline_controller.shutdown().await;
        running.supervisor_shutdown.cancel();
        let _ = running.supervisor_join.await;

        if !matches!(self.lifecycle.state(), State::Failed) {
            self.lifecycle.transition_to(State::Terminated);
        }
        Ok(())
    }
}

impl<S, R> StreamingPullSubscriber<S, R, SemaphoreFlowController>
where
    S: Stub + 'static,
    R: Receiver + 'static,
{
    /// Starts building a subscriber for `subscription`, wired to the default
    /// [`SemaphoreFlowController`] (§4.10).
    ///
    /// Returns a [`SubscriberBuilder`] with fluent `with_*` setters mirroring
    /// [`SubscriberConfig`]'s; call [`SubscriberBuilder::start`] to build and
    /// start the subscriber in one step.
    pub fn builder(subscription: impl Into<String>, stub: S, receiver: R) -> SubscriberBuilder<S, R> {
        SubscriberBuilder::new(subscription, stub, receiver)
    }
}

/// Fluent builder for a [`StreamingPullSubscriber`] (§4.10).
///
/// Mirrors `subscriber/builder.rs`'s `StreamingPull` in the teacher crate:
/// a single terminal `.start()` both constructs the subscriber and starts it,
/// rather than splitting `build()` from `start()`. `max_outstanding_messages`
/// and `max_outstanding_bytes` size the default [`SemaphoreFlowController`]
/// this builder constructs; a host that needs a bespoke [`FlowController`]
/// should use [`StreamingPullSubscriber::new`] directly instead.
pub struct SubscriberBuilder<S, R> {
    config: SubscriberConfig,
    stub: S,
    receiver: R,
}

impl<S, R> SubscriberBuilder<S, R>
where
    S: Stub + 'static,
    R: Receiver + 'static,
{
    fn new(subscription: impl Into<String>, stub: S, receiver: R) -> Self {
        Self {
            config: SubscriberConfig::new(subscription),
            stub,
            receiver,
        }
    }

    /// Sets the safety margin subtracted from a lease's expiration when
    /// scheduling the lease extender's sweep (§6 glossary: "Padding").
    pub fn with_padding(mut self, padding: std::time::Duration) -> Self {
        self.config = self.config.with_padding(padding);
        self
    }

    /// Sets the stream-wide ack deadline used before any adaptive update has
    /// taken effect.
    pub fn with_initial_stream_ack_deadline_seconds(mut self, seconds: i32) -> Self {
        self.config = self.config.with_initial_stream_ack_deadline_seconds(seconds);
        self
    }

    /// Sets the maximum number of outstanding (unacked) messages the default
    /// [`SemaphoreFlowController`] admits.
    pub fn with_max_outstanding_messages(mut self, count: i64) -> Self {
        self.config = self.config.with_max_outstanding_messages(count);
        self
    }

    /// Sets the maximum outstanding (unacked) byte total the default
    /// [`SemaphoreFlowController`] admits.
    pub fn with_max_outstanding_bytes(mut self, bytes: i64) -> Self {
        self.config = self.config.with_max_outstanding_bytes(bytes);
        self
    }

    /// Builds the default [`SemaphoreFlowController`] from
    /// `max_outstanding_messages`/`max_outstanding_bytes`, constructs the
    /// subscriber, and starts it (§4.10).
    pub async fn start(self) -> crate::Result<StreamingPullSubscriber<S, R, SemaphoreFlowController>> {
        let flow_controller = SemaphoreFlowController::new(
            self.config.max_outstanding_messages().max(0) as usize,
            self.config.max_outstanding_bytes().max(0) as usize,
        );
        let mut subscriber =
            StreamingPullSubscriber::new(self.config, self.stub, self.receiver, flow_controller);
        subscriber.start().await?;
        Ok(subscriber)
    }
}
