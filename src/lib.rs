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

//! Google Cloud Client Libraries for Rust - Pub/Sub streaming pull subscriber core.
//!
//! **WARNING:** this crate is under active development. We expect multiple
//! breaking changes in the upcoming releases. Testing is also incomplete, we do
//! **not** recommend that you use this crate in production. We welcome feedback
//! about the APIs, documentation, missing features, bugs, etc.
//!
//! This crate implements the hard parts of a [Pub/Sub] streaming pull
//! subscriber: lease tracking and extension, ack/nack batching, adaptive
//! stream deadlines, and reconnect-with-backoff stream supervision. It does
//! not implement the RPC transport, the credential provider, or a flow
//! controller: those are injected by the host as traits (see
//! [`subscriber::stub`] and [`subscriber::flow_control`]).
//!
//! Start with [`StreamingPullSubscriber`], the lifecycle façade that owns
//! every other collaborator in [`subscriber`].
//!
//! [pub/sub]: https://cloud.google.com/pubsub

pub mod error;
pub mod model;
pub mod subscriber;

pub use error::Error;
pub use subscriber::{StreamingPullSubscriber, SubscriberBuilder, SubscriberConfig};

/// The `Result` type returned by fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;
