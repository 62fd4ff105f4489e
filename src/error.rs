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

//! Custom errors for the Pub/Sub streaming pull subscriber.
//!
//! These are the errors surfaced to the host through the subscriber's
//! lifecycle and public API. Errors that are only relevant to reconnect
//! decisions (retryable transport codes) never reach the host directly;
//! see [`Code::is_retryable`].

use std::fmt;
use std::sync::Arc;

/// A minimal gRPC-style status code.
///
/// The concrete RPC transport is an external collaborator (see the crate
/// docs); this enum only carries enough information for the stream
/// supervisor to classify an error as retryable or fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Code {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl Code {
    /// The status codes the stream supervisor reconnects on (§6 of the design).
    ///
    /// All other codes are treated as fatal: the subscriber transitions to
    /// `FAILED` and does not reopen the stream.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Code::DeadlineExceeded
                | Code::Internal
                | Code::Cancelled
                | Code::ResourceExhausted
                | Code::Unavailable
        )
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A transport-level status: a code plus a human-readable message.
#[derive(Debug, Clone)]
pub struct Status {
    code: Code,
    message: String,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for Status {}

/// The error type returned by this crate's fallible operations.
///
/// This is deliberately coarse: the stream supervisor traps essentially
/// everything that can go wrong in the dispatcher and batcher and routes it
/// through reconnect or lifecycle-failure logic (§7 of the design) rather
/// than propagating it synchronously to a caller. Application code mostly
/// observes these through [`crate::subscriber::lifecycle::Lifecycle`]
/// transitions, not as `Result::Err` from a hot-path call.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The underlying stream ended with a transport-level status.
    #[error("stream transport error: {0}")]
    Transport(Status),

    /// The user-supplied receiver's future failed while processing a message.
    ///
    /// Per the design, this is treated as a NACK of the associated message,
    /// not a fatal condition; it is surfaced here only for logging and
    /// testing purposes.
    #[error("receiver failed to process message {ack_id}: {reason}")]
    Receiver { ack_id: String, reason: Arc<str> },

    /// The flow controller did not honor a reservation.
    ///
    /// Per §6 the flow controller is expected to block rather than reject;
    /// this variant exists for the (unexpected) case that it returns an
    /// error instead.
    #[error("flow controller rejected reservation of {count} message(s), {bytes} byte(s)")]
    FlowControl { count: usize, bytes: usize },

    /// An operation was attempted on a subscriber that is not alive.
    #[error("subscriber is not alive")]
    NotAlive,
}

impl Error {
    /// Whether the stream supervisor should reopen the stream after this
    /// error, per the retryable status codes in §6.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(status) => status.code().is_retryable(),
            _ => false,
        }
    }
}
