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

//! The subscriber's lifecycle state machine (§4.8).

use std::sync::Mutex;

/// A subscriber's lifecycle state.
///
/// Transitions are monotonic: `CREATED -> STARTING -> RUNNING -> STOPPING ->
/// TERMINATED`, with `FAILED` reachable from any running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum State {
    Created,
    Starting,
    Running,
    Stopping,
    Terminated,
    Failed,
}

impl State {
    /// True in `Starting` and `Running`; the supervisor uses this to decide
    /// whether to keep reconnecting or fail fast (§4.1, §4.8).
    pub fn is_alive(self) -> bool {
        matches!(self, State::Starting | State::Running)
    }
}

#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: Mutex<State>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::Created),
        }
    }

    pub(crate) fn state(&self) -> State {
        *self.state.lock().expect("lifecycle mutex poisoned")
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.state().is_alive()
    }

    pub(crate) fn transition_to(&self, new: State) {
        let mut guard = self.state.lock().expect("lifecycle mutex poisoned");
        tracing::debug!(from = ?*guard, to = ?new, "subscriber lifecycle transition");
        *guard = new;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
