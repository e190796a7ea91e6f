// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Suspended commands waiting on an OS decision.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::debug;

use crate::bluetooth::Adapter;

/// Continuations parked until one OS request resolves.
///
/// Only the first continuation issues the request; resolving hands back all
/// of them so none is ever lost.
pub(crate) struct Continuations<T> {
    pending: Mutex<VecDeque<T>>,
}

impl<T> Continuations<T> {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Park a continuation. Returns `true` if the caller must issue the
    /// OS request.
    pub(crate) fn park(&self, continuation: T) -> bool {
        let mut pending = self.pending.lock();
        pending.push_back(continuation);
        pending.len() == 1
    }

    /// Take every parked continuation, oldest first.
    pub(crate) fn take_all(&self) -> Vec<T> {
        self.pending.lock().drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Outcome of [`PermissionGate::ensure`].
pub(crate) enum Ensure<T> {
    /// Already granted; resume now.
    Granted(T),
    /// Parked until the permission result arrives.
    Pending,
}

/// Serializes the runtime permission negotiation.
pub(crate) struct PermissionGate<T> {
    waiting: Continuations<T>,
}

impl<T> PermissionGate<T> {
    pub(crate) fn new() -> Self {
        Self {
            waiting: Continuations::new(),
        }
    }

    pub(crate) fn ensure(&self, adapter: &dyn Adapter, continuation: T) -> Ensure<T> {
        if adapter.has_permission() {
            return Ensure::Granted(continuation);
        }

        if self.waiting.park(continuation) {
            debug!("Requesting runtime permission");
            adapter.request_permission();
        } else {
            debug!(
                "Permission request already pending, {} waiting",
                self.waiting.len()
            );
        }
        Ensure::Pending
    }

    /// Apply the OS answer. An empty result means the prompt was dismissed.
    pub(crate) fn resolve(&self, grant_results: &[bool]) -> (bool, Vec<T>) {
        let granted = grant_results.first().copied().unwrap_or(false);
        (granted, self.waiting.take_all())
    }

    pub(crate) fn pending(&self) -> usize {
        self.waiting.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_park_requests() {
        let queue = Continuations::new();
        assert!(queue.park(1));
        assert!(!queue.park(2));
        assert!(!queue.park(3));
        assert_eq!(queue.take_all(), vec![1, 2, 3]);
        assert!(queue.park(4));
    }

    #[test]
    fn test_resolve_drains_everyone() {
        let gate = PermissionGate::new();
        gate.waiting.park("a");
        gate.waiting.park("b");

        let (granted, resumed) = gate.resolve(&[true]);
        assert!(granted);
        assert_eq!(resumed, vec!["a", "b"]);
        assert_eq!(gate.pending(), 0);
    }

    #[test]
    fn test_dismissed_prompt_is_a_denial() {
        let gate = PermissionGate::new();
        gate.waiting.park(());
        let (granted, resumed) = gate.resolve(&[]);
        assert!(!granted);
        assert_eq!(resumed.len(), 1);

        let (granted, _) = gate.resolve(&[false, true]);
        assert!(!granted);
    }
}
