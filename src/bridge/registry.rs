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

//! Registry of live connections.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::connection::ConnectionWrapper;

/// Identifier of a connection. Never reused within a process.
pub type ConnectionId = u32;

#[derive(Default)]
struct RegistryInner {
    last_id: ConnectionId,
    connections: HashMap<ConnectionId, Arc<ConnectionWrapper>>,
}

/// Maps connection identifiers to their wrappers.
///
/// Inserts happen on the bridge loop while removals can come from worker
/// tasks, so every access goes through one lock.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next identifier, or `None` once the id space is spent.
    pub fn allocate_id(&self) -> Option<ConnectionId> {
        let mut inner = self.inner.lock();
        let id = inner.last_id.checked_add(1)?;
        inner.last_id = id;
        Some(id)
    }

    pub fn insert(&self, connection: Arc<ConnectionWrapper>) {
        self.inner
            .lock()
            .connections
            .insert(connection.id(), connection);
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionWrapper>> {
        self.inner.lock().connections.get(&id).cloned()
    }

    /// Remove an entry. Removing an absent id does nothing.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionWrapper>> {
        self.inner.lock().connections.remove(&id)
    }

    /// Disconnect every connection, then clear the registry.
    pub fn remove_all(&self) -> Vec<Arc<ConnectionWrapper>> {
        let mut inner = self.inner.lock();
        for connection in inner.connections.values() {
            connection.disconnect();
        }
        inner.connections.drain().map(|(_, c)| c).collect()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.inner.lock().connections.contains_key(&id)
    }

    /// Live identifiers in ascending order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.inner.lock().connections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
