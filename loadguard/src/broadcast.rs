// Copyright 2026 loadguard Project Authors
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

use std::{fmt::Debug, slice, sync::Arc, time::Duration};

use hashbrown::HashMap;
use loadguard_common::{
    clock::{deadline, Timestamp},
    code::{Key, Owner},
    error::{Error, Result},
};
use loadguard_validator::{CorrelationId, PutFromLoadValidator};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::region::Region;

/// Identity of a cluster member.
pub type NodeId = Uuid;

/// Invalidation traffic between the nodes of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidationMessage<K> {
    /// The keys are being written on the origin node.
    Begin {
        /// Sending node.
        origin: NodeId,
        /// Pairs the begin with its end.
        correlation: CorrelationId,
        /// Invalidated keys.
        keys: Vec<K>,
    },
    /// The write that began with the same correlation has completed.
    End {
        /// Sending node.
        origin: NodeId,
        /// Pairs the end with its begin.
        correlation: CorrelationId,
        /// Invalidated keys.
        keys: Vec<K>,
    },
    /// The whole region has been invalidated.
    Region {
        /// Sending node.
        origin: NodeId,
        /// Id of the invalidation.
        correlation: CorrelationId,
    },
}

impl<K> InvalidationMessage<K> {
    /// Sending node.
    pub fn origin(&self) -> NodeId {
        match self {
            Self::Begin { origin, .. } | Self::End { origin, .. } | Self::Region { origin, .. } => *origin,
        }
    }

    /// Correlation id.
    pub fn correlation(&self) -> CorrelationId {
        match self {
            Self::Begin { correlation, .. } | Self::End { correlation, .. } | Self::Region { correlation, .. } => {
                *correlation
            }
        }
    }

    /// Invalidated keys, `None` for a region invalidation.
    pub fn keys(&self) -> Option<&[K]> {
        match self {
            Self::Begin { keys, .. } | Self::End { keys, .. } => Some(keys.as_slice()),
            Self::Region { .. } => None,
        }
    }
}

impl<K> InvalidationMessage<K>
where
    K: Serialize,
{
    /// Encode into the wire format.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }
}

impl<K> InvalidationMessage<K>
where
    K: DeserializeOwned,
{
    /// Decode from the wire format.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(buf)?)
    }
}

/// Transport of invalidation messages to the other members of the cluster.
///
/// Sends are fire-and-forget. Delivery may be delayed, duplicated or reordered, but a begin and its end are never
/// lost both.
pub trait Broadcaster<K>: Send + Sync + Debug + 'static
where
    K: Key,
{
    /// Identity of the local node.
    fn local(&self) -> NodeId;

    /// Announce that `keys` are being written.
    fn invalidate(&self, keys: &[K], correlation: CorrelationId) -> Result<()>;

    /// Announce that the write announced with `correlation` has completed.
    fn end_invalidation(&self, keys: &[K], correlation: CorrelationId) -> Result<()>;

    /// Announce a region invalidation.
    fn invalidate_region(&self, correlation: CorrelationId) -> Result<()>;

    /// Current members of the cluster, the local node included.
    fn members(&self) -> Vec<NodeId>;
}

#[derive(Debug)]
struct RemoteInvalidation<K> {
    origin: NodeId,
    keys: Vec<K>,
}

/// Connects a [`PutFromLoadValidator`] with the rest of the cluster.
///
/// Local invalidations are announced through the [`Broadcaster`], and messages received from other nodes are applied
/// to the local validator and [`Region`].
pub struct InvalidationBridge<K, O>
where
    K: Key,
    O: Owner,
{
    node: NodeId,
    region: Arc<Region>,
    validator: Arc<PutFromLoadValidator<K, O>>,
    broadcaster: Arc<dyn Broadcaster<K>>,
    ended_correlation_ttl: Duration,

    local: Mutex<HashMap<(O, K), CorrelationId>>,
    remote: Mutex<HashMap<CorrelationId, RemoteInvalidation<K>>>,
    /// Correlations whose end has been applied, with the time they may be forgotten.
    ended: Mutex<HashMap<CorrelationId, Timestamp>>,
}

impl<K, O> Debug for InvalidationBridge<K, O>
where
    K: Key,
    O: Owner,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationBridge")
            .field("node", &self.node)
            .field("validator", &self.validator.name())
            .field("broadcaster", &self.broadcaster)
            .finish()
    }
}

impl<K, O> InvalidationBridge<K, O>
where
    K: Key,
    O: Owner,
{
    /// Create a bridge for the region and its validator.
    pub fn new(
        region: Arc<Region>,
        validator: Arc<PutFromLoadValidator<K, O>>,
        broadcaster: Arc<dyn Broadcaster<K>>,
        ended_correlation_ttl: Duration,
    ) -> Self {
        Self {
            node: broadcaster.local(),
            region,
            validator,
            broadcaster,
            ended_correlation_ttl,
            local: Mutex::new(HashMap::new()),
            remote: Mutex::new(HashMap::new()),
            ended: Mutex::new(HashMap::new()),
        }
    }

    /// Identity of the local node.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Announce that `owner` began invalidating `key` on this node.
    ///
    /// Repeated calls of the same owner reuse the correlation of the first one.
    pub fn begin_invalidating_key(&self, owner: &O, key: &K) -> Result<CorrelationId> {
        let correlation = *self
            .local
            .lock()
            .entry((owner.clone(), key.clone()))
            .or_insert_with(Uuid::new_v4);
        self.broadcaster.invalidate(slice::from_ref(key), correlation)?;
        Ok(correlation)
    }

    /// Announce that `owner` stopped invalidating `key`. A no-op if nothing was announced.
    pub fn end_invalidating_key(&self, owner: &O, key: &K) -> Result<()> {
        let correlation = self.local.lock().remove(&(owner.clone(), key.clone()));
        match correlation {
            Some(correlation) => self.broadcaster.end_invalidation(slice::from_ref(key), correlation),
            None => Ok(()),
        }
    }

    /// Announce the begin of a write identified by `correlation`.
    pub fn announce_begin(&self, keys: &[K], correlation: CorrelationId) -> Result<()> {
        self.broadcaster.invalidate(keys, correlation)
    }

    /// Announce the end of a write identified by `correlation`.
    pub fn announce_end(&self, keys: &[K], correlation: CorrelationId) -> Result<()> {
        self.broadcaster.end_invalidation(keys, correlation)
    }

    /// Announce a one-shot invalidation of `key`, as for an eviction.
    pub fn announce_eviction(&self, key: &K) -> Result<()> {
        let correlation = Uuid::new_v4();
        self.broadcaster.invalidate(slice::from_ref(key), correlation)?;
        self.broadcaster.end_invalidation(slice::from_ref(key), correlation)
    }

    /// Announce a region invalidation.
    pub fn announce_region_invalidation(&self) -> Result<()> {
        self.broadcaster.invalidate_region(Uuid::new_v4())
    }

    /// Apply a message received from another node.
    ///
    /// Messages sent by the local node are ignored, and duplicates are harmless. An end received before its begin is
    /// remembered for the configured TTL so the late begin does not leave the keys invalidated forever.
    pub fn on_message(&self, message: InvalidationMessage<K>) -> Result<()> {
        if message.origin() == self.node {
            return Ok(());
        }
        match message {
            InvalidationMessage::Begin {
                origin,
                correlation,
                keys,
            } => self.on_begin(origin, correlation, keys),
            InvalidationMessage::End { correlation, keys, .. } => {
                self.on_end(correlation, &keys);
                Ok(())
            }
            InvalidationMessage::Region { origin, .. } => {
                tracing::debug!("[bridge]: region {} invalidated by {origin}", self.region.name());
                self.region.invalidate();
                if self.validator.invalidate_region() {
                    Ok(())
                } else {
                    Err(Error::region_invalidation_failed(
                        self.validator.name(),
                        self.validator.config().invalidation_lock_timeout,
                    ))
                }
            }
        }
    }

    /// End the remote invalidations of nodes that are no longer cluster members.
    ///
    /// Returns how many invalidations have been ended.
    pub fn refresh_membership(&self) -> usize {
        let members = self.broadcaster.members();
        let departed = {
            let mut remote = self.remote.lock();
            let correlations = remote
                .iter()
                .filter(|(_, invalidation)| !members.contains(&invalidation.origin))
                .map(|(correlation, _)| *correlation)
                .collect::<Vec<_>>();
            correlations
                .into_iter()
                .filter_map(|correlation| remote.remove(&correlation).map(|inv| (correlation, inv)))
                .collect::<Vec<_>>()
        };
        for (correlation, invalidation) in departed.iter() {
            tracing::info!(
                "[bridge]: node {} left, end its invalidation {correlation}",
                invalidation.origin
            );
            for key in invalidation.keys.iter() {
                self.validator.end_remote_invalidation(*correlation, key);
            }
        }
        departed.len()
    }

    /// Count of remote invalidations that have begun but not ended.
    pub fn remote_invalidations(&self) -> usize {
        self.remote.lock().len()
    }

    fn on_begin(&self, origin: NodeId, correlation: CorrelationId, keys: Vec<K>) -> Result<()> {
        let timeout = self.validator.config().invalidation_lock_timeout;

        if self.is_ended(correlation) {
            tracing::debug!("[bridge]: begin of ended invalidation {correlation} from {origin}");
            // The write has completed but loads registered before it must not cache.
            for key in keys.iter() {
                if !self.validator.invalidate_key(key) {
                    return Err(Error::invalidation_failed(key, timeout));
                }
            }
            return Ok(());
        }

        for key in keys.iter() {
            if !self.validator.begin_remote_invalidation(correlation, key) {
                return Err(Error::invalidation_failed(key, timeout));
            }
        }

        // The end may have been applied while the begin was.
        if self.is_ended(correlation) {
            for key in keys.iter() {
                self.validator.end_remote_invalidation(correlation, key);
            }
            return Ok(());
        }
        self.remote
            .lock()
            .entry(correlation)
            .or_insert(RemoteInvalidation { origin, keys });
        Ok(())
    }

    fn is_ended(&self, correlation: CorrelationId) -> bool {
        let now = self.region.now();
        self.ended
            .lock()
            .get(&correlation)
            .is_some_and(|forget_at| *forget_at > now)
    }

    fn on_end(&self, correlation: CorrelationId, keys: &[K]) {
        {
            let now = self.region.now();
            let mut ended = self.ended.lock();
            ended.retain(|_, forget_at| *forget_at > now);
            ended.insert(correlation, deadline(now, self.ended_correlation_ttl));
        }
        self.remote.lock().remove(&correlation);
        for key in keys {
            if !self.validator.end_remote_invalidation(correlation, key) {
                tracing::debug!("[bridge]: end of unknown invalidation {correlation} on key {key:?}");
            }
        }
    }
}
