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

//! An in-process cluster transport.
//!
//! Every member owns an inbox. Messages are encoded into the wire format on send and decoded on receive, so a
//! [`LocalCluster`] exercises the same path a networked [`Broadcaster`] does.

use std::{fmt::Debug, marker::PhantomData, sync::Arc};

use loadguard_common::{
    code::Key,
    error::{Error, Result},
};
use loadguard_validator::CorrelationId;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::broadcast::{Broadcaster, InvalidationMessage, NodeId};

/// Failures of the in-process transport.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// The sending node has left the cluster.
    #[error("node {0} is not a member of the cluster")]
    NotMember(NodeId),
}

#[derive(Debug)]
struct Member {
    node: NodeId,
    inbox: flume::Sender<Vec<u8>>,
}

type Members = Arc<RwLock<Vec<Member>>>;

/// A set of nodes living in the same process.
pub struct LocalCluster<K> {
    members: Members,
    _marker: PhantomData<fn() -> K>,
}

impl<K> Debug for LocalCluster<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCluster")
            .field("members", &self.members.read().len())
            .finish()
    }
}

impl<K> Clone for LocalCluster<K> {
    fn clone(&self) -> Self {
        Self {
            members: self.members.clone(),
            _marker: PhantomData,
        }
    }
}

impl<K> Default for LocalCluster<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> LocalCluster<K> {
    /// Create an empty cluster.
    pub fn new() -> Self {
        Self {
            members: Arc::new(RwLock::new(vec![])),
            _marker: PhantomData,
        }
    }

    /// Add a node to the cluster and return its broadcaster.
    pub fn join(&self) -> LocalBroadcaster<K> {
        let node = Uuid::new_v4();
        let (tx, rx) = flume::unbounded();
        self.members.write().push(Member { node, inbox: tx });
        tracing::debug!("[cluster]: node {node} joined");
        LocalBroadcaster {
            node,
            members: self.members.clone(),
            inbox: rx,
            _marker: PhantomData,
        }
    }

    /// Current members.
    pub fn members(&self) -> Vec<NodeId> {
        self.members.read().iter().map(|member| member.node).collect()
    }
}

/// [`Broadcaster`] of a [`LocalCluster`] member.
pub struct LocalBroadcaster<K> {
    node: NodeId,
    members: Members,
    inbox: flume::Receiver<Vec<u8>>,
    _marker: PhantomData<fn() -> K>,
}

impl<K> Debug for LocalBroadcaster<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBroadcaster")
            .field("node", &self.node)
            .field("pending", &self.inbox.len())
            .finish()
    }
}

impl<K> LocalBroadcaster<K> {
    /// Leave the cluster. Messages sent afterwards fail.
    pub fn leave(&self) {
        self.members.write().retain(|member| member.node != self.node);
        tracing::debug!("[cluster]: node {} left", self.node);
    }
}

impl<K> LocalBroadcaster<K>
where
    K: Serialize + DeserializeOwned,
{
    /// Drain the inbox.
    pub fn receive(&self) -> Result<Vec<InvalidationMessage<K>>> {
        self.inbox
            .try_iter()
            .map(|buf| InvalidationMessage::decode(&buf))
            .collect()
    }

    fn send(&self, message: InvalidationMessage<K>) -> Result<()> {
        let buf = message.encode()?;
        let members = self.members.read();
        if !members.iter().any(|member| member.node == self.node) {
            return Err(Error::broadcast(ClusterError::NotMember(self.node)));
        }
        for member in members.iter().filter(|member| member.node != self.node) {
            if member.inbox.send(buf.clone()).is_err() {
                tracing::warn!("[cluster]: inbox of node {} is gone, drop message", member.node);
            }
        }
        Ok(())
    }
}

impl<K> Broadcaster<K> for LocalBroadcaster<K>
where
    K: Key + Serialize + DeserializeOwned,
{
    fn local(&self) -> NodeId {
        self.node
    }

    fn invalidate(&self, keys: &[K], correlation: CorrelationId) -> Result<()> {
        self.send(InvalidationMessage::Begin {
            origin: self.node,
            correlation,
            keys: keys.to_vec(),
        })
    }

    fn end_invalidation(&self, keys: &[K], correlation: CorrelationId) -> Result<()> {
        self.send(InvalidationMessage::End {
            origin: self.node,
            correlation,
            keys: keys.to_vec(),
        })
    }

    fn invalidate_region(&self, correlation: CorrelationId) -> Result<()> {
        self.send(InvalidationMessage::Region {
            origin: self.node,
            correlation,
        })
    }

    fn members(&self) -> Vec<NodeId> {
        self.members.read().iter().map(|member| member.node).collect()
    }
}

#[cfg(test)]
mod tests {
    use loadguard_common::error::ErrorKind;

    use super::*;

    #[test]
    fn test_local_cluster_delivery() {
        let cluster = LocalCluster::<u64>::new();
        let a = cluster.join();
        let b = cluster.join();
        let c = cluster.join();
        assert_eq!(cluster.members().len(), 3);

        let correlation = Uuid::new_v4();
        a.invalidate(&[1, 2], correlation).unwrap();
        a.end_invalidation(&[1, 2], correlation).unwrap();

        assert!(a.receive().unwrap().is_empty());
        for member in [&b, &c] {
            let messages = member.receive().unwrap();
            assert_eq!(messages.len(), 2);
            assert!(messages.iter().all(|m| m.origin() == a.local() && m.correlation() == correlation));
            assert!(matches!(&messages[0], InvalidationMessage::Begin { keys, .. } if keys == &vec![1, 2]));
            assert!(matches!(&messages[1], InvalidationMessage::End { .. }));
        }
    }

    #[test]
    fn test_left_node_cannot_send() {
        let cluster = LocalCluster::<u64>::new();
        let a = cluster.join();
        let b = cluster.join();
        a.leave();
        assert_eq!(b.members(), vec![b.local()]);

        let err = a.invalidate_region(Uuid::new_v4()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Broadcast);
        assert!(err.downcast_ref::<ClusterError>().is_some());
        assert!(b.receive().unwrap().is_empty());
    }
}
