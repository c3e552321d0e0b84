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

use std::{fmt::Debug, mem};

use loadguard_common::{
    code::Owner,
    error::{Error, ErrorKind, Result},
};
use parking_lot::Mutex;

/// Callback run when the transaction it is registered with completes.
pub trait Synchronization: Send + 'static {
    /// Called before the commit. An error turns the commit into a rollback.
    fn before_completion(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called once the transaction has committed or rolled back.
    fn after_completion(self: Box<Self>, committed: bool) -> Result<()>;
}

/// Status of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Synchronizations may still be registered.
    Active,
    /// The transaction has committed.
    Committed,
    /// The transaction has rolled back.
    RolledBack,
}

struct TransactionInner {
    status: TransactionStatus,
    synchronizations: Vec<Box<dyn Synchronization>>,
}

/// Completion hooks of a unit of work against the origin store.
///
/// The transaction does not talk to the origin store itself, the caller commits or rolls back after the origin store
/// did.
pub struct Transaction {
    inner: Mutex<TransactionInner>,
}

impl Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Transaction")
            .field("status", &inner.status)
            .field("synchronizations", &inner.synchronizations.len())
            .finish()
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    /// Begin a transaction.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TransactionInner {
                status: TransactionStatus::Active,
                synchronizations: vec![],
            }),
        }
    }

    /// Current status.
    pub fn status(&self) -> TransactionStatus {
        self.inner.lock().status
    }

    /// Register a callback run at completion.
    pub fn register_synchronization(&self, synchronization: Box<dyn Synchronization>) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.status != TransactionStatus::Active {
            return Err(Error::new(ErrorKind::Transaction, "transaction already completed")
                .with_context("status", format!("{:?}", inner.status)));
        }
        inner.synchronizations.push(synchronization);
        Ok(())
    }

    /// Commit.
    ///
    /// Runs every `before_completion`. If one fails the transaction rolls back instead and the failure is returned.
    pub fn commit(&self) -> Result<()> {
        let mut synchronizations = self.take(TransactionStatus::Committed)?;

        let failure = synchronizations
            .iter_mut()
            .map(|synchronization| synchronization.before_completion())
            .find_map(|res| res.err());
        if let Some(e) = failure {
            tracing::warn!("[transaction]: before completion failed, roll back: {e}");
            self.inner.lock().status = TransactionStatus::RolledBack;
            Self::complete(synchronizations, false)?;
            return Err(Error::new(ErrorKind::Transaction, "transaction rolled back").with_source(e));
        }

        Self::complete(synchronizations, true)
    }

    /// Roll back.
    pub fn rollback(&self) -> Result<()> {
        let synchronizations = self.take(TransactionStatus::RolledBack)?;
        Self::complete(synchronizations, false)
    }

    fn take(&self, status: TransactionStatus) -> Result<Vec<Box<dyn Synchronization>>> {
        let mut inner = self.inner.lock();
        if inner.status != TransactionStatus::Active {
            return Err(Error::new(ErrorKind::Transaction, "transaction already completed")
                .with_context("status", format!("{:?}", inner.status)));
        }
        inner.status = status;
        Ok(mem::take(&mut inner.synchronizations))
    }

    /// Run every `after_completion`, even if some fail. The first failure is returned.
    fn complete(synchronizations: Vec<Box<dyn Synchronization>>, committed: bool) -> Result<()> {
        let mut first = None;
        for synchronization in synchronizations {
            if let Err(e) = synchronization.after_completion(committed) {
                tracing::warn!("[transaction]: after completion failed: {e}");
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// An owner with its current transaction.
///
/// Every delegate operation is performed on behalf of a session.
#[derive(Debug)]
pub struct Session<O>
where
    O: Owner,
{
    owner: O,
    transaction: Transaction,
}

impl<O> Session<O>
where
    O: Owner,
{
    /// Open a session with a fresh transaction.
    pub fn new(owner: O) -> Self {
        Self {
            owner,
            transaction: Transaction::new(),
        }
    }

    /// Identity used for pending puts and invalidations.
    pub fn owner(&self) -> &O {
        &self.owner
    }

    /// Current transaction.
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Register a callback with the current transaction.
    pub fn register(&self, synchronization: impl Synchronization) -> Result<()> {
        self.transaction.register_synchronization(Box::new(synchronization))
    }

    /// Commit the current transaction.
    pub fn commit(&self) -> Result<()> {
        self.transaction.commit()
    }

    /// Roll back the current transaction.
    pub fn rollback(&self) -> Result<()> {
        self.transaction.rollback()
    }
}
