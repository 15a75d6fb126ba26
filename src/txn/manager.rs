// Copyright 2021 Datafuse Labs
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

use std::fmt;
use std::sync::Arc;

use log::debug;
use log::warn;

use crate::config::TransactionConfig;
use crate::errors::TransactionError;
use crate::txn::transaction::Writes;
use crate::txn::InMemoryTransactionService;
use crate::txn::Transaction;
use crate::txn::TransactionService;
use crate::txn::TransactionState;
use crate::Cell;
use crate::InMemoryKeyValueService;
use crate::InMemoryTimestampService;
use crate::KeyValueService;
use crate::TableName;
use crate::TimestampService;
use crate::Timestamp;

/// A unit of work run inside a transaction.
///
/// `execute` takes `&self`: a task may be run more than once by
/// [`TransactionManager::run_task_with_retry`], each time against a fresh transaction, and
/// must not carry state from one attempt to the next.
#[async_trait::async_trait]
pub trait TransactionTask: Send + Sync {
    type Output: Send;

    async fn execute(&self, txn: &mut Transaction) -> Result<Self::Output, TransactionError>;
}

/// Starts, commits and retries transactions.
pub struct TransactionManager {
    kvs: Arc<dyn KeyValueService>,
    timestamps: Arc<dyn TimestampService>,
    transactions: Arc<dyn TransactionService>,
    config: TransactionConfig,

    /// Serializes the conflict check and the commit record of committing transactions.
    commit_lock: futures::lock::Mutex<()>,
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("config", &self.config)
            .finish()
    }
}

impl TransactionManager {
    pub fn new(
        kvs: Arc<dyn KeyValueService>,
        timestamps: Arc<dyn TimestampService>,
        transactions: Arc<dyn TransactionService>,
    ) -> Self {
        Self {
            kvs,
            timestamps,
            transactions,
            config: TransactionConfig::default(),
            commit_lock: futures::lock::Mutex::new(()),
        }
    }

    /// A manager over fresh in-memory collaborators.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryKeyValueService::default()),
            Arc::new(InMemoryTimestampService::default()),
            Arc::new(InMemoryTransactionService::default()),
        )
    }

    #[must_use]
    pub fn with_config(mut self, config: TransactionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    pub fn key_value_service(&self) -> Arc<dyn KeyValueService> {
        self.kvs.clone()
    }

    pub fn timestamp_service(&self) -> Arc<dyn TimestampService> {
        self.timestamps.clone()
    }

    pub fn transaction_service(&self) -> Arc<dyn TransactionService> {
        self.transactions.clone()
    }

    /// Start a transaction at a fresh timestamp.
    pub async fn begin(&self, read_only: bool) -> Result<Transaction, TransactionError> {
        let start_ts = self.timestamps.fresh_timestamp().await?;
        debug!(
            "TransactionManager::begin: start_ts: {}, read_only: {}",
            start_ts, read_only
        );
        Ok(Transaction::new(
            start_ts,
            read_only,
            self.kvs.clone(),
            self.transactions.clone(),
        ))
    }

    /// Persist the writes of `txn` and record it as committed.
    ///
    /// Returns the commit timestamp, or `None` if there was nothing to write.
    ///
    /// Fails with [`TransactionError::Conflict`] if another transaction committed a write to
    /// one of the cells after `txn` started, or if a reader rolled `txn` back before it could
    /// record its commit. In both cases `txn` ends aborted.
    pub async fn commit(&self, txn: Transaction) -> Result<Option<Timestamp>, TransactionError> {
        let start_ts = txn.start_timestamp();
        let writes = txn.into_writes();

        if writes.values().all(|w| w.is_empty()) {
            debug!("TransactionManager::commit: start_ts: {} wrote nothing", start_ts);
            return Ok(None);
        }

        for (table, cells) in &writes {
            if let Err(e) = self.kvs.put(table, cells.clone(), start_ts).await {
                self.abort(start_ts).await;
                return Err(e.into());
            }
        }

        let _guard = self.commit_lock.lock().await;

        if let Some((table, cell, other_ts)) = self.find_write_conflict(start_ts, &writes).await? {
            self.abort(start_ts).await;
            return Err(TransactionError::conflict(
                start_ts,
                format!(
                    "{} in {} was written by transaction {} that committed after this one started",
                    cell, table, other_ts
                ),
            ));
        }

        let commit_ts = self.timestamps.fresh_timestamp().await?;
        let recorded = self
            .transactions
            .put_unless_exists(start_ts, TransactionState::Committed { commit_ts })
            .await?;

        if !recorded {
            return Err(TransactionError::conflict(
                start_ts,
                "rolled back by a concurrent reader",
            ));
        }

        debug!(
            "TransactionManager::commit: start_ts: {}, commit_ts: {}",
            start_ts, commit_ts
        );
        Ok(Some(commit_ts))
    }

    /// Find a version of a written cell that belongs to a transaction committed after
    /// `start_ts`.
    async fn find_write_conflict(
        &self,
        start_ts: Timestamp,
        writes: &Writes,
    ) -> Result<Option<(TableName, Cell, Timestamp)>, TransactionError> {
        for (table, cells) in writes {
            for cell in cells.keys() {
                let versions = self.kvs.get_versions(table, cell, Timestamp::MAX).await?;

                let others = versions
                    .iter()
                    .map(|v| v.timestamp)
                    .filter(|ts| *ts != start_ts)
                    .collect::<Vec<_>>();

                let states = self.transactions.get_states(&others).await?;

                for (other_ts, state) in others.into_iter().zip(states) {
                    if let Some(TransactionState::Committed { commit_ts }) = state {
                        if commit_ts > start_ts {
                            return Ok(Some((table.clone(), cell.clone(), other_ts)));
                        }
                    }
                }
            }
        }
        Ok(None)
    }

    /// Mark a transaction aborted so readers skip whatever it persisted.
    async fn abort(&self, start_ts: Timestamp) {
        let res = self
            .transactions
            .put_unless_exists(start_ts, TransactionState::Aborted)
            .await;

        // Readers roll it back anyway if this fails.
        if let Err(e) = res {
            warn!(
                "TransactionManager::abort: failed to mark {} aborted: {}",
                start_ts, e
            );
        }
    }

    /// Run `task` once in a read-only transaction.
    pub async fn run_task_read_only<T>(&self, task: &T) -> Result<T::Output, TransactionError>
    where T: TransactionTask + ?Sized {
        let mut txn = self.begin(true).await?;
        task.execute(&mut txn).await
    }

    /// Run `task` and commit its writes, retrying on [`TransactionError::Conflict`].
    ///
    /// Gives up with [`TransactionError::RetriesExhausted`] after
    /// [`TransactionConfig::max_attempts`] attempts. Any other error is returned at once.
    pub async fn run_task_with_retry<T>(&self, task: &T) -> Result<T::Output, TransactionError>
    where T: TransactionTask + ?Sized {
        let max_attempts = self.config.effective_max_attempts();

        let mut attempt = 1;
        loop {
            let err = match self.run_task_once(task).await {
                Ok(output) => return Ok(output),
                Err(e) => e,
            };

            if !err.is_retryable() {
                return Err(err);
            }

            if attempt >= max_attempts {
                return Err(TransactionError::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            warn!(
                "TransactionManager::run_task_with_retry: attempt {}/{} failed, retrying: {}",
                attempt, max_attempts, err
            );
            attempt += 1;
        }
    }

    async fn run_task_once<T>(&self, task: &T) -> Result<T::Output, TransactionError>
    where T: TransactionTask + ?Sized {
        let mut txn = self.begin(false).await?;
        let output = task.execute(&mut txn).await?;
        self.commit(txn).await?;
        Ok(output)
    }

    /// Persist `writes` in a single transaction without running a task.
    pub async fn write_all(
        &self,
        writes: Writes,
    ) -> Result<Option<Timestamp>, TransactionError> {
        let mut txn = self.begin(false).await?;
        txn.writes = writes;
        self.commit(txn).await
    }
}
