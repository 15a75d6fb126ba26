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

//! Commit status of transactions, keyed by start timestamp.
//!
//! [`TransactionService`] is the durable record written by committing and rolling-back
//! transactions. [`CommitStatusOracle`] is the read-only question a sweep asks of it:
//! "is the version written at this start timestamp committed, as seen from the sweep point?"

use std::collections::BTreeMap;
use std::io;
use std::sync::Mutex;
use std::sync::MutexGuard;

use serde::Deserialize;
use serde::Serialize;

use crate::Timestamp;

/// The final state of a transaction, recorded once and never changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    Committed { commit_ts: Timestamp },
    Aborted,
}

/// Durable map from start timestamp to [`TransactionState`].
///
/// A start timestamp without a state belongs to a transaction that is still running,
/// or that died before committing.
#[async_trait::async_trait]
pub trait TransactionService: Send + Sync {
    async fn get_state(&self, start_ts: Timestamp)
        -> Result<Option<TransactionState>, io::Error>;

    /// Get the states of several transactions, in the order of `start_timestamps`.
    async fn get_states(
        &self,
        start_timestamps: &[Timestamp],
    ) -> Result<Vec<Option<TransactionState>>, io::Error> {
        let mut states = Vec::with_capacity(start_timestamps.len());
        for ts in start_timestamps {
            states.push(self.get_state(*ts).await?);
        }
        Ok(states)
    }

    /// Record `state` for `start_ts` unless a state is already recorded.
    ///
    /// Returns whether `state` was recorded. The first writer wins: this is how a
    /// committing transaction and a reader rolling it back agree on a single outcome.
    async fn put_unless_exists(
        &self,
        start_ts: Timestamp,
        state: TransactionState,
    ) -> Result<bool, io::Error>;
}

/// A process-local [`TransactionService`].
#[derive(Debug, Default)]
pub struct InMemoryTransactionService {
    states: Mutex<BTreeMap<Timestamp, TransactionState>>,
}

impl InMemoryTransactionService {
    fn states(&self) -> Result<MutexGuard<'_, BTreeMap<Timestamp, TransactionState>>, io::Error> {
        self.states
            .lock()
            .map_err(|e| io::Error::other(format!("transaction table lock poisoned: {}", e)))
    }

    /// Synchronous form of [`TransactionService::put_unless_exists`].
    pub fn record(&self, start_ts: Timestamp, state: TransactionState) -> Result<bool, io::Error> {
        let mut states = self.states()?;
        if states.contains_key(&start_ts) {
            return Ok(false);
        }
        states.insert(start_ts, state);
        Ok(true)
    }

    /// Synchronous form of [`TransactionService::get_state`].
    pub fn state(&self, start_ts: Timestamp) -> Result<Option<TransactionState>, io::Error> {
        Ok(self.states()?.get(&start_ts).copied())
    }
}

#[async_trait::async_trait]
impl TransactionService for InMemoryTransactionService {
    async fn get_state(
        &self,
        start_ts: Timestamp,
    ) -> Result<Option<TransactionState>, io::Error> {
        self.state(start_ts)
    }

    async fn get_states(
        &self,
        start_timestamps: &[Timestamp],
    ) -> Result<Vec<Option<TransactionState>>, io::Error> {
        let states = self.states()?;
        Ok(start_timestamps
            .iter()
            .map(|ts| states.get(ts).copied())
            .collect())
    }

    async fn put_unless_exists(
        &self,
        start_ts: Timestamp,
        state: TransactionState,
    ) -> Result<bool, io::Error> {
        self.record(start_ts, state)
    }
}

/// How a version looks from a sweep point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitStatus {
    /// Committed before the sweep point; the value is durably visible.
    Committed,

    /// Rolled back; the value must be ignored and may always be removed.
    Aborted,

    /// Not resolved as of the sweep point: still running, or committed at or after it.
    /// It has to be treated as possibly committed.
    Unresolved,
}

impl CommitStatus {
    /// Classify a recorded transaction state as seen from `as_of`.
    pub fn classify(state: Option<TransactionState>, as_of: Timestamp) -> Self {
        match state {
            Some(TransactionState::Committed { commit_ts }) if commit_ts < as_of => {
                CommitStatus::Committed
            }
            Some(TransactionState::Committed { .. }) => CommitStatus::Unresolved,
            Some(TransactionState::Aborted) => CommitStatus::Aborted,
            None => CommitStatus::Unresolved,
        }
    }
}

/// Classifies start timestamps as committed, aborted or unresolved.
///
/// Every [`TransactionService`] is an oracle. Tests can provide their own implementation,
/// e.g., one that fails.
#[async_trait::async_trait]
pub trait CommitStatusOracle: Send + Sync {
    async fn commit_status(
        &self,
        start_ts: Timestamp,
        as_of: Timestamp,
    ) -> Result<CommitStatus, io::Error>;

    /// Classify several start timestamps at once, in the order of `start_timestamps`.
    async fn commit_statuses(
        &self,
        start_timestamps: &[Timestamp],
        as_of: Timestamp,
    ) -> Result<Vec<CommitStatus>, io::Error> {
        let mut statuses = Vec::with_capacity(start_timestamps.len());
        for ts in start_timestamps {
            statuses.push(self.commit_status(*ts, as_of).await?);
        }
        Ok(statuses)
    }
}

#[async_trait::async_trait]
impl<T> CommitStatusOracle for T
where T: TransactionService + ?Sized
{
    async fn commit_status(
        &self,
        start_ts: Timestamp,
        as_of: Timestamp,
    ) -> Result<CommitStatus, io::Error> {
        let state = self.get_state(start_ts).await?;
        Ok(CommitStatus::classify(state, as_of))
    }

    async fn commit_statuses(
        &self,
        start_timestamps: &[Timestamp],
        as_of: Timestamp,
    ) -> Result<Vec<CommitStatus>, io::Error> {
        let states = self.get_states(start_timestamps).await?;
        Ok(states
            .into_iter()
            .map(|s| CommitStatus::classify(s, as_of))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let committed = |commit_ts| Some(TransactionState::Committed { commit_ts });

        assert_eq!(CommitStatus::classify(committed(5), 10), CommitStatus::Committed);
        assert_eq!(CommitStatus::classify(committed(10), 10), CommitStatus::Unresolved);
        assert_eq!(CommitStatus::classify(committed(11), 10), CommitStatus::Unresolved);
        assert_eq!(
            CommitStatus::classify(Some(TransactionState::Aborted), 10),
            CommitStatus::Aborted
        );
        assert_eq!(CommitStatus::classify(None, 10), CommitStatus::Unresolved);
    }

    #[tokio::test]
    async fn test_put_unless_exists_first_writer_wins() -> anyhow::Result<()> {
        let txs = InMemoryTransactionService::default();

        assert!(
            txs.put_unless_exists(3, TransactionState::Committed { commit_ts: 4 })
                .await?
        );
        assert!(!txs.put_unless_exists(3, TransactionState::Aborted).await?);

        assert_eq!(
            txs.get_state(3).await?,
            Some(TransactionState::Committed { commit_ts: 4 })
        );
        assert_eq!(txs.get_state(5).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_transaction_service_as_oracle() -> anyhow::Result<()> {
        let txs = InMemoryTransactionService::default();
        txs.record(10, TransactionState::Committed { commit_ts: 11 })?;
        txs.record(20, TransactionState::Aborted)?;
        txs.record(30, TransactionState::Committed { commit_ts: 45 })?;

        let got = txs.commit_statuses(&[10, 20, 30, 40], 40).await?;
        assert_eq!(got, vec![
            CommitStatus::Committed,
            CommitStatus::Aborted,
            CommitStatus::Unresolved,
            CommitStatus::Unresolved,
        ]);

        assert_eq!(txs.commit_status(30, 50).await?, CommitStatus::Committed);
        Ok(())
    }
}
