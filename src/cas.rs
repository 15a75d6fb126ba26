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

//! A single integer value read and updated through transactions.
//!
//! Every update is a [`TransactionTask`] run with retry, so concurrent clients racing on the
//! same value serialize through write-write conflicts: of two check-and-sets that observed
//! the same old value, at most one succeeds.

use std::io;
use std::sync::Arc;

use log::debug;

use crate::errors::TransactionError;
use crate::txn::Transaction;
use crate::txn::TransactionManager;
use crate::txn::TransactionTask;
use crate::Cell;
use crate::TableName;

/// Table the value lives in unless configured otherwise.
pub const DEFAULT_TABLE: &str = "check_and_set.values";

const DEFAULT_ROW: &[u8] = b"cas";
const DEFAULT_COLUMN: &[u8] = b"v";

/// Reads and updates one `i64` stored at a fixed cell.
///
/// The value is stored as 8 big-endian bytes; an absent value is a tombstone.
#[derive(Debug, Clone)]
pub struct CheckAndSetClient {
    manager: Arc<TransactionManager>,
    value: PersistentValue,
}

impl CheckAndSetClient {
    pub fn new(manager: Arc<TransactionManager>) -> Self {
        Self::with_cell(
            manager,
            TableName::new(DEFAULT_TABLE),
            Cell::new(DEFAULT_ROW, DEFAULT_COLUMN),
        )
    }

    pub fn with_cell(manager: Arc<TransactionManager>, table: TableName, cell: Cell) -> Self {
        Self {
            manager,
            value: PersistentValue { table, cell },
        }
    }

    pub fn table(&self) -> &TableName {
        &self.value.table
    }

    pub fn cell(&self) -> &Cell {
        &self.value.cell
    }

    /// Read the current value in a read-only transaction.
    pub async fn get(&self) -> Result<Option<i64>, TransactionError> {
        self.manager.run_task_read_only(&Get(&self.value)).await
    }

    /// Unconditionally replace the value; `None` removes it.
    pub async fn set(&self, value: Option<i64>) -> Result<(), TransactionError> {
        self.manager
            .run_task_with_retry(&Set(&self.value, value))
            .await
    }

    /// Replace the value with `new` if it currently equals `old`.
    ///
    /// Returns whether the value was replaced. A mismatch is not an error.
    pub async fn check_and_set(
        &self,
        old: Option<i64>,
        new: Option<i64>,
    ) -> Result<bool, TransactionError> {
        let task = CheckAndSet {
            value: &self.value,
            old,
            new,
        };
        self.manager.run_task_with_retry(&task).await
    }

    /// Read the value as an `i32`, `-1` if unset.
    pub async fn get_int(&self) -> Result<i32, TransactionError> {
        match self.get().await? {
            None => Ok(-1),
            Some(v) => i32::try_from(v).map_err(|e| {
                TransactionError::Storage(io::Error::new(io::ErrorKind::InvalidData, e))
            }),
        }
    }

    pub async fn set_int(&self, value: i32) -> Result<(), TransactionError> {
        self.set(Some(i64::from(value))).await
    }

    pub async fn check_and_set_int(&self, old: i32, new: i32) -> Result<bool, TransactionError> {
        self.check_and_set(Some(i64::from(old)), Some(i64::from(new)))
            .await
    }
}

/// The location of the value and its encoding, as seen by a single transaction.
#[derive(Debug, Clone)]
struct PersistentValue {
    table: TableName,
    cell: Cell,
}

impl PersistentValue {
    async fn get(&self, txn: &Transaction) -> Result<Option<i64>, TransactionError> {
        let bytes = txn.get(&self.table, &self.cell).await?;
        let value = bytes.map(|b| decode(&b)).transpose()?;
        Ok(value)
    }

    fn set(&self, txn: &mut Transaction, value: Option<i64>) -> Result<(), TransactionError> {
        match value {
            Some(v) => txn.put(&self.table, self.cell.clone(), encode(v)),
            None => txn.delete(&self.table, self.cell.clone()),
        }
    }
}

struct Get<'a>(&'a PersistentValue);

#[async_trait::async_trait]
impl<'a> TransactionTask for Get<'a> {
    type Output = Option<i64>;

    async fn execute(&self, txn: &mut Transaction) -> Result<Option<i64>, TransactionError> {
        self.0.get(txn).await
    }
}

struct Set<'a>(&'a PersistentValue, Option<i64>);

#[async_trait::async_trait]
impl<'a> TransactionTask for Set<'a> {
    type Output = ();

    async fn execute(&self, txn: &mut Transaction) -> Result<(), TransactionError> {
        self.0.set(txn, self.1)
    }
}

struct CheckAndSet<'a> {
    value: &'a PersistentValue,
    old: Option<i64>,
    new: Option<i64>,
}

#[async_trait::async_trait]
impl<'a> TransactionTask for CheckAndSet<'a> {
    type Output = bool;

    async fn execute(&self, txn: &mut Transaction) -> Result<bool, TransactionError> {
        let current = self.value.get(txn).await?;

        if current != self.old {
            debug!(
                "CheckAndSet: start_ts: {}, expect: {:?}, actual: {:?}",
                txn.start_timestamp(),
                self.old,
                current
            );
            return Ok(false);
        }

        self.value.set(txn, self.new)?;
        Ok(true)
    }
}

fn encode(v: i64) -> Vec<u8> {
    v.to_be_bytes().to_vec()
}

fn decode(bytes: &[u8]) -> Result<i64, io::Error> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("expect 8 bytes for an i64, got {}", bytes.len()),
        )
    })?;
    Ok(i64::from_be_bytes(arr))
}

#[cfg(test)]
mod tests {
    use futures::future::join_all;

    use super::*;
    use crate::config::TransactionConfig;

    fn client() -> CheckAndSetClient {
        CheckAndSetClient::new(Arc::new(TransactionManager::in_memory()))
    }

    #[test]
    fn test_encoding() -> anyhow::Result<()> {
        assert_eq!(encode(1), vec![0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(decode(&encode(-5))?, -5);

        let err = decode(b"abc").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        Ok(())
    }

    #[tokio::test]
    async fn test_check_and_set_sequence() -> anyhow::Result<()> {
        let c = client();

        assert_eq!(c.get().await?, None);

        c.set(Some(0)).await?;
        assert_eq!(c.get().await?, Some(0));

        assert!(c.check_and_set(Some(0), Some(1)).await?);
        assert_eq!(c.get().await?, Some(1));

        assert!(!c.check_and_set(Some(0), Some(2)).await?);
        assert_eq!(c.get().await?, Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn test_set_none_and_absent_check() -> anyhow::Result<()> {
        let c = client();

        // Set if absent
        assert!(c.check_and_set(None, Some(7)).await?);
        assert!(!c.check_and_set(None, Some(8)).await?);
        assert_eq!(c.get().await?, Some(7));

        c.set(None).await?;
        assert_eq!(c.get().await?, None);

        assert!(c.check_and_set(None, Some(9)).await?);
        assert_eq!(c.get().await?, Some(9));
        Ok(())
    }

    #[tokio::test]
    async fn test_int_conveniences() -> anyhow::Result<()> {
        let c = client();
        assert_eq!(c.get_int().await?, -1);

        c.set_int(3).await?;
        assert_eq!(c.get_int().await?, 3);

        assert!(c.check_and_set_int(3, 4).await?);
        assert!(!c.check_and_set_int(3, 5).await?);
        assert_eq!(c.get_int().await?, 4);

        c.set(Some(i64::MAX)).await?;
        let res = c.get_int().await;
        assert!(matches!(res, Err(TransactionError::Storage(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_clients_on_different_cells() -> anyhow::Result<()> {
        let manager = Arc::new(TransactionManager::in_memory());

        let a = CheckAndSetClient::new(manager.clone());
        let b = CheckAndSetClient::with_cell(
            manager.clone(),
            TableName::new("ns.other"),
            Cell::new("row", "col"),
        );

        a.set_int(1).await?;
        b.set_int(2).await?;

        assert_eq!(a.get_int().await?, 1);
        assert_eq!(b.get_int().await?, 2);
        assert_eq!(b.table().as_str(), "ns.other");
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_check_and_set_only_one_wins() -> anyhow::Result<()> {
        let manager = TransactionManager::in_memory()
            .with_config(TransactionConfig::default().with_max_attempts(100));
        let c = CheckAndSetClient::new(Arc::new(manager));
        c.set(Some(0)).await?;

        let handles = (1..=8)
            .map(|i| {
                let c = c.clone();
                tokio::spawn(async move { c.check_and_set(Some(0), Some(i)).await })
            })
            .collect::<Vec<_>>();

        let mut winners = vec![];
        for (i, res) in (1..=8).zip(join_all(handles).await) {
            if res?? {
                winners.push(i);
            }
        }

        assert_eq!(winners.len(), 1, "winners: {:?}", winners);
        assert_eq!(c.get().await?, Some(winners[0]));
        Ok(())
    }
}
