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

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::TryStreamExt;
use log::debug;
use stream_more::KMerge;
use stream_more::StreamMore;

use crate::errors::TransactionError;
use crate::txn::TransactionService;
use crate::txn::TransactionState;
use crate::util;
use crate::Cell;
use crate::CellEntry;
use crate::CellEntryStream;
use crate::IOResultStream;
use crate::KeyValueService;
use crate::StoredValue;
use crate::TableName;
use crate::Timestamp;

/// Writes staged by a transaction, per table.
pub type Writes = BTreeMap<TableName, BTreeMap<Cell, Option<Vec<u8>>>>;

/// A snapshot-isolated transaction that buffers its writes until commit.
///
/// Reads see the newest version written before `start_ts` by a transaction that committed
/// before `start_ts`, plus the transaction's own staged writes.
///
/// # Isolation Level: Snapshot Isolation
///
/// - Reads never see uncommitted data from other transactions.
/// - Two transactions that write the same cell can not both commit if their lifetimes
///   overlap: the later committer gets [`TransactionError::Conflict`].
/// - Write skew is possible: transactions that read each other's cells but write disjoint
///   cells both commit.
///
/// A version left by a transaction that has not resolved is rolled back by the reader, so a
/// reader never waits.
///
/// Transactions are created and committed by a
/// [`TransactionManager`](crate::TransactionManager).
pub struct Transaction {
    pub(crate) start_ts: Timestamp,

    pub(crate) read_only: bool,

    /// The changes that are staged for commit in each table.
    pub(crate) writes: Writes,

    kvs: Arc<dyn KeyValueService>,

    transactions: Arc<dyn TransactionService>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("start_ts", &self.start_ts)
            .field("read_only", &self.read_only)
            .field("writes", &self.writes)
            .finish()
    }
}

impl Transaction {
    pub(crate) fn new(
        start_ts: Timestamp,
        read_only: bool,
        kvs: Arc<dyn KeyValueService>,
        transactions: Arc<dyn TransactionService>,
    ) -> Self {
        Self {
            start_ts,
            read_only,
            writes: BTreeMap::new(),
            kvs,
            transactions,
        }
    }

    pub fn start_timestamp(&self) -> Timestamp {
        self.start_ts
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Return the staged writes.
    pub fn writes(&self) -> &Writes {
        &self.writes
    }

    pub(crate) fn into_writes(self) -> Writes {
        self.writes
    }

    /// Read the value of a cell, `None` if it is absent, deleted or empty.
    pub async fn get(
        &self,
        table: &TableName,
        cell: &Cell,
    ) -> Result<Option<Vec<u8>>, TransactionError> {
        if let Some(staged) = self.writes.get(table).and_then(|w| w.get(cell)) {
            return Ok(non_empty(staged.clone()));
        }

        let versions = self.kvs.get_versions(table, cell, self.start_ts).await?;
        let visible = self.snapshot().visible_version(versions).await?;

        Ok(visible.and_then(|v| non_empty(v.into_contents())))
    }

    pub fn put(
        &mut self,
        table: &TableName,
        cell: Cell,
        value: Vec<u8>,
    ) -> Result<(), TransactionError> {
        self.write(table, cell, Some(value))
    }

    /// Delete a cell by staging a tombstone.
    pub fn delete(&mut self, table: &TableName, cell: Cell) -> Result<(), TransactionError> {
        self.write(table, cell, None)
    }

    fn write(
        &mut self,
        table: &TableName,
        cell: Cell,
        value: Option<Vec<u8>>,
    ) -> Result<(), TransactionError> {
        if self.read_only {
            return Err(TransactionError::ReadOnlyWrite {
                table: table.to_string(),
            });
        }

        debug!(
            "Transaction::write: start_ts: {}, table: {}, cell: {}, value: {:?}",
            self.start_ts, table, cell, value
        );

        self.writes
            .entry(table.clone())
            .or_default()
            .insert(cell, value);
        Ok(())
    }

    /// Iterate over the visible non-empty cells of `table` from the first cell of `start_row`.
    ///
    /// Staged writes of this transaction are merged over the snapshot. The history is read
    /// lazily, one cell at a time, as the returned stream is polled.
    pub async fn get_range(
        &self,
        table: &TableName,
        start_row: &[u8],
    ) -> Result<IOResultStream<(Cell, Vec<u8>)>, TransactionError> {
        let history = self
            .kvs
            .scan_history(table, start_row, self.start_ts)
            .await?;

        let cursor = VisibleCells {
            history,
            pending: None,
            snapshot: self.snapshot(),
        };

        let base_strm = futures::stream::try_unfold(cursor, |mut cursor| async move {
            let ent = cursor.next_visible().await?;
            Ok::<_, io::Error>(ent.map(|ent| (ent, cursor)))
        })
        .boxed();

        let first = Cell::first_of_row(start_row);
        let staged = self
            .writes
            .get(table)
            .map(|w| {
                w.range(first..)
                    .map(|(c, v)| {
                        let v = StoredValue::new(self.start_ts, v.clone());
                        Ok::<_, io::Error>((c.clone(), v))
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let staged_strm = futures::stream::iter(staged).boxed();

        let kmerge = KMerge::by(util::by_cell_ts);
        let kmerge = kmerge.merge(base_strm).merge(staged_strm);

        // Merge versions of the same cell, keep the staged one
        let coalesce = kmerge.coalesce(util::merge_cell_results);

        let strm = coalesce.try_filter_map(|(cell, v)| {
            let item = non_empty(v.into_contents()).map(|bytes| (cell, bytes));
            futures::future::ready(Ok(item))
        });

        Ok(strm.boxed())
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            start_ts: self.start_ts,
            transactions: self.transactions.clone(),
        }
    }
}

/// The view of the transaction states as of a start timestamp.
#[derive(Clone)]
struct Snapshot {
    start_ts: Timestamp,
    transactions: Arc<dyn TransactionService>,
}

impl Snapshot {
    /// Return the first of `versions` (newest first) that is visible to this snapshot.
    async fn visible_version(
        &self,
        versions: Vec<StoredValue>,
    ) -> Result<Option<StoredValue>, TransactionError> {
        for v in versions {
            match self.resolve(v.timestamp).await? {
                TransactionState::Committed { commit_ts } if commit_ts < self.start_ts => {
                    return Ok(Some(v));
                }
                _ => continue,
            }
        }
        Ok(None)
    }

    /// Get the final state of the writer of a version, rolling it back if it has none.
    async fn resolve(&self, writer_ts: Timestamp) -> Result<TransactionState, TransactionError> {
        if let Some(state) = self.transactions.get_state(writer_ts).await? {
            return Ok(state);
        }

        if self
            .transactions
            .put_unless_exists(writer_ts, TransactionState::Aborted)
            .await?
        {
            debug!(
                "Transaction::resolve: start_ts: {} rolled back unresolved writer {}",
                self.start_ts, writer_ts
            );
            return Ok(TransactionState::Aborted);
        }

        // Lost the race, the writer resolved itself meanwhile.
        let state = self.transactions.get_state(writer_ts).await?;
        state.ok_or_else(|| {
            TransactionError::Storage(io::Error::other(format!(
                "state of transaction {} vanished",
                writer_ts
            )))
        })
    }
}

/// Groups a history stream by cell and yields the version of each cell a snapshot sees.
struct VisibleCells {
    history: CellEntryStream,

    /// The first entry of the next cell, read while looking for the end of the current one.
    pending: Option<CellEntry>,

    snapshot: Snapshot,
}

impl VisibleCells {
    async fn next_visible(&mut self) -> Result<Option<(Cell, StoredValue)>, io::Error> {
        while let Some((cell, mut versions)) = self.next_cell().await? {
            versions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

            let visible = self
                .snapshot
                .visible_version(versions)
                .await
                .map_err(into_io_error)?;

            if let Some(v) = visible {
                return Ok(Some((cell, v)));
            }
        }
        Ok(None)
    }

    /// Read all entries of the next cell.
    async fn next_cell(&mut self) -> Result<Option<(Cell, Vec<StoredValue>)>, io::Error> {
        let first = match self.pending.take() {
            Some(ent) => ent,
            None => match self.history.try_next().await? {
                Some(ent) => ent,
                None => return Ok(None),
            },
        };

        let (cell, v) = first;
        let mut versions = vec![v];

        while let Some((c, v)) = self.history.try_next().await? {
            if c == cell {
                versions.push(v);
            } else {
                self.pending = Some((c, v));
                break;
            }
        }

        Ok(Some((cell, versions)))
    }
}

fn into_io_error(e: TransactionError) -> io::Error {
    match e {
        TransactionError::Storage(e) => e,
        other => io::Error::other(other),
    }
}

fn non_empty(contents: Option<Vec<u8>>) -> Option<Vec<u8>> {
    contents.filter(|v| !v.is_empty())
}
