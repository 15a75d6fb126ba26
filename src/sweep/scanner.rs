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

use std::io;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures_util::StreamExt;
use futures_util::TryStreamExt;
use log::debug;
use log::info;

use crate::config::SweepConfig;
use crate::errors::SweepError;
use crate::sweep::candidate::ScanStats;
use crate::sweep::CandidateCellForSweeping;
use crate::sweep::CandidateCellForSweepingRequest;
use crate::txn::CommitStatus;
use crate::txn::CommitStatusOracle;
use crate::Cell;
use crate::CellEntry;
use crate::CellEntryStream;
use crate::KeyValueService;
use crate::StoredValue;
use crate::TableName;
use crate::Timestamp;

/// A lazy stream of candidate batches. Dropping it releases the underlying history scan.
pub type CandidateBatchStream =
    BoxStream<'static, Result<Vec<CandidateCellForSweeping>, SweepError>>;

/// Finds the versions a sweep pass may reclaim.
///
/// A scan reads the raw history of a table in cell order, groups it by cell, classifies every
/// start timestamp with the [`CommitStatusOracle`] as of the sweep timestamp, and yields the
/// surviving cells in batches:
///
/// - Ignored timestamps and timestamps at or above the sweep timestamp are dropped.
/// - Aborted timestamps are dropped.
/// - Committed timestamps are kept.
/// - Unresolved timestamps are kept if they are at or above the request's
///   `min_uncommitted_start_timestamp`, and withheld otherwise.
/// - Under [`SweepPolicy::Conservative`](crate::SweepPolicy::Conservative) a cell whose latest
///   committed value is empty is withheld entirely.
///
/// The scan is read-only. It fails with [`SweepError::StorageReadFailure`] or
/// [`SweepError::OracleUnavailable`]; batches yielded before the failure stay valid, and a
/// new scan can resume at the row of the last candidate.
pub struct SweepCandidateScanner<KVS: ?Sized, O: ?Sized> {
    kvs: Arc<KVS>,
    oracle: Arc<O>,
    config: SweepConfig,
}

impl<KVS: ?Sized, O: ?Sized> Clone for SweepCandidateScanner<KVS, O> {
    fn clone(&self) -> Self {
        Self {
            kvs: self.kvs.clone(),
            oracle: self.oracle.clone(),
            config: self.config.clone(),
        }
    }
}

impl<KVS, O> SweepCandidateScanner<KVS, O>
where
    KVS: KeyValueService + ?Sized + 'static,
    O: CommitStatusOracle + ?Sized + 'static,
{
    pub fn new(kvs: Arc<KVS>, oracle: Arc<O>) -> Self {
        Self {
            kvs,
            oracle,
            config: SweepConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: SweepConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Start a scan of `table`.
    ///
    /// Fails at once if the history scan can not be opened; any later failure is yielded by
    /// the returned stream, which then ends.
    pub async fn scan(
        &self,
        table: &TableName,
        request: CandidateCellForSweepingRequest,
    ) -> Result<CandidateBatchStream, SweepError> {
        let batch_size_hint = request
            .batch_size_hint()
            .unwrap_or_else(|| self.config.effective_candidate_batch_hint());

        debug!(
            "SweepCandidateScanner::scan: table: {}, request: {:?}, batch_size_hint: {}",
            table, request, batch_size_hint
        );

        let raw = self
            .kvs
            .scan_history(
                table,
                request.start_row_inclusive(),
                request.sweep_timestamp(),
            )
            .await
            .map_err(SweepError::StorageReadFailure)?;

        let state = ScanState {
            table: table.clone(),
            raw,
            exhausted: false,
            pending: None,
            last_cell: None,
            oracle: self.oracle.clone(),
            request,
            batch_size_hint,
            stats: ScanStats::default(),
        };

        let strm = futures::stream::try_unfold(state, |mut state| async move {
            let batch = state.next_batch().await?;
            Ok::<_, SweepError>(batch.map(|b| (b, state)))
        });

        Ok(strm.boxed())
    }
}

/// The cursor of one scan.
struct ScanState<O: ?Sized> {
    table: TableName,

    raw: CellEntryStream,

    /// The raw stream returned its last entry and has been released.
    exhausted: bool,

    /// The first entry of the next cell, read while looking for the end of the current one.
    pending: Option<CellEntry>,

    /// The last cell grouped, to verify the store returns cells in strictly ascending order.
    last_cell: Option<Cell>,

    oracle: Arc<O>,
    request: CandidateCellForSweepingRequest,
    batch_size_hint: usize,
    stats: ScanStats,
}

impl<O> ScanState<O>
where O: CommitStatusOracle + ?Sized
{
    /// Build the next non-empty batch, `None` when the table is exhausted.
    async fn next_batch(&mut self) -> Result<Option<Vec<CandidateCellForSweeping>>, SweepError> {
        let mut batch = Vec::new();
        let mut examined = 0;

        while let Some((cell, versions)) = self.next_cell().await? {
            examined += versions.len();

            if let Some(candidate) = self.classify(cell, versions).await? {
                batch.push(candidate);
            }

            if examined >= self.batch_size_hint && !batch.is_empty() {
                break;
            }
        }

        if batch.is_empty() {
            info!(
                "SweepCandidateScanner: scan of {} done: {}",
                self.table, self.stats
            );
            return Ok(None);
        }

        self.stats.batches += 1;
        self.stats.candidates += batch.len() as u64;
        Ok(Some(batch))
    }

    /// Read all raw entries of the next cell.
    async fn next_cell(&mut self) -> Result<Option<(Cell, Vec<StoredValue>)>, SweepError> {
        let first = match self.pending.take() {
            Some(ent) => ent,
            None => match self.next_raw().await? {
                Some(ent) => ent,
                None => return Ok(None),
            },
        };

        let (cell, v) = first;
        let mut versions = vec![v];

        while let Some((c, v)) = self.next_raw().await? {
            if c == cell {
                versions.push(v);
            } else {
                self.pending = Some((c, v));
                break;
            }
        }

        if let Some(last) = &self.last_cell {
            if cell <= *last {
                return Err(SweepError::StorageReadFailure(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "history of {} is out of order: {} after {}",
                        self.table, cell, last
                    ),
                )));
            }
        }
        self.last_cell = Some(cell.clone());

        Ok(Some((cell, versions)))
    }

    async fn next_raw(&mut self) -> Result<Option<CellEntry>, SweepError> {
        if self.exhausted {
            return Ok(None);
        }

        let ent = self
            .raw
            .try_next()
            .await
            .map_err(SweepError::StorageReadFailure)?;

        if ent.is_none() {
            self.exhausted = true;
            self.raw = futures::stream::empty().boxed();
        }
        Ok(ent)
    }

    /// Decide which versions of a cell are candidates.
    async fn classify(
        &mut self,
        cell: Cell,
        versions: Vec<StoredValue>,
    ) -> Result<Option<CandidateCellForSweeping>, SweepError> {
        let examined = versions.len() as u64;
        self.stats.cells_examined += 1;
        self.stats.cell_ts_pairs_examined += examined;

        let sweep_ts = self.request.sweep_timestamp();
        let min_uncommitted = self.request.min_uncommitted_start_timestamp();
        let ignored = self.request.timestamps_to_ignore();

        let mut versions = versions
            .into_iter()
            .filter(|v| v.timestamp < sweep_ts && !ignored.contains(&v.timestamp))
            .collect::<Vec<_>>();

        // The store may return the versions of a cell in any order.
        versions.sort_by_key(|v| v.timestamp);
        versions.dedup_by_key(|v| v.timestamp);

        if versions.is_empty() {
            return Ok(None);
        }

        let timestamps = versions.iter().map(|v| v.timestamp).collect::<Vec<_>>();

        let statuses = self
            .oracle
            .commit_statuses(&timestamps, sweep_ts)
            .await
            .map_err(SweepError::OracleUnavailable)?;

        if statuses.len() != timestamps.len() {
            return Err(SweepError::OracleUnavailable(io::Error::other(format!(
                "expect {} commit statuses, got {}",
                timestamps.len(),
                statuses.len()
            ))));
        }

        let mut kept = Vec::with_capacity(versions.len());
        // Timestamp and emptiness of the newest committed version.
        let mut latest_committed: Option<(Timestamp, bool)> = None;

        for (v, status) in versions.into_iter().zip(statuses) {
            match status {
                CommitStatus::Committed => {
                    latest_committed = Some((v.timestamp, v.is_empty()));
                    kept.push(v);
                }
                CommitStatus::Unresolved if v.timestamp >= min_uncommitted => kept.push(v),
                CommitStatus::Unresolved => self.stats.unresolved_withheld += 1,
                CommitStatus::Aborted => self.stats.aborted_discarded += 1,
            }
        }

        if kept.is_empty() {
            return Ok(None);
        }

        // A cell with no committed version is not empty.
        let (latest_ts, is_latest_value_empty) = latest_committed.unwrap_or_default();

        if is_latest_value_empty && !self.request.should_check_if_latest_value_is_empty() {
            debug!(
                "SweepCandidateScanner: {} withheld: latest committed value at {} is empty",
                cell, latest_ts
            );
            self.stats.suppressed_empty += 1;
            return Ok(None);
        }

        Ok(Some(CandidateCellForSweeping {
            cell,
            sorted_timestamps: kept.iter().map(|v| v.timestamp).collect(),
            is_latest_value_empty,
            num_cells_ts_pairs_examined: examined,
        }))
    }
}
