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

//! Provides a simple in-memory implementation of [`KeyValueService`].

use std::collections::BTreeMap;
use std::collections::Bound;
use std::io;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;

use futures_util::StreamExt;
use futures_util::TryStreamExt;
use log::debug;

use crate::config::StorageConfig;
use crate::kvs::table::VersionKey;
use crate::kvs::table::VersionedTable;
use crate::kvs::KeyValueService;
use crate::Cell;
use crate::CellEntry;
use crate::CellEntryStream;
use crate::StoredValue;
use crate::TableName;
use crate::Timestamp;

type Tables = BTreeMap<TableName, VersionedTable>;

/// An in-memory [`KeyValueService`] keeping all tables in [`VersionedTable`]s.
///
/// History scans read the table page by page, holding the read lock only while a page is
/// copied out, so a scan never materializes a whole table and never blocks writers for long.
///
/// Cloning shares the underlying data.
#[derive(Debug, Clone)]
pub struct InMemoryKeyValueService {
    tables: Arc<RwLock<Tables>>,
    config: StorageConfig,
    open_scans: Arc<AtomicUsize>,
}

impl Default for InMemoryKeyValueService {
    fn default() -> Self {
        Self::new(StorageConfig::default())
    }
}

impl InMemoryKeyValueService {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            tables: Default::default(),
            config,
            open_scans: Default::default(),
        }
    }

    /// Number of history scans whose stream has not been dropped yet.
    pub fn open_scans(&self) -> usize {
        self.open_scans.load(Ordering::SeqCst)
    }

    /// Number of versions stored in `table`.
    pub fn num_versions(&self, table: &TableName) -> Result<usize, io::Error> {
        let tables = read_lock(&self.tables)?;
        Ok(tables.get(table).map(|t| t.len()).unwrap_or_default())
    }

    fn write_tables(&self) -> Result<RwLockWriteGuard<'_, Tables>, io::Error> {
        self.tables
            .write()
            .map_err(|e| io::Error::other(format!("in-memory kvs lock poisoned: {}", e)))
    }
}

fn read_lock(tables: &RwLock<Tables>) -> Result<RwLockReadGuard<'_, Tables>, io::Error> {
    tables
        .read()
        .map_err(|e| io::Error::other(format!("in-memory kvs lock poisoned: {}", e)))
}

#[async_trait::async_trait]
impl KeyValueService for InMemoryKeyValueService {
    async fn get_versions(
        &self,
        table: &TableName,
        cell: &Cell,
        below_ts: Timestamp,
    ) -> Result<Vec<StoredValue>, io::Error> {
        let tables = read_lock(&self.tables)?;
        let versions = tables
            .get(table)
            .map(|t| t.versions(cell, below_ts))
            .unwrap_or_default();
        Ok(versions)
    }

    async fn put(
        &self,
        table: &TableName,
        writes: BTreeMap<Cell, Option<Vec<u8>>>,
        timestamp: Timestamp,
    ) -> Result<(), io::Error> {
        let mut tables = self.write_tables()?;
        let t = tables.entry(table.clone()).or_default();

        // All or nothing
        t.check_absent(writes.keys(), timestamp)
            .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e))?;

        for (cell, contents) in writes {
            t.insert(cell, timestamp, contents)
                .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e))?;
        }
        Ok(())
    }

    async fn scan_history(
        &self,
        table: &TableName,
        start_row_inclusive: &[u8],
        below_ts: Timestamp,
    ) -> Result<CellEntryStream, io::Error> {
        debug!(
            "InMemoryKeyValueService::scan_history: table: {}, start_row: {:?}, below_ts: {}",
            table, start_row_inclusive, below_ts
        );

        let pager = HistoryPager {
            tables: self.tables.clone(),
            table: table.clone(),
            next: Some(Bound::Included(VersionedTable::row_start_key(
                start_row_inclusive,
            ))),
            below_ts,
            page_size: self.config.effective_scan_page_size(),
            _guard: OpenScanGuard::new(self.open_scans.clone()),
        };

        let strm = futures::stream::try_unfold(pager, |mut pager| async move {
            let Some(page) = pager.next_page()? else {
                return Ok::<_, io::Error>(None);
            };
            Ok(Some((page, pager)))
        })
        .map_ok(|page| futures::stream::iter(page.into_iter().map(Ok::<_, io::Error>)))
        .try_flatten();

        Ok(strm.boxed())
    }
}

/// Reads a table page by page, resuming after the last key of the previous page.
struct HistoryPager {
    tables: Arc<RwLock<Tables>>,
    table: TableName,
    /// Where the next page starts, `None` once the table is exhausted.
    next: Option<Bound<VersionKey>>,
    below_ts: Timestamp,
    page_size: usize,
    _guard: OpenScanGuard,
}

impl HistoryPager {
    fn next_page(&mut self) -> Result<Option<Vec<CellEntry>>, io::Error> {
        let Some(start) = self.next.take() else {
            return Ok(None);
        };

        let tables = read_lock(&self.tables)?;
        let Some(t) = tables.get(&self.table) else {
            return Ok(None);
        };

        let page = t.history_page(start, self.below_ts, self.page_size);
        self.next = page.resume_after.map(Bound::Excluded);

        Ok(Some(page.entries))
    }
}

/// Counts a history scan as open until the scan stream is dropped.
#[derive(Debug)]
struct OpenScanGuard(Arc<AtomicUsize>);

impl OpenScanGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for OpenScanGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
