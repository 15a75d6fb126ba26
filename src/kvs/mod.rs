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

//! Defines the versioned key-value store interface.
//!
//! The [`KeyValueService`] trait is the only way this crate touches stored data.
//! The storage engine behind it is external; [`InMemoryKeyValueService`] is a complete
//! implementation used by tests and demos.

mod in_memory;
pub mod table;

use std::collections::BTreeMap;
use std::io;

pub use in_memory::InMemoryKeyValueService;

use crate::Cell;
use crate::CellEntryStream;
use crate::StoredValue;
use crate::TableName;
use crate::Timestamp;

/// A byte-oriented store that keeps every version of every cell, keyed by start timestamp.
///
/// Versions are append-only: a `(cell, timestamp)` pair is written at most once.
///
/// # Examples
///
/// ```rust,no_run
/// use std::collections::BTreeMap;
/// use std::io;
///
/// use futures_util::TryStreamExt;
/// use mvcc_sweep::Cell;
/// use mvcc_sweep::InMemoryKeyValueService;
/// use mvcc_sweep::KeyValueService;
/// use mvcc_sweep::TableName;
///
/// #[tokio::main]
/// async fn main() -> io::Result<()> {
///     let kvs = InMemoryKeyValueService::default();
///     let table = TableName::new("ns.t");
///
///     let writes = BTreeMap::from([(Cell::new(*b"r", *b"c"), Some(b"v".to_vec()))]);
///     kvs.put(&table, writes, 10).await?;
///
///     let history = kvs.scan_history(&table, b"", 100).await?;
///     let entries = history.try_collect::<Vec<_>>().await?;
///     assert_eq!(entries.len(), 1);
///
///     Ok(())
/// }
/// ```
#[async_trait::async_trait]
pub trait KeyValueService: Send + Sync {
    /// Get every version of `cell` written strictly before `below_ts`, newest first.
    ///
    /// A missing table or cell returns an empty vector.
    async fn get_versions(
        &self,
        table: &TableName,
        cell: &Cell,
        below_ts: Timestamp,
    ) -> Result<Vec<StoredValue>, io::Error>;

    /// Write a version of every cell in `writes` at `timestamp`.
    ///
    /// A `None` value writes a tombstone.
    /// Fails with [`io::ErrorKind::AlreadyExists`] and writes nothing if any of the cells
    /// already has a version at `timestamp`.
    async fn put(
        &self,
        table: &TableName,
        writes: BTreeMap<Cell, Option<Vec<u8>>>,
        timestamp: Timestamp,
    ) -> Result<(), io::Error>;

    /// Stream the raw version history of `table` from the first cell of `start_row_inclusive`.
    ///
    /// Only versions written strictly before `below_ts` are returned.
    /// Cells are returned in ascending order; the versions of one cell are adjacent but
    /// their timestamp order is up to the implementation.
    ///
    /// Dropping the returned stream releases the scan.
    async fn scan_history(
        &self,
        table: &TableName,
        start_row_inclusive: &[u8],
        below_ts: Timestamp,
    ) -> Result<CellEntryStream, io::Error>;
}
