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

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::collections::Bound;

use crate::Cell;
use crate::CellEntry;
use crate::StoredValue;
use crate::Timestamp;

/// Key of a version in a [`VersionedTable`]: newer versions of a cell sort first.
pub type VersionKey = (Cell, Reverse<Timestamp>);

/// Errors that can occur during table insert operations.
#[derive(Clone, PartialEq, Eq, thiserror::Error, Debug)]
pub enum InsertError {
    /// Versions are appended, never overwritten.
    #[error("AlreadyExists: cell {cell} already has a version at timestamp {timestamp}")]
    AlreadyExists { cell: Cell, timestamp: Timestamp },
}

/// One page of a history scan.
#[derive(Debug, Default)]
pub struct HistoryPage {
    /// Entries below the requested timestamp, in table order.
    pub entries: Vec<CellEntry>,

    /// The last key this page looked at, `None` if the table is exhausted.
    pub resume_after: Option<VersionKey>,
}

/// An in-memory table that keeps every version of every cell.
#[derive(Debug, Default, Clone)]
pub struct VersionedTable {
    /// Keep the most recent version of a cell at the top of the cell's run.
    ///
    /// A tombstone record does not have a value.
    pub(crate) inner: BTreeMap<VersionKey, Option<Vec<u8>>>,
}

impl VersionedTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Check that none of `cells` already has a version at `timestamp`.
    pub fn check_absent<'a>(
        &self,
        cells: impl IntoIterator<Item = &'a Cell>,
        timestamp: Timestamp,
    ) -> Result<(), InsertError> {
        for cell in cells {
            if self.inner.contains_key(&(cell.clone(), Reverse(timestamp))) {
                return Err(InsertError::AlreadyExists {
                    cell: cell.clone(),
                    timestamp,
                });
            }
        }
        Ok(())
    }

    pub fn insert(
        &mut self,
        cell: Cell,
        timestamp: Timestamp,
        contents: Option<Vec<u8>>,
    ) -> Result<(), InsertError> {
        self.check_absent([&cell], timestamp)?;
        self.inner.insert((cell, Reverse(timestamp)), contents);
        Ok(())
    }

    /// All versions of `cell` written strictly before `below_ts`, newest first.
    pub fn versions(&self, cell: &Cell, below_ts: Timestamp) -> Vec<StoredValue> {
        if below_ts == 0 {
            return vec![];
        }

        let start = (cell.clone(), Reverse(below_ts - 1));
        let end = (cell.clone(), Reverse(0));

        self.inner
            .range(start..=end)
            .map(|((_c, Reverse(ts)), v)| StoredValue::new(*ts, v.clone()))
            .collect()
    }

    /// The key a history scan starting at `row` starts from.
    ///
    /// `Reverse(Timestamp::MAX)` is the smallest timestamp part, so every version of the first
    /// cell of `row` is included.
    pub fn row_start_key(row: &[u8]) -> VersionKey {
        (Cell::first_of_row(row), Reverse(Timestamp::MAX))
    }

    /// Read at most `limit` versions starting at `start`, keeping those below `below_ts`.
    pub fn history_page(
        &self,
        start: Bound<VersionKey>,
        below_ts: Timestamp,
        limit: usize,
    ) -> HistoryPage {
        let mut page = HistoryPage::default();
        let mut seen = 0;

        for ((cell, Reverse(ts)), v) in self.inner.range((start, Bound::Unbounded)) {
            seen += 1;

            if *ts < below_ts {
                page.entries
                    .push((cell.clone(), StoredValue::new(*ts, v.clone())));
            }

            if seen == limit {
                page.resume_after = Some((cell.clone(), Reverse(*ts)));
                break;
            }
        }

        page
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(r: u8, c: u8) -> Cell {
        Cell::new(vec![r], vec![c])
    }

    fn build() -> VersionedTable {
        let mut t = VersionedTable::new();
        t.insert(cell(1, 1), 10, Some(b"a".to_vec())).unwrap();
        t.insert(cell(1, 1), 20, None).unwrap();
        t.insert(cell(1, 1), 30, Some(b"c".to_vec())).unwrap();
        t.insert(cell(1, 2), 5, Some(b"d".to_vec())).unwrap();
        t.insert(cell(2, 1), 15, Some(vec![])).unwrap();
        t
    }

    #[test]
    fn test_insert_rejects_overwrite() {
        let mut t = build();
        let res = t.insert(cell(1, 1), 20, Some(b"x".to_vec()));
        assert_eq!(
            res,
            Err(InsertError::AlreadyExists {
                cell: cell(1, 1),
                timestamp: 20
            })
        );
        assert_eq!(t.len(), 5);
    }

    #[test]
    fn test_versions_newest_first() {
        let t = build();

        assert_eq!(t.versions(&cell(1, 1), 100), vec![
            StoredValue::new_normal(30, "c"),
            StoredValue::new_tombstone(20),
            StoredValue::new_normal(10, "a"),
        ]);

        // strictly below
        assert_eq!(t.versions(&cell(1, 1), 30), vec![
            StoredValue::new_tombstone(20),
            StoredValue::new_normal(10, "a"),
        ]);

        assert!(t.versions(&cell(1, 1), 10).is_empty());
        assert!(t.versions(&cell(1, 1), 0).is_empty());
        assert!(t.versions(&cell(9, 9), 100).is_empty());
    }

    #[test]
    fn test_history_page_filters_and_resumes() {
        let t = build();

        let p1 = t.history_page(
            Bound::Included(VersionedTable::row_start_key(&[1])),
            25,
            2,
        );
        // (1,1)@30 is scanned but filtered out
        assert_eq!(p1.entries, vec![(cell(1, 1), StoredValue::new_tombstone(20))]);
        assert_eq!(p1.resume_after, Some((cell(1, 1), Reverse(20))));

        let p2 = t.history_page(Bound::Excluded(p1.resume_after.unwrap()), 25, 2);
        assert_eq!(p2.entries, vec![
            (cell(1, 1), StoredValue::new_normal(10, "a")),
            (cell(1, 2), StoredValue::new_normal(5, "d")),
        ]);

        let p3 = t.history_page(Bound::Excluded(p2.resume_after.unwrap()), 25, 2);
        assert_eq!(p3.entries, vec![(cell(2, 1), StoredValue::new_normal(15, vec![]))]);
        assert_eq!(p3.resume_after, None);
    }

    #[test]
    fn test_history_page_start_row() {
        let t = build();

        let p = t.history_page(
            Bound::Included(VersionedTable::row_start_key(&[2])),
            100,
            10,
        );
        assert_eq!(p.entries, vec![(cell(2, 1), StoredValue::new_normal(15, vec![]))]);
        assert_eq!(p.resume_after, None);
    }
}
