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

//! Utility functions for merging sorted streams of cell versions.
use std::io;

use crate::CellEntry;
use crate::StoredValue;

/// Result type of a cell version and io Error used in a stream.
type CellResult = Result<CellEntry, io::Error>;

/// Comparator function for sorting cell versions by cell and timestamp.
///
/// This function is used to establish a total ordering of versions where:
/// 1. Entries are first ordered by their cells
/// 2. For the same cell, entries are ordered by their timestamps
///
/// Returns `true` if `r1` should be placed before `r2` in the sorted order.
pub fn by_cell_ts(r1: &CellResult, r2: &CellResult) -> bool {
    match (r1, r2) {
        (Ok((c1, v1)), Ok((c2, v2))) => {
            // A (cell, timestamp) is written at most once.
            assert!(
                (c1, v1.timestamp) != (c2, v2.timestamp),
                "by_cell_ts: same (cell, timestamp): cell:{} timestamp:{}",
                c1,
                v1.timestamp,
            );

            (c1, v1.timestamp) <= (c2, v2.timestamp)
        }
        // If there is an error, just yield them in order.
        // It's the caller's responsibility to handle the error.
        _ => true,
    }
}

/// Attempts to merge two consecutive version results of the same cell.
///
/// If the cells are equal, returns `Ok(combined)` keeping the later version.
/// Otherwise, returns `Err((r1, r2))` to indicate that the results should not be merged.
#[allow(clippy::type_complexity)]
pub fn merge_cell_results(
    r1: CellResult,
    r2: CellResult,
) -> Result<CellResult, (CellResult, CellResult)> {
    match (r1, r2) {
        (Ok((c1, v1)), Ok((c2, v2))) if c1 == c2 => Ok(Ok((c1, StoredValue::max(v1, v2)))),
        // If there is an error,
        // or c1 != c2
        // just yield them without change.
        (r1, r2) => Err((r1, r2)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Cell;

    fn ok(r: u8, ts: u64) -> CellResult {
        Ok((Cell::new(vec![r], vec![0]), StoredValue::new_normal(ts, "v")))
    }

    fn err() -> CellResult {
        Err(io::Error::other("test error"))
    }

    #[test]
    fn test_by_cell_ts_different_cells() {
        assert!(by_cell_ts(&ok(1, 9), &ok(2, 1)));
        assert!(!by_cell_ts(&ok(2, 1), &ok(1, 9)));
    }

    #[test]
    fn test_by_cell_ts_same_cell() {
        assert!(by_cell_ts(&ok(1, 1), &ok(1, 2)));
        assert!(!by_cell_ts(&ok(1, 2), &ok(1, 1)));
    }

    #[test]
    #[should_panic(expected = "by_cell_ts: same (cell, timestamp)")]
    fn test_by_cell_ts_same_cell_ts_panic() {
        by_cell_ts(&ok(1, 1), &ok(1, 1));
    }

    #[test]
    fn test_by_cell_ts_with_errors() {
        assert!(by_cell_ts(&err(), &ok(1, 1)));
        assert!(by_cell_ts(&ok(1, 1), &err()));
        assert!(by_cell_ts(&err(), &err()));
    }

    #[test]
    fn test_merge_cell_results_same_cell() {
        let merged = merge_cell_results(ok(1, 1), ok(1, 5)).unwrap().unwrap();
        assert_eq!(merged.1, StoredValue::new_normal(5, "v"));

        let merged = merge_cell_results(ok(1, 7), ok(1, 5)).unwrap().unwrap();
        assert_eq!(merged.1, StoredValue::new_normal(7, "v"));
    }

    #[test]
    fn test_merge_cell_results_not_merged() {
        let (a, b) = merge_cell_results(ok(1, 1), ok(2, 1)).unwrap_err();
        assert_eq!(a.unwrap().0, Cell::new(vec![1], vec![0]));
        assert_eq!(b.unwrap().0, Cell::new(vec![2], vec![0]));

        assert!(merge_cell_results(ok(1, 1), err()).is_err());
        assert!(merge_cell_results(err(), ok(1, 1)).is_err());
    }
}
