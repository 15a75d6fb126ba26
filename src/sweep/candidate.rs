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

use serde::Deserialize;
use serde::Serialize;

use crate::Cell;
use crate::Timestamp;

/// A cell and the versions of it that a sweep pass may reclaim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCellForSweeping {
    pub cell: Cell,

    /// Strictly ascending start timestamps, all below the sweep timestamp.
    pub sorted_timestamps: Vec<Timestamp>,

    /// Whether the value at the greatest committed timestamp in `sorted_timestamps` is a
    /// tombstone or zero-length. `false` if none of them is committed.
    pub is_latest_value_empty: bool,

    /// Raw entries read for this cell, including the ones filtered out.
    pub num_cells_ts_pairs_examined: u64,
}

impl CandidateCellForSweeping {
    pub fn latest_timestamp(&self) -> Option<Timestamp> {
        self.sorted_timestamps.last().copied()
    }
}

impl fmt::Display for CandidateCellForSweeping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {:?}, latest_empty: {}, examined: {}",
            self.cell,
            self.sorted_timestamps,
            self.is_latest_value_empty,
            self.num_cells_ts_pairs_examined
        )
    }
}

/// Counters of a single scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub cells_examined: u64,
    pub cell_ts_pairs_examined: u64,
    pub aborted_discarded: u64,
    pub unresolved_withheld: u64,
    pub suppressed_empty: u64,
    pub candidates: u64,
    pub batches: u64,
}

impl fmt::Display for ScanStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cells: {}, pairs: {}, aborted: {}, withheld: {}, suppressed: {}, \
             candidates: {}, batches: {}",
            self.cells_examined,
            self.cell_ts_pairs_examined,
            self.aborted_discarded,
            self.unresolved_withheld,
            self.suppressed_empty,
            self.candidates,
            self.batches
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_display() {
        let c = CandidateCellForSweeping {
            cell: Cell::new(vec![1], vec![2]),
            sorted_timestamps: vec![10, 20],
            is_latest_value_empty: false,
            num_cells_ts_pairs_examined: 3,
        };

        assert_eq!(c.latest_timestamp(), Some(20));
        assert_eq!(
            c.to_string(),
            "(row=0x01, column=0x02): [10, 20], latest_empty: false, examined: 3"
        );
    }
}
