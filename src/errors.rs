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

use crate::Timestamp;

/// A [`CandidateCellForSweepingRequest`](crate::CandidateCellForSweepingRequest) that can not be
/// built.
#[derive(Clone, PartialEq, Eq, thiserror::Error, Debug)]
pub enum InvalidRequest {
    #[error("InvalidRequest: sweep_timestamp is not set")]
    MissingSweepTimestamp,

    #[error("InvalidRequest: min_uncommitted_start_timestamp is not set")]
    MissingMinUncommittedStartTimestamp,

    #[error("InvalidRequest: batch_size_hint must be >= 1")]
    ZeroBatchSizeHint,
}

/// Errors that abort a sweep candidate scan.
///
/// Batches already yielded before the error stay valid.
#[derive(thiserror::Error, Debug)]
pub enum SweepError {
    #[error(transparent)]
    InvalidRequest(#[from] InvalidRequest),

    /// Reading raw entries from the key-value store failed.
    #[error("StorageReadFailure: {0}")]
    StorageReadFailure(#[source] io::Error),

    /// Looking up the commit status of a start timestamp failed.
    #[error("OracleUnavailable: {0}")]
    OracleUnavailable(#[source] io::Error),
}

/// Errors returned by a transaction or by a transaction task.
#[derive(thiserror::Error, Debug)]
pub enum TransactionError {
    /// Another transaction committed a write to the same cell after this one started.
    ///
    /// The only retryable error.
    #[error("TransactionConflict: start_ts={start_ts}: {reason}")]
    Conflict { start_ts: Timestamp, reason: String },

    #[error("RetriesExhausted: gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<TransactionError>,
    },

    #[error("ReadOnlyWrite: a read-only transaction attempted to write {table}")]
    ReadOnlyWrite { table: String },

    #[error("TransactionStorage: {0}")]
    Storage(#[from] io::Error),
}

impl TransactionError {
    pub fn conflict(start_ts: Timestamp, reason: impl ToString) -> Self {
        Self::Conflict {
            start_ts,
            reason: reason.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(TransactionError::conflict(3, "x").is_retryable());
        assert!(!TransactionError::Storage(io::Error::other("disk")).is_retryable());
        assert!(!TransactionError::RetriesExhausted {
            attempts: 2,
            source: Box::new(TransactionError::conflict(3, "x")),
        }
        .is_retryable());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            "TransactionConflict: start_ts=7: cell written",
            TransactionError::conflict(7, "cell written").to_string()
        );
        assert_eq!(
            "InvalidRequest: batch_size_hint must be >= 1",
            SweepError::from(InvalidRequest::ZeroBatchSizeHint).to_string()
        );
        assert_eq!(
            "StorageReadFailure: gone",
            SweepError::StorageReadFailure(io::Error::other("gone")).to_string()
        );
    }
}
