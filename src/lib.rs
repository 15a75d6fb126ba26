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

//! # MVCC Sweep
//!
//! The garbage-collection side of a snapshot-isolated MVCC layer built on a pluggable
//! versioned key-value store.
//!
//! Every write is stored as a new version of a [`Cell`], keyed by the start timestamp of the
//! transaction that wrote it. Old versions pile up and must eventually be reclaimed without
//! breaking the isolation of transactions that are still running. This crate finds which
//! versions are eligible.
//!
//! ## Core Components
//!
//! - [`SweepCandidateScanner`]: streams a table's raw version history and emits, cell by cell,
//!   the timestamps that a sweep pass may reclaim.
//! - [`CandidateCellForSweepingRequest`]: what a sweep pass asks for: start row, sweep
//!   timestamp, retention policy and batching hint.
//! - [`CheckAndSetClient`]: get/set/check-and-set of a single value through retryable
//!   transactions, the smallest consumer of the commit protocol the scanner respects.
//!
//! The storage engine, the timestamp service and the commit-status store are collaborators
//! behind the [`KeyValueService`], [`TimestampService`] and [`TransactionService`] traits.
//! In-memory implementations are provided for tests and demos.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use futures_util::TryStreamExt;
//! use mvcc_sweep::CandidateCellForSweepingRequest;
//! use mvcc_sweep::InMemoryKeyValueService;
//! use mvcc_sweep::InMemoryTransactionService;
//! use mvcc_sweep::SweepCandidateScanner;
//! use mvcc_sweep::TableName;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let kvs = Arc::new(InMemoryKeyValueService::default());
//!     let transactions = Arc::new(InMemoryTransactionService::default());
//!
//!     let scanner = SweepCandidateScanner::new(kvs, transactions);
//!
//!     let request = CandidateCellForSweepingRequest::builder()
//!         .sweep_timestamp(100)
//!         .min_uncommitted_start_timestamp(90)
//!         .build()?;
//!
//!     let mut batches = scanner.scan(&TableName::new("ns.table"), request).await?;
//!     while let Some(batch) = batches.try_next().await? {
//!         for candidate in batch {
//!             println!("{}: {:?}", candidate.cell, candidate.sorted_timestamps);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cas;
pub mod cell;
pub mod config;
pub mod errors;
pub mod kvs;
pub mod sweep;
pub mod timestamp;
pub mod txn;
pub mod util;
pub mod value;

use std::io;

use futures_util::stream::BoxStream;

pub use crate::cas::CheckAndSetClient;
pub use crate::cell::Cell;
pub use crate::cell::TableName;
pub use crate::config::Config;
pub use crate::errors::InvalidRequest;
pub use crate::errors::SweepError;
pub use crate::errors::TransactionError;
pub use crate::kvs::InMemoryKeyValueService;
pub use crate::kvs::KeyValueService;
pub use crate::sweep::CandidateCellForSweeping;
pub use crate::sweep::CandidateCellForSweepingRequest;
pub use crate::sweep::SweepCandidateScanner;
pub use crate::sweep::SweepPolicy;
pub use crate::timestamp::InMemoryTimestampService;
pub use crate::timestamp::TimestampService;
pub use crate::txn::CommitStatus;
pub use crate::txn::CommitStatusOracle;
pub use crate::txn::InMemoryTransactionService;
pub use crate::txn::Transaction;
pub use crate::txn::TransactionManager;
pub use crate::txn::TransactionService;
pub use crate::txn::TransactionState;
pub use crate::txn::TransactionTask;
pub use crate::value::StoredValue;

/// A start timestamp, the version key of every stored entry.
///
/// Issued by a [`TimestampService`]; real timestamps start at 1.
pub type Timestamp = u64;

/// The timestamp at which sweep writes placeholder entries.
///
/// No transaction is ever started at this timestamp, so a sweep pass usually ignores it.
pub const INVALID_VALUE_TIMESTAMP: Timestamp = 0;

/// A boxed stream that yields `Result` of items or an `io::Error`.
/// The stream is 'static to ensure it can outlive the borrow of the service that created it.
pub type IOResultStream<T> = BoxStream<'static, Result<T, io::Error>>;

/// A raw version of a cell as it is stored: the cell and its timestamped value.
pub type CellEntry = (Cell, StoredValue);

/// A stream of raw versions returned by [`KeyValueService::scan_history`].
pub type CellEntryStream = IOResultStream<CellEntry>;
