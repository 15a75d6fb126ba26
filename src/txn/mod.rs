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

//! Snapshot-isolated transactions over a [`KeyValueService`](crate::KeyValueService).

pub mod commit_status;
pub mod manager;
pub mod transaction;


pub use self::commit_status::CommitStatus;
pub use self::commit_status::CommitStatusOracle;
pub use self::commit_status::InMemoryTransactionService;
pub use self::commit_status::TransactionService;
pub use self::commit_status::TransactionState;
pub use self::manager::TransactionManager;
pub use self::manager::TransactionTask;
pub use self::transaction::Transaction;
