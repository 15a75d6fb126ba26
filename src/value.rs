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

//! Defines [`StoredValue`], one version of a cell as the store keeps it.

use serde::Deserialize;
use serde::Serialize;

use crate::Timestamp;

/// A versioned value that can represent both normal values and tombstones (deleted values).
///
/// `timestamp` is the start timestamp of the transaction that wrote this version.
/// A tombstone has no contents.
///
/// # Examples
///
/// ```
/// use mvcc_sweep::StoredValue;
///
/// let normal = StoredValue::new_normal(1, vec![1, 2, 3]);
/// let tombstone = StoredValue::new_tombstone(2);
///
/// assert!(!normal.is_tombstone());
/// assert!(tombstone.is_tombstone());
/// assert!(tombstone.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredValue {
    pub timestamp: Timestamp,
    pub contents: Option<Vec<u8>>,
}

impl StoredValue {
    pub fn new(timestamp: Timestamp, contents: Option<Vec<u8>>) -> Self {
        Self {
            timestamp,
            contents,
        }
    }

    pub fn new_normal(timestamp: Timestamp, contents: impl Into<Vec<u8>>) -> Self {
        Self::new(timestamp, Some(contents.into()))
    }

    pub fn new_tombstone(timestamp: Timestamp) -> Self {
        Self::new(timestamp, None)
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn contents(&self) -> Option<&[u8]> {
        self.contents.as_deref()
    }

    pub fn into_contents(self) -> Option<Vec<u8>> {
        self.contents
    }

    pub fn is_tombstone(&self) -> bool {
        self.contents.is_none()
    }

    /// A tombstone or a zero-length value: both read as "no value".
    pub fn is_empty(&self) -> bool {
        match &self.contents {
            None => true,
            Some(v) => v.is_empty(),
        }
    }

    /// Return the one written later.
    pub fn max(a: Self, b: Self) -> Self {
        if a.timestamp > b.timestamp {
            a
        } else {
            b
        }
    }
}
