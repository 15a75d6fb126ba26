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

use std::collections::BTreeSet;

use log::warn;
use serde::Deserialize;
use serde::Serialize;

use crate::errors::InvalidRequest;
use crate::Timestamp;
use crate::INVALID_VALUE_TIMESTAMP;

/// Which versions a sweep pass is allowed to reclaim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepPolicy {
    /// Keep the latest value of a cell if it is empty: a cell whose newest committed value is a
    /// tombstone is not a candidate.
    #[default]
    Conservative,

    /// Reclaim tombstones as well; candidates report whether their latest value is empty.
    Thorough,
}

impl SweepPolicy {
    pub fn should_check_if_latest_value_is_empty(&self) -> bool {
        matches!(self, SweepPolicy::Thorough)
    }

    pub fn from_check_latest_value_is_empty(check: bool) -> Self {
        if check {
            SweepPolicy::Thorough
        } else {
            SweepPolicy::Conservative
        }
    }
}

/// What a sweep pass asks of a [`SweepCandidateScanner`](crate::SweepCandidateScanner).
///
/// Built with [`CandidateCellForSweepingRequest::builder`]; a built request is always valid.
/// Deserialization goes through the same builder and fails with [`InvalidRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRequest")]
pub struct CandidateCellForSweepingRequest {
    start_row_inclusive: Vec<u8>,
    sweep_timestamp: Timestamp,
    min_uncommitted_start_timestamp: Timestamp,
    policy: SweepPolicy,
    timestamps_to_ignore: BTreeSet<Timestamp>,
    batch_size_hint: Option<usize>,
}

impl CandidateCellForSweepingRequest {
    pub fn builder() -> CandidateCellForSweepingRequestBuilder {
        CandidateCellForSweepingRequestBuilder::default()
    }

    pub fn start_row_inclusive(&self) -> &[u8] {
        &self.start_row_inclusive
    }

    /// Only versions written strictly below this timestamp are considered.
    pub fn sweep_timestamp(&self) -> Timestamp {
        self.sweep_timestamp
    }

    /// Unresolved versions at or above this timestamp may still commit and are reported as
    /// candidates; unresolved versions below it are withheld.
    pub fn min_uncommitted_start_timestamp(&self) -> Timestamp {
        self.min_uncommitted_start_timestamp
    }

    pub fn policy(&self) -> SweepPolicy {
        self.policy
    }

    pub fn should_check_if_latest_value_is_empty(&self) -> bool {
        self.policy.should_check_if_latest_value_is_empty()
    }

    pub fn timestamps_to_ignore(&self) -> &BTreeSet<Timestamp> {
        &self.timestamps_to_ignore
    }

    /// Raw entries examined per batch. `None` uses the scanner's configured default.
    pub fn batch_size_hint(&self) -> Option<usize> {
        self.batch_size_hint
    }

    /// The same request, starting at `row`.
    ///
    /// Used to resume a scan after the last row a previous scan returned.
    #[must_use]
    pub fn with_start_row(&self, row: impl Into<Vec<u8>>) -> Self {
        Self {
            start_row_inclusive: row.into(),
            ..self.clone()
        }
    }
}

/// Builder of [`CandidateCellForSweepingRequest`].
///
/// `sweep_timestamp` and `min_uncommitted_start_timestamp` are required. By default the
/// scan starts at the first row, uses [`SweepPolicy::Conservative`] and ignores
/// [`INVALID_VALUE_TIMESTAMP`].
#[derive(Debug, Clone)]
pub struct CandidateCellForSweepingRequestBuilder {
    start_row_inclusive: Vec<u8>,
    sweep_timestamp: Option<Timestamp>,
    min_uncommitted_start_timestamp: Option<Timestamp>,
    policy: SweepPolicy,
    timestamps_to_ignore: BTreeSet<Timestamp>,
    batch_size_hint: Option<usize>,
}

impl Default for CandidateCellForSweepingRequestBuilder {
    fn default() -> Self {
        Self {
            start_row_inclusive: vec![],
            sweep_timestamp: None,
            min_uncommitted_start_timestamp: None,
            policy: SweepPolicy::default(),
            timestamps_to_ignore: BTreeSet::from([INVALID_VALUE_TIMESTAMP]),
            batch_size_hint: None,
        }
    }
}

impl CandidateCellForSweepingRequestBuilder {
    #[must_use]
    pub fn start_row_inclusive(mut self, row: impl Into<Vec<u8>>) -> Self {
        self.start_row_inclusive = row.into();
        self
    }

    #[must_use]
    pub fn sweep_timestamp(mut self, ts: Timestamp) -> Self {
        self.sweep_timestamp = Some(ts);
        self
    }

    #[must_use]
    pub fn min_uncommitted_start_timestamp(mut self, ts: Timestamp) -> Self {
        self.min_uncommitted_start_timestamp = Some(ts);
        self
    }

    #[must_use]
    pub fn policy(mut self, policy: SweepPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn should_check_if_latest_value_is_empty(self, check: bool) -> Self {
        self.policy(SweepPolicy::from_check_latest_value_is_empty(check))
    }

    /// Replace the set of ignored timestamps.
    #[must_use]
    pub fn timestamps_to_ignore(mut self, ts: impl IntoIterator<Item = Timestamp>) -> Self {
        self.timestamps_to_ignore = ts.into_iter().collect();
        self
    }

    #[must_use]
    pub fn batch_size_hint(mut self, hint: usize) -> Self {
        self.batch_size_hint = Some(hint);
        self
    }

    pub fn build(self) -> Result<CandidateCellForSweepingRequest, InvalidRequest> {
        let sweep_timestamp = self
            .sweep_timestamp
            .ok_or(InvalidRequest::MissingSweepTimestamp)?;

        let min_uncommitted_start_timestamp = self
            .min_uncommitted_start_timestamp
            .ok_or(InvalidRequest::MissingMinUncommittedStartTimestamp)?;

        if self.batch_size_hint == Some(0) {
            return Err(InvalidRequest::ZeroBatchSizeHint);
        }

        if min_uncommitted_start_timestamp > sweep_timestamp {
            warn!(
                "min_uncommitted_start_timestamp {} > sweep_timestamp {}: nothing is in-flight",
                min_uncommitted_start_timestamp, sweep_timestamp
            );
        }

        Ok(CandidateCellForSweepingRequest {
            start_row_inclusive: self.start_row_inclusive,
            sweep_timestamp,
            min_uncommitted_start_timestamp,
            policy: self.policy,
            timestamps_to_ignore: self.timestamps_to_ignore,
            batch_size_hint: self.batch_size_hint,
        })
    }
}

/// The serialized form of a request, validated by the builder on deserialization.
#[derive(Deserialize)]
struct RawRequest {
    #[serde(default)]
    start_row_inclusive: Vec<u8>,
    sweep_timestamp: Option<Timestamp>,
    min_uncommitted_start_timestamp: Option<Timestamp>,
    #[serde(default)]
    policy: SweepPolicy,
    timestamps_to_ignore: Option<BTreeSet<Timestamp>>,
    batch_size_hint: Option<usize>,
}

impl TryFrom<RawRequest> for CandidateCellForSweepingRequest {
    type Error = InvalidRequest;

    fn try_from(raw: RawRequest) -> Result<Self, Self::Error> {
        let mut b = CandidateCellForSweepingRequest::builder()
            .start_row_inclusive(raw.start_row_inclusive)
            .policy(raw.policy);

        b.sweep_timestamp = raw.sweep_timestamp;
        b.min_uncommitted_start_timestamp = raw.min_uncommitted_start_timestamp;
        b.batch_size_hint = raw.batch_size_hint;

        if let Some(ignored) = raw.timestamps_to_ignore {
            b = b.timestamps_to_ignore(ignored);
        }

        b.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_defaults() -> anyhow::Result<()> {
        let req = CandidateCellForSweepingRequest::builder()
            .sweep_timestamp(40)
            .min_uncommitted_start_timestamp(30)
            .build()?;

        assert_eq!(req.start_row_inclusive(), b"");
        assert_eq!(req.sweep_timestamp(), 40);
        assert_eq!(req.min_uncommitted_start_timestamp(), 30);
        assert_eq!(req.policy(), SweepPolicy::Conservative);
        assert!(!req.should_check_if_latest_value_is_empty());
        assert_eq!(
            req.timestamps_to_ignore(),
            &BTreeSet::from([INVALID_VALUE_TIMESTAMP])
        );
        assert_eq!(req.batch_size_hint(), None);
        Ok(())
    }

    #[test]
    fn test_build_rejects_invalid() {
        let res = CandidateCellForSweepingRequest::builder()
            .min_uncommitted_start_timestamp(30)
            .build();
        assert_eq!(res, Err(InvalidRequest::MissingSweepTimestamp));

        let res = CandidateCellForSweepingRequest::builder()
            .sweep_timestamp(30)
            .build();
        assert_eq!(res, Err(InvalidRequest::MissingMinUncommittedStartTimestamp));

        let res = CandidateCellForSweepingRequest::builder()
            .sweep_timestamp(30)
            .min_uncommitted_start_timestamp(30)
            .batch_size_hint(0)
            .build();
        assert_eq!(res, Err(InvalidRequest::ZeroBatchSizeHint));
    }

    #[test]
    fn test_min_uncommitted_above_sweep_timestamp_is_legal() -> anyhow::Result<()> {
        let req = CandidateCellForSweepingRequest::builder()
            .sweep_timestamp(10)
            .min_uncommitted_start_timestamp(20)
            .build()?;
        assert_eq!(req.min_uncommitted_start_timestamp(), 20);
        Ok(())
    }

    #[test]
    fn test_policy_and_ignore_list() -> anyhow::Result<()> {
        let req = CandidateCellForSweepingRequest::builder()
            .sweep_timestamp(40)
            .min_uncommitted_start_timestamp(30)
            .should_check_if_latest_value_is_empty(true)
            .timestamps_to_ignore([])
            .batch_size_hint(3)
            .build()?;

        assert_eq!(req.policy(), SweepPolicy::Thorough);
        assert!(req.timestamps_to_ignore().is_empty());
        assert_eq!(req.batch_size_hint(), Some(3));
        Ok(())
    }

    #[test]
    fn test_with_start_row() -> anyhow::Result<()> {
        let req = CandidateCellForSweepingRequest::builder()
            .start_row_inclusive(b"a".to_vec())
            .sweep_timestamp(40)
            .min_uncommitted_start_timestamp(30)
            .build()?;

        let resumed = req.with_start_row(b"m".to_vec());
        assert_eq!(resumed.start_row_inclusive(), b"m");
        assert_eq!(resumed.sweep_timestamp(), 40);
        assert_eq!(req.start_row_inclusive(), b"a");
        Ok(())
    }

    #[test]
    fn test_serde() -> anyhow::Result<()> {
        let req = CandidateCellForSweepingRequest::builder()
            .sweep_timestamp(40)
            .min_uncommitted_start_timestamp(30)
            .policy(SweepPolicy::Thorough)
            .build()?;

        let s = serde_json::to_string(&req)?;
        let got: CandidateCellForSweepingRequest = serde_json::from_str(&s)?;
        assert_eq!(got, req);
        Ok(())
    }

    #[test]
    fn test_deserialize_validates() -> anyhow::Result<()> {
        let res = serde_json::from_str::<CandidateCellForSweepingRequest>(
            r#"{"sweep_timestamp":40,"min_uncommitted_start_timestamp":30,"batch_size_hint":0}"#,
        );
        let err = res.err().map(|e| e.to_string()).unwrap_or_default();
        assert!(err.contains("batch_size_hint must be >= 1"), "err: {}", err);

        let res = serde_json::from_str::<CandidateCellForSweepingRequest>(
            r#"{"min_uncommitted_start_timestamp":30}"#,
        );
        assert!(res.is_err());

        // Omitted fields take the builder defaults.
        let req: CandidateCellForSweepingRequest = serde_json::from_str(
            r#"{"sweep_timestamp":40,"min_uncommitted_start_timestamp":30}"#,
        )?;
        assert_eq!(
            req,
            CandidateCellForSweepingRequest::builder()
                .sweep_timestamp(40)
                .min_uncommitted_start_timestamp(30)
                .build()?
        );
        Ok(())
    }
}
