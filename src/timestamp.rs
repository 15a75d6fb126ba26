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
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use crate::Timestamp;

/// Issues strictly increasing timestamps, shared by every transaction of a database.
#[async_trait::async_trait]
pub trait TimestampService: Send + Sync {
    async fn fresh_timestamp(&self) -> Result<Timestamp, io::Error>;
}

/// A process-local [`TimestampService`]. The first timestamp issued is `1`.
#[derive(Debug, Default)]
pub struct InMemoryTimestampService {
    last: AtomicU64,
}

impl InMemoryTimestampService {
    /// Create a service whose next timestamp is `last + 1`.
    pub fn starting_after(last: Timestamp) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }
}

#[async_trait::async_trait]
impl TimestampService for InMemoryTimestampService {
    async fn fresh_timestamp(&self) -> Result<Timestamp, io::Error> {
        let prev = self.last.fetch_add(1, Ordering::SeqCst);
        prev.checked_add(1)
            .ok_or_else(|| io::Error::other("timestamp space exhausted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fresh_timestamps_increase() -> anyhow::Result<()> {
        let ts = InMemoryTimestampService::default();
        assert_eq!(ts.fresh_timestamp().await?, 1);
        assert_eq!(ts.fresh_timestamp().await?, 2);

        let ts = InMemoryTimestampService::starting_after(100);
        assert_eq!(ts.fresh_timestamp().await?, 101);
        Ok(())
    }
}
