use std::sync::Arc;

use futures_util::TryStreamExt;
use mvcc_sweep::CandidateCellForSweepingRequest;
use mvcc_sweep::CheckAndSetClient;
use mvcc_sweep::SweepCandidateScanner;
use mvcc_sweep::SweepPolicy;
use mvcc_sweep::TimestampService;
use mvcc_sweep::TransactionManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Create a transaction manager over in-memory storage
    let manager = Arc::new(TransactionManager::in_memory());

    // Update a single value through transactions
    let client = CheckAndSetClient::new(manager.clone());
    client.set(Some(5)).await?;

    let swapped = client.check_and_set(Some(5), Some(6)).await?;
    println!("check_and_set(5, 6): {}", swapped);

    let swapped = client.check_and_set(Some(5), Some(7)).await?;
    println!("check_and_set(5, 7): {}, value: {:?}", swapped, client.get().await?);

    // Remove it: a tombstone is written
    client.set(None).await?;

    // Find the versions a sweep could reclaim
    let scanner =
        SweepCandidateScanner::new(manager.key_value_service(), manager.transaction_service());

    let sweep_ts = manager.timestamp_service().fresh_timestamp().await?;

    for policy in [SweepPolicy::Conservative, SweepPolicy::Thorough] {
        let request = CandidateCellForSweepingRequest::builder()
            .sweep_timestamp(sweep_ts)
            .min_uncommitted_start_timestamp(sweep_ts)
            .policy(policy)
            .build()?;

        let mut batches = scanner.scan(client.table(), request).await?;
        let mut found = 0;
        while let Some(batch) = batches.try_next().await? {
            for candidate in batch {
                println!("{:?}: {}", policy, candidate);
                found += 1;
            }
        }
        println!("{:?}: {} candidate(s)", policy, found);
    }

    Ok(())
}
