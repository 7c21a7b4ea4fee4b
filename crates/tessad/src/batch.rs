//! Batch duplicate enrichment across many source tickets.
//!
//! One worker per ticket, bounded by a concurrency cap so the completion
//! service and tracker are never flooded. Each item gets its own timeout;
//! a cooperative cancellation signal aborts in-flight workers. One item's
//! failure is recorded inline and never aborts the rest.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::info;

use tessa_common::llm::CompletionClient;
use tessa_common::tracker::TrackerClient;
use tessa_common::AgentError;

use crate::similarity::{SimilarityPipeline, SimilarityVerdict};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Cap on concurrent external calls across workers.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Per-item timeout in seconds.
    #[serde(default = "default_item_timeout_secs")]
    pub item_timeout_secs: u64,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_item_timeout_secs() -> u64 {
    60
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            item_timeout_secs: default_item_timeout_secs(),
        }
    }
}

#[derive(Debug)]
pub enum BatchOutcome {
    Done(Vec<SimilarityVerdict>),
    Failed(AgentError),
    TimedOut,
    Cancelled,
}

#[derive(Debug)]
pub struct BatchItemResult {
    pub key: String,
    pub outcome: BatchOutcome,
}

/// Resolves once cancellation is requested; never resolves if the sender
/// goes away without cancelling.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Run a duplicate scan for every key, results in input order.
pub async fn scan_duplicates(
    llm: Arc<dyn CompletionClient>,
    tracker: Arc<dyn TrackerClient>,
    keys: Vec<String>,
    config: &BatchConfig,
    cancel: watch::Receiver<bool>,
) -> Vec<BatchItemResult> {
    if keys.is_empty() {
        return Vec::new();
    }

    info!(
        "batch duplicate scan: {} tickets, {} workers",
        keys.len(),
        config.max_concurrent
    );

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
    let (tx, mut rx) = mpsc::channel(keys.len());
    let item_timeout = Duration::from_secs(config.item_timeout_secs);

    for (index, key) in keys.into_iter().enumerate() {
        let llm = llm.clone();
        let tracker = tracker.clone();
        let semaphore = semaphore.clone();
        let tx = tx.clone();
        let mut cancel = cancel.clone();

        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let outcome = if *cancel.borrow() {
                BatchOutcome::Cancelled
            } else {
                let pipeline = SimilarityPipeline::new(llm, tracker);
                tokio::select! {
                    _ = cancelled(&mut cancel) => BatchOutcome::Cancelled,
                    result = tokio::time::timeout(item_timeout, pipeline.find_duplicates(&key)) => {
                        match result {
                            Ok(Ok(verdicts)) => BatchOutcome::Done(verdicts),
                            Ok(Err(err)) => BatchOutcome::Failed(err),
                            Err(_) => BatchOutcome::TimedOut,
                        }
                    }
                }
            };

            let _ = tx.send((index, key, outcome)).await;
        });
    }
    drop(tx);

    let mut collected = Vec::new();
    while let Some(item) = rx.recv().await {
        collected.push(item);
    }
    collected.sort_by_key(|(index, _, _)| *index);
    collected
        .into_iter()
        .map(|(_, key, outcome)| BatchItemResult { key, outcome })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessa_common::llm::FakeCompletionClient;
    use tessa_common::tracker::{FakeTrackerClient, IssueDetails, IssueSummary};

    fn details(key: &str) -> IssueDetails {
        IssueDetails {
            key: key.to_string(),
            url: format!("http://tracker.example/browse/{key}"),
            project: "PLAT".to_string(),
            program: Some("Strix Halo [PRG-000391]".to_string()),
            summary: "Crash on boot".to_string(),
            description: String::new(),
            status: "Open".to_string(),
            resolution: "Unresolved".to_string(),
            assignee: "Unassigned".to_string(),
            created: "2025-05-01".to_string(),
            updated: "2025-06-01".to_string(),
            comments: Vec::new(),
        }
    }

    fn hit(key: &str) -> IssueSummary {
        IssueSummary {
            key: key.to_string(),
            summary: "System crashes during boot".to_string(),
            status: "Open".to_string(),
            assignee: "Unassigned".to_string(),
            priority: "P2 (Must Solve)".to_string(),
            created: "2025-05-01".to_string(),
            updated: "2025-06-01".to_string(),
            url: format!("http://tracker.example/browse/{key}"),
        }
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_the_batch() {
        let tracker = Arc::new(FakeTrackerClient::new());
        tracker.insert_issue(details("PLAT-1"));
        tracker.queue_search(vec![hit("PLAT-3")]);
        let llm = Arc::new(FakeCompletionClient::always("9"));

        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let results = scan_duplicates(
            llm,
            tracker,
            vec!["PLAT-1".to_string(), "PLAT-404".to_string()],
            &BatchConfig::default(),
            cancel_rx,
        )
        .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].key, "PLAT-1");
        match &results[0].outcome {
            BatchOutcome::Done(verdicts) => assert_eq!(verdicts.len(), 1),
            other => panic!("expected done, got {other:?}"),
        }
        assert!(matches!(results[1].outcome, BatchOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_pre_cancelled_batch_runs_nothing() {
        let tracker = Arc::new(FakeTrackerClient::new());
        let llm = Arc::new(FakeCompletionClient::always("9"));

        let (cancel_tx, cancel_rx) = watch::channel(false);
        cancel_tx.send(true).unwrap();

        let results = scan_duplicates(
            llm,
            tracker.clone(),
            vec!["PLAT-1".to_string(), "PLAT-2".to_string()],
            &BatchConfig::default(),
            cancel_rx,
        )
        .await;

        assert_eq!(results.len(), 2);
        for result in &results {
            assert!(matches!(result.outcome, BatchOutcome::Cancelled));
        }
        assert!(tracker.executed_queries().is_empty());
    }
}
