//! Batch, then per-unit, then passthrough
//!
//! Units are sent in batches. Ids missing from a batch answer are sent again
//! on their own, and units still unanswered after that fall back to a
//! passthrough value. The result always has one entry per input unit.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::TranslationConfig;
use crate::error::Result;
use crate::outcome::Outcome;
use crate::progress::ProgressTracker;

/// Work that can be done for several units in one request
#[async_trait]
pub trait BatchWorker: Send + Sync {
    type Unit: Send + Sync;
    type Output: Send;

    /// Process `units` (global index, unit) and return whatever ids were answered
    async fn run_batch(&self, units: &[(usize, &Self::Unit)]) -> Result<HashMap<usize, Self::Output>>;

    /// Value used when every attempt failed
    fn passthrough(&self, unit: &Self::Unit) -> Self::Output;
}

/// Which stage produced a unit's output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOrigin {
    Batch,
    Retried,
    Passthrough,
}

/// Result of a chain run
#[derive(Debug)]
pub struct ChainResult<O> {
    /// One entry per input unit, in input order
    pub outcomes: Vec<Outcome<O>>,
    /// Stage that answered each unit
    pub origins: Vec<UnitOrigin>,
}

impl<O> ChainResult<O> {
    /// Indices answered with the passthrough value
    pub fn passthrough_indices(&self) -> Vec<usize> {
        self.indices_from(UnitOrigin::Passthrough)
    }

    /// Indices answered by a per-unit retry
    pub fn retried_indices(&self) -> Vec<usize> {
        self.indices_from(UnitOrigin::Retried)
    }

    fn indices_from(&self, origin: UnitOrigin) -> Vec<usize> {
        self.origins
            .iter()
            .enumerate()
            .filter(|(_, o)| **o == origin)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Batch size, attempts and pacing of the chain
#[derive(Debug, Clone)]
pub struct FallbackChain {
    pub batch_size: usize,
    pub max_attempts: usize,
    pub delay: Duration,
}

impl FallbackChain {
    pub fn new(batch_size: usize, max_attempts: usize, delay: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_config(config: &TranslationConfig) -> Self {
        Self::new(
            config.batch_size,
            config.max_attempts,
            Duration::from_millis(config.batch_delay_ms),
        )
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    /// Run every unit through the chain
    pub async fn run<W: BatchWorker>(
        &self,
        worker: &W,
        units: &[W::Unit],
        tracker: Option<&ProgressTracker>,
    ) -> ChainResult<W::Output> {
        let total = units.len();
        let mut results: Vec<Option<(W::Output, UnitOrigin)>> = (0..total).map(|_| None).collect();

        let batch_count = (total + self.batch_size - 1) / self.batch_size;
        for batch_no in 0..batch_count {
            if batch_no > 0 {
                self.pause().await;
            }
            let start = batch_no * self.batch_size;
            let end = (start + self.batch_size).min(total);

            for attempt in 1..=self.max_attempts {
                let pending: Vec<(usize, &W::Unit)> = (start..end)
                    .filter(|i| results[*i].is_none())
                    .map(|i| (i, &units[i]))
                    .collect();
                if pending.is_empty() {
                    break;
                }

                match worker.run_batch(&pending).await {
                    Ok(answered) => {
                        let before = pending.len();
                        for (i, output) in answered {
                            if (start..end).contains(&i) && results[i].is_none() {
                                results[i] = Some((output, UnitOrigin::Batch));
                            }
                        }
                        let missing = (start..end).filter(|i| results[*i].is_none()).count();
                        if missing > 0 {
                            log::warn!(
                                "Batch {}/{} attempt {}: {} of {} units unanswered",
                                batch_no + 1,
                                batch_count,
                                attempt,
                                missing,
                                before
                            );
                        }
                    }
                    Err(e) => log::warn!(
                        "Batch {}/{} attempt {} failed: {}",
                        batch_no + 1,
                        batch_count,
                        attempt,
                        e
                    ),
                }
            }

            if let Some(tracker) = tracker {
                tracker.update_step_progress(
                    end as f32 / total as f32 * 100.0,
                    Some(format!("Translated {}/{} segments", end, total)),
                );
            }
        }

        for i in 0..total {
            if results[i].is_some() {
                continue;
            }
            for attempt in 1..=self.max_attempts {
                self.pause().await;
                match worker.run_batch(&[(i, &units[i])]).await {
                    Ok(mut answered) => {
                        if let Some(output) = answered.remove(&i) {
                            results[i] = Some((output, UnitOrigin::Retried));
                            break;
                        }
                        log::warn!("Unit {} attempt {}: no answer", i, attempt);
                    }
                    Err(e) => log::warn!("Unit {} attempt {} failed: {}", i, attempt, e),
                }
            }
        }

        let mut outcomes = Vec::with_capacity(total);
        let mut origins = Vec::with_capacity(total);
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Some((output, origin)) => {
                    outcomes.push(Outcome::Success(output));
                    origins.push(origin);
                }
                None => {
                    log::warn!("Unit {}: every attempt failed, passing through", i);
                    outcomes.push(Outcome::fallback(
                        worker.passthrough(&units[i]),
                        format!("no answer after {} batch and unit attempts", self.max_attempts),
                    ));
                    origins.push(UnitOrigin::Passthrough);
                }
            }
        }
        ChainResult { outcomes, origins }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DubSyncError;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Answers batches except for `dropped`, fails single-unit requests in `broken`
    struct ScriptedWorker {
        dropped: HashSet<usize>,
        broken: HashSet<usize>,
        calls: Mutex<Vec<Vec<usize>>>,
    }

    impl ScriptedWorker {
        fn new(dropped: &[usize], broken: &[usize]) -> Self {
            Self {
                dropped: dropped.iter().copied().collect(),
                broken: broken.iter().copied().collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl BatchWorker for ScriptedWorker {
        type Unit = String;
        type Output = String;

        async fn run_batch(&self, units: &[(usize, &String)]) -> Result<HashMap<usize, String>> {
            self.calls
                .lock()
                .unwrap()
                .push(units.iter().map(|(i, _)| *i).collect());

            if units.len() == 1 && self.broken.contains(&units[0].0) {
                return Err(DubSyncError::Other("service unavailable".into()));
            }
            Ok(units
                .iter()
                .filter(|(i, _)| units.len() == 1 || !self.dropped.contains(i))
                .map(|(i, text)| (*i, text.to_uppercase()))
                .collect())
        }

        fn passthrough(&self, unit: &String) -> String {
            unit.clone()
        }
    }

    fn units(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("line {}", i)).collect()
    }

    #[tokio::test]
    async fn test_partial_batch_falls_back_per_unit() {
        // 10 units, the batch answers 8, both retries fail
        let worker = ScriptedWorker::new(&[3, 7], &[3, 7]);
        let chain = FallbackChain::new(50, 1, Duration::ZERO);
        let result = chain.run(&worker, &units(10), None).await;

        assert_eq!(result.outcomes.len(), 10);
        assert_eq!(result.passthrough_indices(), vec![3, 7]);
        assert_eq!(result.outcomes[3].value(), "line 3");
        assert!(result.outcomes[3].is_fallback());
        assert_eq!(result.outcomes[0].value(), "LINE 0");
        assert!(!result.outcomes[0].is_fallback());
    }

    #[tokio::test]
    async fn test_per_unit_retry_recovers() {
        let worker = ScriptedWorker::new(&[2], &[]);
        let chain = FallbackChain::new(4, 1, Duration::ZERO);
        let result = chain.run(&worker, &units(6), None).await;

        assert_eq!(result.retried_indices(), vec![2]);
        assert!(result.passthrough_indices().is_empty());
        assert_eq!(result.outcomes[2].value(), "LINE 2");

        let calls = worker.calls.lock().unwrap();
        assert_eq!(calls[0], vec![0, 1, 2, 3]);
        assert_eq!(calls[1], vec![4, 5]);
        assert_eq!(calls[2], vec![2]);
    }

    #[tokio::test]
    async fn test_batch_retry_sends_only_missing_ids() {
        let worker = ScriptedWorker::new(&[1], &[1]);
        let chain = FallbackChain::new(10, 2, Duration::ZERO);
        let result = chain.run(&worker, &units(3), None).await;

        assert_eq!(result.outcomes.len(), 3);
        let calls = worker.calls.lock().unwrap();
        assert_eq!(calls[0], vec![0, 1, 2]);
        assert_eq!(calls[1], vec![1]);
        // two single-unit attempts, both failing
        assert_eq!(calls.len(), 4);
        assert_eq!(result.passthrough_indices(), vec![1]);
    }

    #[test]
    fn test_empty_input() {
        let worker = ScriptedWorker::new(&[], &[]);
        let chain = FallbackChain::new(10, 2, Duration::ZERO);
        let result = tokio_test::block_on(chain.run(&worker, &[], None));
        assert!(result.outcomes.is_empty());
        assert!(worker.calls.lock().unwrap().is_empty());
    }
}
