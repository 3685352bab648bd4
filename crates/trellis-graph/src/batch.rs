//! Bounded concurrent retry over a partitioned unit of work.
//!
//! A checklist is partitioned into batches, each batch is serialized into
//! one generation payload, and every pending batch is dispatched
//! concurrently (fan-out / join-all). An evaluator then marks failing
//! batches for re-dispatch; a retry controller bounds the number of rounds.
//! These primitives are plain data and functions — the loop itself is wired
//! as ordinary graph steps with one conditional edge.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use trellis_core::traits::{ResponseEvaluator, TextGenerator};
use trellis_core::{Result, TrellisError};

/// Split `items` into contiguous chunks of at most `batch_size` items; the
/// last chunk may be shorter. `batch_size` of zero is a config error.
pub fn partition<T: Clone>(items: &[T], batch_size: usize) -> Result<Vec<Vec<T>>> {
    if batch_size == 0 {
        return Err(TrellisError::Config("batch_size must be at least 1".into()));
    }
    Ok(items.chunks(batch_size).map(|chunk| chunk.to_vec()).collect())
}

/// A partitioned unit of work.
///
/// Invariants: `results.len() == batches.len()`; `pending` only holds
/// in-range indices; a filled result slot is only ever overwritten by a
/// retry of that same index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchJob {
    /// Ordered sequence of prepared payloads, one per batch.
    pub batches: Vec<String>,
    /// Result slot per batch; `None` means no response recorded yet.
    pub results: Vec<Option<String>>,
    /// Indices awaiting (re)dispatch.
    pub pending: Vec<usize>,
}

impl BatchJob {
    /// Build a job from already-serialized payloads. Every batch starts
    /// pending.
    pub fn new(batches: Vec<String>) -> Self {
        let results = vec![None; batches.len()];
        let pending = (0..batches.len()).collect();
        Self {
            batches,
            results,
            pending,
        }
    }

    /// Partition checklist items and serialize each chunk into one payload
    /// (items joined by newlines).
    pub fn from_items(items: &[String], batch_size: usize) -> Result<Self> {
        let payloads = partition(items, batch_size)?
            .into_iter()
            .map(|chunk| chunk.join("\n"))
            .collect();
        Ok(Self::new(payloads))
    }

    pub fn is_settled(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Join all result slots in index order. A slot that never received a
    /// result contributes an explicit empty entry, so the output arity is
    /// stable regardless of partial failure.
    pub fn aggregate(&self, separator: &str) -> String {
        self.results
            .iter()
            .map(|slot| slot.as_deref().unwrap_or(""))
            .collect::<Vec<_>>()
            .join(separator)
    }
}

/// Bounded retry counter for the batch loop.
///
/// Convention: check-then-increment, ceiling inclusive. `exhausted` is
/// consulted before the counter is bumped, so a run performs at most
/// `ceiling + 1` dispatch rounds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryController {
    pub retries: u32,
    pub ceiling: u32,
}

impl RetryController {
    pub fn new(ceiling: u32) -> Self {
        Self {
            retries: 0,
            ceiling,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.retries >= self.ceiling
    }

    pub fn bump(&mut self) {
        self.retries += 1;
    }
}

/// Issue one concurrent generation call per pending batch and wait for all
/// of them (join-all; siblings are never cancelled). Results are written
/// back only after the join, keyed by the originating batch index, so
/// completion order never affects slot assignment.
///
/// An individual call failure is recovered locally: the slot keeps its
/// last-known (possibly absent) value, fails the next evaluation, and
/// re-enters the pending set.
pub async fn dispatch_pending<G>(
    job: &mut BatchJob,
    generator: &G,
    system_prompt: &str,
    context: &str,
) where
    G: TextGenerator + ?Sized,
{
    if job.pending.is_empty() {
        return;
    }

    let prompts: Vec<(usize, String)> = job
        .pending
        .iter()
        .map(|&index| {
            (
                index,
                format!("Context: {}\nPrompt: {}", context, job.batches[index]),
            )
        })
        .collect();

    let calls = prompts.iter().map(|(index, user_prompt)| async move {
        (*index, generator.generate(system_prompt, user_prompt).await)
    });
    let outcomes = join_all(calls).await;

    for (index, outcome) in outcomes {
        match outcome {
            Ok(text) => job.results[index] = Some(text),
            Err(e) => {
                warn!(index, error = %e, "batch call failed, slot left for retry");
            }
        }
    }
}

/// Run the quality check over every batch and replace the pending set with
/// the indices that failed. A missing result or an evaluator error counts
/// as a failure for that index; neither aborts the run.
pub async fn evaluate_results<E>(job: &mut BatchJob, evaluator: &E, context: &str)
where
    E: ResponseEvaluator + ?Sized,
{
    let mut failed = Vec::new();

    for (index, slot) in job.results.iter().enumerate() {
        match slot {
            None => failed.push(index),
            Some(response) => {
                match evaluator.evaluate(&job.batches[index], context, response).await {
                    Ok(verdict) if verdict.is_failure() => {
                        debug!(index, verdict = verdict.text(), "batch failed evaluation");
                        failed.push(index);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(index, error = %e, "evaluator errored, treating as failure");
                        failed.push(index);
                    }
                }
            }
        }
    }

    job.pending = failed;
}
