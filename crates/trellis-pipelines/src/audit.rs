//! Checklist audit pipeline.
//!
//! A checklist is partitioned into batches, every batch is answered
//! concurrently, the answers are graded, and failing batches are retried
//! until they pass or the retry ceiling is reached. The retry loop is not
//! hidden inside a step body: it is wired as a cycle in the graph itself,
//! bounded by a counter in the state.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info};

use trellis_core::config::AuditConfig;
use trellis_core::traits::{ResponseEvaluator, TextGenerator};
use trellis_core::Result;
use trellis_graph::{
    dispatch_pending, evaluate_results, BatchJob, Graph, GraphBuilder, NoopStep, RetryController,
    Route, Step,
};

const AUDIT_SYSTEM_PROMPT: &str = "You are an auditing assistant. Answer each checklist item \
precisely and concisely, using the provided context where relevant.";

/// Shared state for one audit run.
#[derive(Debug, Default)]
pub struct AuditState {
    pub checklist: Vec<String>,
    pub context: String,
    pub batch_size: usize,
    pub separator: String,
    pub job: BatchJob,
    pub retry: RetryController,
    pub result: Option<String>,
}

impl AuditState {
    pub fn new(checklist: Vec<String>, config: &AuditConfig) -> Self {
        Self {
            checklist,
            context: config.context.clone(),
            batch_size: config.batch_size,
            separator: config.separator.clone(),
            job: BatchJob::default(),
            retry: RetryController::new(config.retry_ceiling),
            result: None,
        }
    }
}

/// Partition the checklist into batch payloads.
struct BatchStep;

impl Step<AuditState> for BatchStep {
    fn run<'a>(&'a self, state: &'a mut AuditState) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            state.job = BatchJob::from_items(&state.checklist, state.batch_size)?;
            info!(
                items = state.checklist.len(),
                batches = state.job.len(),
                "checklist partitioned"
            );
            Ok(())
        })
    }
}

/// Dispatch every pending batch to the generator, concurrently.
struct ExecuteStep {
    generator: Arc<dyn TextGenerator>,
}

impl Step<AuditState> for ExecuteStep {
    fn run<'a>(&'a self, state: &'a mut AuditState) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            debug!(pending = state.job.pending.len(), "dispatching batches");
            dispatch_pending(
                &mut state.job,
                self.generator.as_ref(),
                AUDIT_SYSTEM_PROMPT,
                &state.context,
            )
            .await;
            Ok(())
        })
    }
}

/// Grade every recorded result and rebuild the pending set from the
/// failures.
struct EvaluateStep {
    evaluator: Arc<dyn ResponseEvaluator>,
}

impl Step<AuditState> for EvaluateStep {
    fn run<'a>(&'a self, state: &'a mut AuditState) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            evaluate_results(&mut state.job, self.evaluator.as_ref(), &state.context).await;
            debug!(failed = state.job.pending.len(), "evaluation complete");
            Ok(())
        })
    }
}

/// Count one more retry round before re-dispatching.
struct BumpRetryStep;

impl Step<AuditState> for BumpRetryStep {
    fn run<'a>(&'a self, state: &'a mut AuditState) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            state.retry.bump();
            info!(
                retry = state.retry.retries,
                ceiling = state.retry.ceiling,
                failed = state.job.pending.len(),
                "retrying failed batches"
            );
            Ok(())
        })
    }
}

/// Join all result slots into the final report.
struct AggregateStep;

impl Step<AuditState> for AggregateStep {
    fn run<'a>(&'a self, state: &'a mut AuditState) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            state.result = Some(state.job.aggregate(&state.separator));
            Ok(())
        })
    }
}

/// Wire the audit graph:
///
/// ```text
/// batch -> execute -> evaluate -> decide --(retry)--> bump_retry -> execute
///                                        \-(aggregate)-> aggregate
/// ```
pub fn build_audit_graph(
    generator: Arc<dyn TextGenerator>,
    evaluator: Arc<dyn ResponseEvaluator>,
) -> Result<Graph<AuditState>> {
    GraphBuilder::new()
        .step("batch", BatchStep)?
        .step("execute", ExecuteStep { generator })?
        .step("evaluate", EvaluateStep { evaluator })?
        .step("decide", NoopStep)?
        .step("bump_retry", BumpRetryStep)?
        .step("aggregate", AggregateStep)?
        .entry("batch")?
        .edge("batch", "execute")?
        .edge("execute", "evaluate")?
        .edge("evaluate", "decide")?
        .branch(
            "decide",
            |state: &AuditState| {
                if state.job.is_settled() || state.retry.exhausted() {
                    Route::new("aggregate")
                } else {
                    Route::new("retry")
                }
            },
            &[("retry", "bump_retry"), ("aggregate", "aggregate")],
        )?
        .edge("bump_retry", "execute")?
        .build()
}

/// Run the audit pipeline over a checklist and return the aggregated
/// report.
pub async fn run_audit(
    checklist: Vec<String>,
    config: &AuditConfig,
    generator: Arc<dyn TextGenerator>,
    evaluator: Arc<dyn ResponseEvaluator>,
) -> Result<String> {
    config.validate()?;
    let graph = build_audit_graph(generator, evaluator)?;
    let state = graph.run(AuditState::new(checklist, config)).await?;
    Ok(state.result.unwrap_or_default())
}
