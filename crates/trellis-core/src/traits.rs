use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{CodeContext, ExceptionRecord, PatternLookup, RootCauseAnalysis, Verdict};

/// Text-generation service.
///
/// Implementations must tolerate concurrent invocation: the batch dispatcher
/// issues one call per pending batch and joins them all.
pub trait TextGenerator: Send + Sync + 'static {
    fn generate<'a>(
        &'a self,
        system_prompt: &'a str,
        user_prompt: &'a str,
    ) -> BoxFuture<'a, Result<String>>;
}

/// Quality check for a generated response.
pub trait ResponseEvaluator: Send + Sync + 'static {
    /// Evaluate a (query, context, response) triple and return the raw
    /// verdict. See `Verdict::is_failure` for the pass/fail contract.
    fn evaluate<'a>(
        &'a self,
        query: &'a str,
        context: &'a str,
        response: &'a str,
    ) -> BoxFuture<'a, Result<Verdict>>;
}

/// Exception feed from the monitoring system.
pub trait ExceptionSource: Send + Sync + 'static {
    fn fetch_latest(&self) -> BoxFuture<'_, Result<ExceptionRecord>>;
}

/// Catalogue of previously seen exception patterns.
pub trait PatternKnowledgeBase: Send + Sync + 'static {
    fn lookup<'a>(&'a self, exception: &'a ExceptionRecord)
        -> BoxFuture<'a, Result<PatternLookup>>;

    /// Record a completed analysis for an exception. Fire-and-forget:
    /// callers log failures and move on.
    fn record<'a>(
        &'a self,
        exception: &'a ExceptionRecord,
        analysis: &'a RootCauseAnalysis,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Read access to the source-code repository.
pub trait CodeRepository: Send + Sync + 'static {
    fn fetch_context<'a>(&'a self, file_hints: &'a [String])
        -> BoxFuture<'a, Result<CodeContext>>;
}
