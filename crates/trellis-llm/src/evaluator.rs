use std::sync::Arc;

use futures::future::BoxFuture;

use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::{ResponseEvaluator, TextGenerator};
use trellis_core::types::Verdict;

const EVALUATOR_SYSTEM_PROMPT: &str = "You are a strict quality auditor for generated text. \
Reply with a one-word verdict, PASS or FAIL, optionally followed by a short reason.";

/// LLM-backed response grader.
///
/// Prompts the generator to grade a (query, context, response) triple. The
/// verdict text is returned as-is; the FAIL-substring contract lives in
/// [`Verdict::is_failure`].
pub struct LlmEvaluator {
    generator: Arc<dyn TextGenerator>,
}

impl LlmEvaluator {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

impl ResponseEvaluator for LlmEvaluator {
    fn evaluate<'a>(
        &'a self,
        query: &'a str,
        context: &'a str,
        response: &'a str,
    ) -> BoxFuture<'a, Result<Verdict>> {
        Box::pin(async move {
            let user_prompt = format!(
                "Query:\n{query}\n\nContext:\n{context}\n\nResponse:\n{response}\n\n\
                 Does the response answer the query faithfully given the context?"
            );
            let text = self
                .generator
                .generate(EVALUATOR_SYSTEM_PROMPT, &user_prompt)
                .await
                .map_err(|e| TrellisError::Evaluation(e.to_string()))?;
            Ok(Verdict::new(text))
        })
    }
}
