//! Exception triage pipeline.
//!
//! Linear flow with one branch: fetch the latest exception, normalize it
//! and consult the pattern knowledge base, then either short-circuit to a
//! catalogued remediation (known pattern) or run the full analysis chain —
//! pattern analysis, code context fetch, root cause, fix recommendation —
//! before both branches converge on report generation.

use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use tracing::{info, warn};

use trellis_core::traits::{CodeRepository, ExceptionSource, PatternKnowledgeBase, TextGenerator};
use trellis_core::{
    FixRecommendation, ProcessedException, Result, RootCauseAnalysis, TrellisError, TriageReport,
};
use trellis_graph::{Graph, GraphBuilder, Route, Step};

const ANALYZE_SYSTEM_PROMPT: &str = "You are an expert at analyzing software exceptions. \
Identify key components and potential causes.";
const ROOT_CAUSE_SYSTEM_PROMPT: &str =
    "You are an expert at diagnosing software issues from code and exception data.";
const RECOMMEND_SYSTEM_PROMPT: &str =
    "You are an expert at recommending fixes for software issues.";
const REPORT_SYSTEM_PROMPT: &str = "You are an expert at creating concise technical reports.";

/// All state the triage graph touches, declared upfront and optional until
/// the owning step has run.
#[derive(Debug, Default)]
pub struct TriageState {
    pub exception: Option<trellis_core::ExceptionRecord>,
    pub processed: Option<ProcessedException>,
    pub is_known_pattern: bool,
    pub pattern: Option<trellis_core::PatternInfo>,
    pub code_context: Option<trellis_core::CodeContext>,
    pub root_cause: Option<RootCauseAnalysis>,
    pub recommendations: Vec<FixRecommendation>,
    pub report: Option<TriageReport>,
}

/// External collaborators the triage steps call into.
#[derive(Clone)]
pub struct TriageCapabilities {
    pub exceptions: Arc<dyn ExceptionSource>,
    pub knowledge: Arc<dyn PatternKnowledgeBase>,
    pub repository: Arc<dyn CodeRepository>,
    pub generator: Arc<dyn TextGenerator>,
}

fn missing(step: &str, field: &str) -> TrellisError {
    TrellisError::Config(format!("step '{step}' requires '{field}' to be populated"))
}

fn first_line(text: &str) -> String {
    text.lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Derive code-lookup hints from normalized stack frames.
///
/// Frames look like `at PaymentService.ProcessPayment(..)`; the leading
/// type name is the hint.
fn file_hints(stack: &[String]) -> Vec<String> {
    let mut hints: Vec<String> = Vec::new();
    for frame in stack {
        let Some(rest) = frame.trim().strip_prefix("at ") else {
            continue;
        };
        let class = rest.split(['.', '(']).next().unwrap_or("").trim();
        if !class.is_empty() && !hints.iter().any(|h| h == class) {
            hints.push(class.to_string());
        }
    }
    hints
}

fn code_snippets(context: &trellis_core::CodeContext) -> String {
    context
        .files
        .iter()
        .map(|(name, content)| format!("File: {name}\n```\n{content}\n```"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

struct MonitorStep {
    source: Arc<dyn ExceptionSource>,
}

impl Step<TriageState> for MonitorStep {
    fn run<'a>(&'a self, state: &'a mut TriageState) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let record = self.source.fetch_latest().await?;
            info!(
                service = %record.service,
                exception_type = %record.exception_type,
                severity = %record.severity,
                "fetched exception"
            );
            state.exception = Some(record);
            Ok(())
        })
    }
}

struct ProcessStep {
    knowledge: Arc<dyn PatternKnowledgeBase>,
}

impl Step<TriageState> for ProcessStep {
    fn run<'a>(&'a self, state: &'a mut TriageState) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let record = state
                .exception
                .as_ref()
                .ok_or_else(|| missing("process", "exception"))?;

            let processed = ProcessedException {
                normalized_stack: record.stack_trace.lines().map(str::to_string).collect(),
                service: record.service.clone(),
                exception_type: record.exception_type.clone(),
                parsed_message: record.message.clone(),
            };

            let lookup = self.knowledge.lookup(record).await?;
            info!(is_known = lookup.is_known, "pattern lookup complete");

            state.is_known_pattern = lookup.is_known;
            state.pattern = Some(lookup.pattern);
            state.processed = Some(processed);
            Ok(())
        })
    }
}

struct KnownIssueStep;

impl Step<TriageState> for KnownIssueStep {
    fn run<'a>(&'a self, state: &'a mut TriageState) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let pattern = state
                .pattern
                .as_ref()
                .ok_or_else(|| missing("known_issue", "pattern"))?;

            let summary = pattern
                .recommended_action
                .clone()
                .unwrap_or_else(|| "Apply the documented remediation".to_string());

            state.recommendations = vec![FixRecommendation {
                file: None,
                summary,
                explanation: "Based on previous occurrences of this pattern".to_string(),
                confidence: 0.95,
            }];
            Ok(())
        })
    }
}

struct AnalyzePatternStep {
    generator: Arc<dyn TextGenerator>,
}

impl Step<TriageState> for AnalyzePatternStep {
    fn run<'a>(&'a self, state: &'a mut TriageState) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let record = state
                .exception
                .as_ref()
                .ok_or_else(|| missing("analyze_pattern", "exception"))?;
            let processed = state
                .processed
                .as_ref()
                .ok_or_else(|| missing("analyze_pattern", "processed"))?;

            let user_prompt = format!(
                "Analyze this exception:\nType: {}\nMessage: {}\nStack Trace: {}",
                record.exception_type, record.message, record.stack_trace
            );
            let analysis = self
                .generator
                .generate(ANALYZE_SYSTEM_PROMPT, &user_prompt)
                .await?;

            let mut pattern = state.pattern.take().unwrap_or_default();
            pattern.analysis = Some(analysis);
            pattern.relevant_files = file_hints(&processed.normalized_stack);
            pattern.potential_issues = vec![format!(
                "{}: {}",
                record.exception_type, record.message
            )];
            state.pattern = Some(pattern);
            Ok(())
        })
    }
}

struct FetchCodeStep {
    repository: Arc<dyn CodeRepository>,
}

impl Step<TriageState> for FetchCodeStep {
    fn run<'a>(&'a self, state: &'a mut TriageState) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let pattern = state
                .pattern
                .as_ref()
                .ok_or_else(|| missing("fetch_code", "pattern"))?;

            let context = self.repository.fetch_context(&pattern.relevant_files).await?;
            info!(
                repository = %context.repository,
                files = context.files.len(),
                "fetched code context"
            );
            state.code_context = Some(context);
            Ok(())
        })
    }
}

struct RootCauseStep {
    generator: Arc<dyn TextGenerator>,
    knowledge: Arc<dyn PatternKnowledgeBase>,
}

impl Step<TriageState> for RootCauseStep {
    fn run<'a>(&'a self, state: &'a mut TriageState) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let record = state
                .exception
                .as_ref()
                .ok_or_else(|| missing("root_cause", "exception"))?;
            let context = state
                .code_context
                .as_ref()
                .ok_or_else(|| missing("root_cause", "code_context"))?;

            let user_prompt = format!(
                "Exception:\nType: {}\nMessage: {}\nStack Trace: {}\n\n\
                 Code Context:\n{}\n\nIdentify the root cause of this exception.",
                record.exception_type,
                record.message,
                record.stack_trace,
                code_snippets(context)
            );
            let explanation = self
                .generator
                .generate(ROOT_CAUSE_SYSTEM_PROMPT, &user_prompt)
                .await?;

            let analysis = RootCauseAnalysis {
                cause: first_line(&explanation),
                explanation,
                affected_files: context.files.keys().cloned().collect(),
                confidence: 0.85,
            };

            // Fire-and-forget knowledge-base update.
            if let Err(e) = self.knowledge.record(record, &analysis).await {
                warn!(error = %e, "knowledge base update failed");
            }

            state.root_cause = Some(analysis);
            Ok(())
        })
    }
}

struct RecommendStep {
    generator: Arc<dyn TextGenerator>,
}

impl Step<TriageState> for RecommendStep {
    fn run<'a>(&'a self, state: &'a mut TriageState) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let analysis = state
                .root_cause
                .as_ref()
                .ok_or_else(|| missing("recommend", "root_cause"))?;
            let context = state
                .code_context
                .as_ref()
                .ok_or_else(|| missing("recommend", "code_context"))?;

            let user_prompt = format!(
                "Root Cause Analysis:\n{}\n\nCode Context:\n{}\n\n\
                 Recommend specific code changes to fix this issue.",
                analysis.explanation,
                code_snippets(context)
            );
            let explanation = self
                .generator
                .generate(RECOMMEND_SYSTEM_PROMPT, &user_prompt)
                .await?;

            state.recommendations = vec![FixRecommendation {
                file: analysis.affected_files.first().cloned(),
                summary: first_line(&explanation),
                explanation,
                confidence: 0.9,
            }];
            Ok(())
        })
    }
}

struct ReportStep {
    generator: Arc<dyn TextGenerator>,
}

impl Step<TriageState> for ReportStep {
    fn run<'a>(&'a self, state: &'a mut TriageState) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let record = state
                .exception
                .as_ref()
                .ok_or_else(|| missing("report", "exception"))?;

            let mut user_prompt = format!(
                "Exception: {} - {}\n",
                record.exception_type, record.message
            );
            if let Some(analysis) = &state.root_cause {
                user_prompt.push_str(&format!("Root Cause: {}\n", analysis.cause));
            }
            if let Some(recommendation) = state.recommendations.first() {
                user_prompt.push_str(&format!("Fix Recommendation: {}\n", recommendation.summary));
            }
            user_prompt
                .push_str("\nCreate a concise technical report summarizing the issue and fix.");

            let summary = self
                .generator
                .generate(REPORT_SYSTEM_PROMPT, &user_prompt)
                .await?;

            let title = match (state.is_known_pattern, &state.pattern) {
                (true, Some(pattern)) => match &pattern.known_issue {
                    Some(issue) => format!("Known Issue: {issue}"),
                    None => format!(
                        "Exception Analysis: {} in {}",
                        record.exception_type, record.service
                    ),
                },
                _ => format!(
                    "Exception Analysis: {} in {}",
                    record.exception_type, record.service
                ),
            };

            state.report = Some(TriageReport {
                title,
                summary,
                root_cause: state.root_cause.clone(),
                recommendations: state.recommendations.clone(),
                timestamp: Utc::now(),
            });
            Ok(())
        })
    }
}

/// Wire the triage graph:
/// `monitor -> process -> {known_issue | analyze_pattern -> fetch_code ->
/// root_cause -> recommend} -> report`.
pub fn build_triage_graph(caps: TriageCapabilities) -> Result<Graph<TriageState>> {
    GraphBuilder::new()
        .step("monitor", MonitorStep {
            source: caps.exceptions,
        })?
        .step("process", ProcessStep {
            knowledge: caps.knowledge.clone(),
        })?
        .step("known_issue", KnownIssueStep)?
        .step("analyze_pattern", AnalyzePatternStep {
            generator: caps.generator.clone(),
        })?
        .step("fetch_code", FetchCodeStep {
            repository: caps.repository,
        })?
        .step("root_cause", RootCauseStep {
            generator: caps.generator.clone(),
            knowledge: caps.knowledge,
        })?
        .step("recommend", RecommendStep {
            generator: caps.generator.clone(),
        })?
        .step("report", ReportStep {
            generator: caps.generator,
        })?
        .entry("monitor")?
        .edge("monitor", "process")?
        .branch(
            "process",
            |state: &TriageState| {
                if state.is_known_pattern {
                    Route::new("known")
                } else {
                    Route::new("new")
                }
            },
            &[("known", "known_issue"), ("new", "analyze_pattern")],
        )?
        .edge("known_issue", "report")?
        .edge("analyze_pattern", "fetch_code")?
        .edge("fetch_code", "root_cause")?
        .edge("root_cause", "recommend")?
        .edge("recommend", "report")?
        .build()
}

/// Run the triage pipeline end to end and return the final report.
pub async fn run_triage(caps: TriageCapabilities) -> Result<TriageReport> {
    let graph = build_triage_graph(caps)?;
    let state = graph.run(TriageState::default()).await?;
    state
        .report
        .ok_or_else(|| TrellisError::Config("triage run ended without a report".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use trellis_core::{CodeContext, CommitEntry, ExceptionRecord, PatternInfo, PatternLookup};

    fn sample_exception() -> ExceptionRecord {
        ExceptionRecord {
            timestamp: Utc::now(),
            service: "payment-processor".into(),
            exception_type: "NullReferenceException".into(),
            stack_trace: "at PaymentService.ProcessPayment(..)\nat TransactionHandler.Execute(..)"
                .into(),
            message: "Object reference not set to an instance of an object".into(),
            severity: "ERROR".into(),
            instance_id: "pod-payment-78fd9".into(),
        }
    }

    struct StaticSource;

    impl ExceptionSource for StaticSource {
        fn fetch_latest(&self) -> BoxFuture<'_, Result<ExceptionRecord>> {
            Box::pin(async { Ok(sample_exception()) })
        }
    }

    struct StubKnowledge {
        known: bool,
        recorded: AtomicUsize,
    }

    impl StubKnowledge {
        fn new(known: bool) -> Self {
            Self {
                known,
                recorded: AtomicUsize::new(0),
            }
        }
    }

    impl PatternKnowledgeBase for StubKnowledge {
        fn lookup<'a>(
            &'a self,
            _exception: &'a ExceptionRecord,
        ) -> BoxFuture<'a, Result<PatternLookup>> {
            Box::pin(async move {
                if self.known {
                    Ok(PatternLookup {
                        is_known: true,
                        pattern: PatternInfo {
                            pattern_id: Some("PTN-1234".into()),
                            known_issue: Some(
                                "Payment processing fails when account has pending transactions"
                                    .into(),
                            ),
                            previous_occurrences: 42,
                            recommended_action: Some(
                                "Clear pending transactions before processing".into(),
                            ),
                            ..Default::default()
                        },
                    })
                } else {
                    Ok(PatternLookup {
                        is_known: false,
                        pattern: PatternInfo::default(),
                    })
                }
            })
        }

        fn record<'a>(
            &'a self,
            _exception: &'a ExceptionRecord,
            _analysis: &'a RootCauseAnalysis,
        ) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.recorded.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    struct StubRepository {
        requested: Mutex<Vec<String>>,
    }

    impl StubRepository {
        fn new() -> Self {
            Self {
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    impl CodeRepository for StubRepository {
        fn fetch_context<'a>(
            &'a self,
            file_hints: &'a [String],
        ) -> BoxFuture<'a, Result<CodeContext>> {
            Box::pin(async move {
                self.requested.lock().unwrap().extend_from_slice(file_hints);
                let mut files = BTreeMap::new();
                for hint in file_hints {
                    files.insert(format!("{hint}.cs"), format!("class {hint} {{ }}"));
                }
                Ok(CodeContext {
                    files,
                    commit_history: vec![CommitEntry {
                        id: "a1b2c3".into(),
                        message: "Add payment processing feature".into(),
                        author: "dev1".into(),
                        date: "2025-03-10".into(),
                    }],
                    repository: "payment-service".into(),
                })
            })
        }
    }

    /// Generator that logs system prompts and answers with canned text.
    struct LoggingGenerator {
        prompts: Mutex<Vec<String>>,
    }

    impl LoggingGenerator {
        fn new() -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    impl TextGenerator for LoggingGenerator {
        fn generate<'a>(
            &'a self,
            system_prompt: &'a str,
            _user_prompt: &'a str,
        ) -> BoxFuture<'a, Result<String>> {
            Box::pin(async move {
                self.prompts.lock().unwrap().push(system_prompt.to_string());
                Ok("Missing null check before dereferencing the account.".to_string())
            })
        }
    }

    fn caps(known: bool) -> (TriageCapabilities, Arc<StubKnowledge>, Arc<LoggingGenerator>) {
        let knowledge = Arc::new(StubKnowledge::new(known));
        let generator = Arc::new(LoggingGenerator::new());
        let capabilities = TriageCapabilities {
            exceptions: Arc::new(StaticSource),
            knowledge: knowledge.clone(),
            repository: Arc::new(StubRepository::new()),
            generator: generator.clone(),
        };
        (capabilities, knowledge, generator)
    }

    #[test]
    fn test_file_hints_from_stack() {
        let stack = vec![
            "at PaymentService.ProcessPayment(..)".to_string(),
            "at TransactionHandler.Execute(..)".to_string(),
            "at PaymentService.ProcessPayment(..)".to_string(),
        ];
        assert_eq!(file_hints(&stack), vec!["PaymentService", "TransactionHandler"]);
    }

    #[tokio::test]
    async fn test_unknown_pattern_takes_analysis_branch() {
        let (capabilities, knowledge, generator) = caps(false);
        let graph = build_triage_graph(capabilities).unwrap();
        let state = graph.run(TriageState::default()).await.unwrap();

        // The analysis branch populated everything the known branch skips.
        let pattern = state.pattern.as_ref().unwrap();
        assert!(pattern.analysis.is_some());
        assert_eq!(
            pattern.relevant_files,
            vec!["PaymentService", "TransactionHandler"]
        );
        assert!(state.code_context.is_some());
        let root_cause = state.root_cause.as_ref().unwrap();
        assert!(!root_cause.cause.is_empty());
        assert_eq!(root_cause.affected_files.len(), 2);

        assert_eq!(state.recommendations.len(), 1);
        assert!((state.recommendations[0].confidence - 0.9).abs() < f64::EPSILON);

        let report = state.report.unwrap();
        assert_eq!(
            report.title,
            "Exception Analysis: NullReferenceException in payment-processor"
        );
        assert!(report.root_cause.is_some());

        // Analysis was written back to the knowledge base.
        assert_eq!(knowledge.recorded.load(Ordering::SeqCst), 1);

        // All four generation steps ran, in graph order.
        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(
            prompts.as_slice(),
            &[
                ANALYZE_SYSTEM_PROMPT,
                ROOT_CAUSE_SYSTEM_PROMPT,
                RECOMMEND_SYSTEM_PROMPT,
                REPORT_SYSTEM_PROMPT
            ]
        );
    }

    #[tokio::test]
    async fn test_known_pattern_short_circuits() {
        let (capabilities, knowledge, generator) = caps(true);
        let graph = build_triage_graph(capabilities).unwrap();
        let state = graph.run(TriageState::default()).await.unwrap();

        // The analysis chain never ran.
        assert!(state.code_context.is_none());
        assert!(state.root_cause.is_none());
        assert_eq!(knowledge.recorded.load(Ordering::SeqCst), 0);

        assert_eq!(state.recommendations.len(), 1);
        assert_eq!(
            state.recommendations[0].summary,
            "Clear pending transactions before processing"
        );
        assert!((state.recommendations[0].confidence - 0.95).abs() < f64::EPSILON);

        let report = state.report.unwrap();
        assert_eq!(
            report.title,
            "Known Issue: Payment processing fails when account has pending transactions"
        );
        assert!(report.root_cause.is_none());

        // Only the report step called the generator.
        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts.as_slice(), &[REPORT_SYSTEM_PROMPT]);
    }

    #[tokio::test]
    async fn test_run_triage_returns_report() {
        let (capabilities, _, _) = caps(false);
        let report = run_triage(capabilities).await.unwrap();
        assert!(report.title.starts_with("Exception Analysis:"));
        assert!(!report.summary.is_empty());
    }
}
