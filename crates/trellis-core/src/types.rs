use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single exception occurrence pulled from the monitoring system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionRecord {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub exception_type: String,
    pub stack_trace: String,
    pub message: String,
    pub severity: String,
    pub instance_id: String,
}

/// Normalized form of an exception, derived from the raw record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedException {
    /// Stack trace split into individual frames.
    pub normalized_stack: Vec<String>,
    pub service: String,
    pub exception_type: String,
    pub parsed_message: String,
}

/// Result of a knowledge-base lookup for an exception.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternLookup {
    pub is_known: bool,
    pub pattern: PatternInfo,
}

/// What we know about an exception pattern — either a catalogued issue
/// (pattern_id, recommended_action, ...) or a fresh analysis in progress.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternInfo {
    #[serde(default)]
    pub pattern_id: Option<String>,
    #[serde(default)]
    pub known_issue: Option<String>,
    #[serde(default)]
    pub previous_occurrences: u64,
    #[serde(default)]
    pub recommended_action: Option<String>,
    /// Free-form analysis text for new patterns.
    #[serde(default)]
    pub analysis: Option<String>,
    #[serde(default)]
    pub relevant_files: Vec<String>,
    #[serde(default)]
    pub potential_issues: Vec<String>,
}

/// One entry of a repository's commit history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitEntry {
    pub id: String,
    pub message: String,
    pub author: String,
    pub date: String,
}

/// Source context fetched from the code repository.
///
/// Files are kept in a BTreeMap so prompt construction iterates them in a
/// stable order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeContext {
    pub files: BTreeMap<String, String>,
    pub commit_history: Vec<CommitEntry>,
    pub repository: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootCauseAnalysis {
    /// One-line cause statement.
    pub cause: String,
    /// Full explanation text.
    pub explanation: String,
    pub affected_files: Vec<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixRecommendation {
    #[serde(default)]
    pub file: Option<String>,
    pub summary: String,
    pub explanation: String,
    pub confidence: f64,
}

/// Final output of the triage pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageReport {
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub root_cause: Option<RootCauseAnalysis>,
    pub recommendations: Vec<FixRecommendation>,
    pub timestamp: DateTime<Utc>,
}

/// Raw verdict text returned by a response evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict(String);

impl Verdict {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Contract: any verdict containing "FAIL" case-insensitively is a
    /// failure; everything else is a pass.
    pub fn is_failure(&self) -> bool {
        self.0.to_uppercase().contains("FAIL")
    }

    pub fn text(&self) -> &str {
        &self.0
    }
}
