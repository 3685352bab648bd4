//! Reference pipelines built on the step graph.
//!
//! Two graphs exercise the orchestration surface end to end: exception
//! triage (conditional branching over a pattern knowledge base) and the
//! checklist audit (concurrent batches with a bounded retry cycle).

pub mod audit;
pub mod triage;

pub use audit::{build_audit_graph, run_audit, AuditState};
pub use triage::{build_triage_graph, run_triage, TriageCapabilities, TriageState};
