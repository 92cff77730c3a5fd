//! Three strictly layered components forming the execution chain:
//! `AnalysisExecutionService` (API-facing) → `JobExecutionService`
//! (lifecycle) → `ToolRunner` (the single call site for a plugin's tool
//! handler).

pub mod analysis_execution;
pub mod job_execution;
pub mod tool_runner;
