//! Step, group and suite results

use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use platform_e2e_common::{ConfigKey, Unconfigured};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{E2eError, E2eResult, ErrorKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed { kind: ErrorKind, message: String },
    /// Declared but left out of this run
    Excluded { reason: String },
    /// An earlier step failed, the group was skipped, or the run was cancelled
    NotRun,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    #[serde(flatten)]
    pub status: StepStatus,
    pub duration_ms: u64,
}

impl StepReport {
    pub fn passed(name: &str, duration_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            status: StepStatus::Passed,
            duration_ms,
        }
    }

    pub fn failed(name: &str, error: &E2eError, duration_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            status: StepStatus::Failed {
                kind: error.kind(),
                message: error.to_string(),
            },
            duration_ms,
        }
    }

    pub fn excluded(name: &str, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            status: StepStatus::Excluded {
                reason: reason.to_string(),
            },
            duration_ms: 0,
        }
    }

    pub fn not_run(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: StepStatus::NotRun,
            duration_ms: 0,
        }
    }

    /// Whether the step body actually ran
    pub fn executed(&self) -> bool {
        matches!(self.status, StepStatus::Passed | StepStatus::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GroupOutcome {
    Passed,
    Failed {
        step: String,
        kind: ErrorKind,
        message: String,
    },
    Skipped {
        reason: String,
        missing: Vec<ConfigKey>,
    },
    /// The run was cancelled before this group started
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupReport {
    pub name: String,
    pub instance: usize,
    pub tags: Vec<String>,
    pub docs: Vec<String>,
    #[serde(flatten)]
    pub outcome: GroupOutcome,
    pub steps: Vec<StepReport>,
    /// Cleanup failure, logged but never part of the outcome
    pub cleanup_error: Option<String>,
    pub duration_ms: u64,
}

impl GroupReport {
    pub fn is_passed(&self) -> bool {
        matches!(self.outcome, GroupOutcome::Passed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, GroupOutcome::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, GroupOutcome::Skipped { .. })
    }

    pub fn executed_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.executed()).count()
    }

    pub fn count(&self, pred: impl Fn(&StepStatus) -> bool) -> usize {
        self.steps.iter().filter(|s| pred(&s.status)).count()
    }

    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub(crate) fn skipped(
        name: &str,
        instance: usize,
        tags: &[String],
        docs: &[String],
        steps: &[&str],
        unconfigured: &Unconfigured,
    ) -> Self {
        Self {
            name: name.to_string(),
            instance,
            tags: tags.to_vec(),
            docs: docs.to_vec(),
            outcome: GroupOutcome::Skipped {
                reason: unconfigured.to_string(),
                missing: unconfigured.missing.clone(),
            },
            steps: steps.iter().map(|s| StepReport::not_run(s)).collect(),
            cleanup_error: None,
            duration_ms: 0,
        }
    }

    pub(crate) fn not_started(name: &str, instance: usize, tags: &[String], docs: &[String], steps: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            instance,
            tags: tags.to_vec(),
            docs: docs.to_vec(),
            outcome: GroupOutcome::Cancelled,
            steps: steps.iter().map(|s| StepReport::not_run(s)).collect(),
            cleanup_error: None,
            duration_ms: 0,
        }
    }

    /// The group's task died outside any step
    pub(crate) fn crashed(
        name: &str,
        instance: usize,
        tags: &[String],
        docs: &[String],
        steps: &[&str],
        message: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            instance,
            tags: tags.to_vec(),
            docs: docs.to_vec(),
            outcome: GroupOutcome::Failed {
                step: "group task".to_string(),
                kind: ErrorKind::Harness,
                message: message.to_string(),
            },
            steps: steps.iter().map(|s| StepReport::not_run(s)).collect(),
            cleanup_error: None,
            duration_ms: 0,
        }
    }

    fn outcome_label(&self) -> &'static str {
        match self.outcome {
            GroupOutcome::Passed => "✓ passed",
            GroupOutcome::Failed { .. } => "✗ failed",
            GroupOutcome::Skipped { .. } => "⊘ skipped",
            GroupOutcome::Cancelled => "■ cancelled",
        }
    }

    fn detail(&self) -> String {
        match &self.outcome {
            GroupOutcome::Passed => {
                let excluded = self.count(|s| matches!(s, StepStatus::Excluded { .. }));
                if excluded > 0 {
                    format!("{} step(s) excluded", excluded)
                } else {
                    String::new()
                }
            }
            GroupOutcome::Failed { step, kind, message } => format!("{step} [{kind}]: {message}"),
            GroupOutcome::Skipped { reason, .. } => reason.clone(),
            GroupOutcome::Cancelled => "not started".to_string(),
        }
    }
}

/// Result of running all selected groups
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub environment: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
    pub duration_ms: u64,
    pub groups: Vec<GroupReport>,
}

impl SuiteReport {
    pub fn new(environment: &str, groups: Vec<GroupReport>, cancelled: bool, duration_ms: u64) -> Self {
        Self {
            environment: environment.to_string(),
            total: groups.len(),
            passed: groups.iter().filter(|g| g.is_passed()).count(),
            failed: groups.iter().filter(|g| g.is_failed()).count(),
            skipped: groups.iter().filter(|g| g.is_skipped()).count(),
            cancelled,
            duration_ms,
            groups,
        }
    }

    /// Process exit code for this run
    pub fn exit_code(&self) -> i32 {
        if self.cancelled {
            130
        } else if self.failed > 0 {
            1
        } else {
            0
        }
    }

    pub fn group(&self, name: &str) -> Option<&GroupReport> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn summary_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["Group", "Outcome", "Steps run", "Duration", "Detail"]);

        for group in &self.groups {
            let name = if group.instance > 0 {
                format!("{} #{}", group.name, group.instance + 1)
            } else {
                group.name.clone()
            };
            table.add_row(vec![
                name,
                group.outcome_label().to_string(),
                format!("{}/{}", group.executed_steps(), group.steps.len()),
                format!("{} ms", group.duration_ms),
                group.detail(),
            ]);
        }

        table
    }

    pub fn print_summary(&self) {
        println!("{}", self.summary_table());
        println!(
            "Environment '{}': {} passed, {} failed, {} skipped of {} group(s) ({} ms){}",
            self.environment,
            self.passed,
            self.failed,
            self.skipped,
            self.total,
            self.duration_ms,
            if self.cancelled { " [cancelled]" } else { "" }
        );
    }

    /// Write results to `test-results.json` in `output_dir`
    pub fn write_json(&self, output_dir: &Path) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(output_dir)?;

        let path = output_dir.join("test-results.json");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(name: &str, outcome: GroupOutcome) -> GroupReport {
        GroupReport {
            name: name.to_string(),
            instance: 0,
            tags: vec![],
            docs: vec![],
            outcome,
            steps: vec![StepReport::passed("only", 3)],
            cleanup_error: None,
            duration_ms: 3,
        }
    }

    #[test]
    fn test_skips_do_not_fail_the_run() {
        let report = SuiteReport::new(
            "staging",
            vec![
                group("api-health", GroupOutcome::Passed),
                group(
                    "branch-lifecycle",
                    GroupOutcome::Skipped {
                        reason: "missing configuration: ACCESS_TOKEN".to_string(),
                        missing: vec![ConfigKey::AccessToken],
                    },
                ),
            ],
            false,
            10,
        );
        assert_eq!((report.passed, report.failed, report.skipped), (1, 0, 1));
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_failure_and_cancellation_exit_codes() {
        let failed = GroupOutcome::Failed {
            step: "create branch".to_string(),
            kind: ErrorKind::UnexpectedStatus,
            message: "boom".to_string(),
        };
        let report = SuiteReport::new("staging", vec![group("branch-lifecycle", failed.clone())], false, 1);
        assert_eq!(report.exit_code(), 1);

        let report = SuiteReport::new("staging", vec![group("branch-lifecycle", failed)], true, 1);
        assert_eq!(report.exit_code(), 130);
    }

    #[test]
    fn test_crashed_group_fails_the_run() {
        let crashed = GroupReport::crashed("api-health", 0, &[], &[], &["health check query"], "boom");
        let report = SuiteReport::new("staging", vec![crashed], false, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_json_shape() {
        let report = SuiteReport::new("local", vec![group("api-health", GroupOutcome::Passed)], false, 1);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["groups"][0]["outcome"], "passed");
        assert_eq!(value["groups"][0]["steps"][0]["status"], "passed");
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let report = SuiteReport::new("local", vec![], false, 0);
        let path = report.write_json(dir.path()).unwrap();
        let parsed: SuiteReport = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(parsed.total, 0);
    }
}
