//! Result Reporting
//!
//! Structured and human-readable forms of batch and restart outcomes.
//! The structured forms serialise to camelCase JSON; the `Display` impls
//! produce the text report printed by the CLI.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::convergence::RestartSummary;
use crate::exec::CommandResult;

/// One-shot command outcome across a set of endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub command: String,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<CommandResult>,
}

impl BatchReport {
    pub fn new(command: impl Into<String>, results: Vec<CommandResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            command: command.into(),
            succeeded,
            failed: results.len() - succeeded,
            results,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.results {
            write_result(f, result)?;
            writeln!(f)?;
        }
        write!(f, "{} succeeded, {} failed", self.succeeded, self.failed)
    }
}

fn write_result(f: &mut fmt::Formatter<'_>, result: &CommandResult) -> fmt::Result {
    let marker = if result.success { "OK" } else { "FAILED" };
    match result.exit_code {
        Some(code) => writeln!(f, "== {} [{}] exit {}", result.endpoint_id, marker, code)?,
        None => writeln!(f, "== {} [{}]", result.endpoint_id, marker)?,
    }
    if let Some(error) = &result.error {
        writeln!(f, "error: {}", error)?;
    }
    write_block(f, "stdout", &result.stdout)?;
    write_block(f, "stderr", &result.stderr)
}

fn write_block(f: &mut fmt::Formatter<'_>, label: &str, raw: &str) -> fmt::Result {
    let text = strip_ansi_escapes::strip_str(raw);
    let text = text.trim_end();
    if text.is_empty() {
        return Ok(());
    }
    writeln!(f, "-- {} --", label)?;
    writeln!(f, "{}", text)
}

impl fmt::Display for RestartSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Restart run {} ({})", self.run_id, self.outcome)?;
        writeln!(
            f,
            "restarted: {}, restart failed: {}, re-registered: {}, still pending: {}, waited: {}s",
            self.restart_succeeded,
            self.restart_failed.len(),
            self.reregistered_count,
            self.still_pending.len(),
            self.waited_seconds
        )?;

        write_list(f, "re-registered", self.reregistered.iter().map(String::as_str))?;
        write_list(f, "still pending", self.still_pending.iter().map(String::as_str))?;

        if !self.restart_failed.is_empty() {
            writeln!(f, "\nrestart failed:")?;
            for failure in &self.restart_failed {
                writeln!(f, "  {}: {}", failure.endpoint_id, failure.error)?;
            }
        }
        Ok(())
    }
}

fn write_list<'a>(
    f: &mut fmt::Formatter<'_>,
    label: &str,
    items: impl ExactSizeIterator<Item = &'a str>,
) -> fmt::Result {
    if items.len() == 0 {
        return Ok(());
    }
    writeln!(f, "\n{}:", label)?;
    for item in items {
        writeln!(f, "  {}", item)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convergence::{ConvergencePhase, RestartFailure};
    use crate::exec::ExecError;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_batch_report_counts_and_sections() {
        let report = BatchReport::new(
            "uptime",
            vec![
                CommandResult::completed("web-1", 0, "\x1b[32m up 3 days\x1b[0m\n", ""),
                CommandResult::completed("web-2", 2, "", "permission denied\n"),
                CommandResult::failed("web-3", &ExecError::Timeout(2000)),
            ],
        );

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 2);
        assert!(!report.all_succeeded());

        let text = report.to_string();
        assert!(text.contains("== web-1 [OK] exit 0\n-- stdout --\n up 3 days\n"));
        assert!(!text.contains("\x1b["));
        assert!(text.contains("== web-2 [FAILED] exit 2\nerror: command exited with status 2\n-- stderr --\npermission denied\n"));
        assert!(text.contains("== web-3 [FAILED]\nerror: timed out after 2000ms\n"));
        assert!(text.ends_with("1 succeeded, 2 failed"));
    }

    #[test]
    fn test_empty_output_blocks_are_omitted() {
        let report = BatchReport::new("true", vec![CommandResult::completed("a", 0, "", "  \n")]);
        let text = report.to_string();
        assert!(!text.contains("-- stdout --"));
        assert!(!text.contains("-- stderr --"));
    }

    #[test]
    fn test_batch_report_json() {
        let report = BatchReport::new("true", vec![CommandResult::completed("a", 0, "", "")]);
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["succeeded"], 1);
        assert_eq!(v["results"][0]["endpointId"], "a");
    }

    #[test]
    fn test_restart_summary_text() {
        let summary = RestartSummary {
            run_id: Uuid::nil(),
            started_at: Utc::now(),
            outcome: ConvergencePhase::PartialTimeout,
            restart_succeeded: 3,
            restart_failed: vec![RestartFailure {
                endpoint_id: "d".into(),
                error: "connection failed: connection refused".into(),
            }],
            reregistered: vec!["a".into(), "b".into()],
            reregistered_count: 2,
            still_pending: vec!["c".into()],
            waited_seconds: 10,
            poll_ticks: 2,
        };

        let text = summary.to_string();
        assert!(text.starts_with("Restart run 00000000-0000-0000-0000-000000000000 (partial_timeout)"));
        assert!(text.contains("restarted: 3, restart failed: 1, re-registered: 2, still pending: 1, waited: 10s"));
        assert!(text.contains("re-registered:\n  a\n  b\n"));
        assert!(text.contains("still pending:\n  c\n"));
        assert!(text.contains("restart failed:\n  d: connection failed: connection refused\n"));

        let v = serde_json::to_value(&summary).unwrap();
        assert_eq!(v["reregisteredCount"], 2);
        assert_eq!(v["stillPending"][0], "c");
        assert_eq!(v["outcome"], "partial_timeout");
    }
}
