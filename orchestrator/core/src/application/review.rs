// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Review Phases
//!
//! Prompts and verdicts for the two review passes a project goes through once
//! its features are done:
//!
//! 1. QA: the agent verifies the workspace and writes `PASS` to
//!    [`QA_RESULT_FILE`]. Anything else, or no file, fails QA.
//! 2. Manager: the agent reviews the [`QaReport`] and may reopen features.
//!    Sign-off requires every feature done and passing afterwards.

use std::fmt;
use std::path::Path;

use crate::domain::feature::FeatureList;

/// Verdict file the QA agent writes at the workspace root.
pub const QA_RESULT_FILE: &str = ".qa_result";
pub const QA_PASS: &str = "PASS";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QaReport {
    pub total: usize,
    pub passing: usize,
    /// Ids of features not done-and-passing, in list order.
    pub failing: Vec<String>,
}

impl QaReport {
    pub fn from_features(list: &FeatureList) -> Self {
        let mut report = Self {
            total: list.features.len(),
            ..Self::default()
        };
        for feature in &list.features {
            if feature.is_complete() {
                report.passing += 1;
            } else {
                report.failing.push(feature.id.clone());
            }
        }
        report
    }

    pub fn completion_ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.passing as f64 / self.total as f64
    }

    /// Non-empty and every feature passing.
    pub fn all_passing(&self) -> bool {
        self.total > 0 && self.passing == self.total
    }
}

impl fmt::Display for QaReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Features passing: {}/{} ({:.0}%)",
            self.passing,
            self.total,
            self.completion_ratio() * 100.0
        )?;
        if !self.failing.is_empty() {
            write!(f, "\nNot passing: {}", self.failing.join(", "))?;
        }
        Ok(())
    }
}

pub fn qa_prompt(spec: &str, report: &QaReport) -> String {
    let mut prompt = String::from("## QA review\n");
    if !spec.is_empty() {
        prompt.push_str("\n### Specification\n");
        prompt.push_str(spec);
        prompt.push('\n');
    }
    prompt.push_str(&format!("\n### Feature status\n{}\n", report));
    prompt.push_str(&format!(
        "\nVerify the workspace against the specification. Reply with ```bash blocks that run the checks. \
         The last command must write {} to `{}` only if every check passed.\n",
        QA_PASS, QA_RESULT_FILE
    ));
    prompt
}

pub fn manager_prompt(report: &QaReport) -> String {
    format!(
        "## Manager review\n\n### QA report\n{}\n\n\
         Decide whether the project can be signed off. To send work back, reply with ```bash blocks \
         running `agent-bridge feature set <id> --status pending --passes false` for each feature to redo. \
         The project is signed off only when every feature is done and passing after your commands.\n",
        report
    )
}

/// Read and delete the QA verdict file. `None` when QA wrote nothing.
pub async fn take_qa_result(workspace: &Path) -> std::io::Result<Option<String>> {
    let path = workspace.join(QA_RESULT_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => {
            tokio::fs::remove_file(&path).await?;
            Ok(Some(content.trim().to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts_done_and_passing_only() {
        let list = FeatureList::parse(
            r#"{"features":[
                {"id":"a","status":"done","passes":true},
                {"id":"b","status":"done","passes":false},
                {"id":"c","status":"pending"}
            ]}"#,
        )
        .unwrap();
        let report = QaReport::from_features(&list);

        assert_eq!(report.total, 3);
        assert_eq!(report.passing, 1);
        assert_eq!(report.failing, vec!["b", "c"]);
        assert!(!report.all_passing());
        assert_eq!(report.to_string(), "Features passing: 1/3 (33%)\nNot passing: b, c");
    }

    #[test]
    fn test_empty_list_never_passes() {
        let report = QaReport::from_features(&FeatureList::default());
        assert!(!report.all_passing());
        assert_eq!(report.completion_ratio(), 0.0);
    }

    #[tokio::test]
    async fn test_take_qa_result_consumes_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(take_qa_result(dir.path()).await.unwrap(), None);

        tokio::fs::write(dir.path().join(QA_RESULT_FILE), "PASS\n").await.unwrap();
        assert_eq!(take_qa_result(dir.path()).await.unwrap().as_deref(), Some(QA_PASS));
        assert!(!dir.path().join(QA_RESULT_FILE).exists());
    }
}
