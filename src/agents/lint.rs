use super::{Agent, ExecutionError};
use crate::data::{AgentContext, AgentResult, Severity};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const REPORT_FILE: &str = "lint-report.json";
const WARNING_ISSUE_COUNT: usize = 10;

/// An external linter invoked for files with a given extension
#[derive(Debug, Clone)]
pub struct Linter {
    /// File extension including the dot, e.g. ".py"
    pub extension: String,
    pub language: String,
    pub program: String,
    /// Arguments placed before the file path
    pub args: Vec<String>,
    /// Whether a non-zero exit with output means "issues found"
    pub nonzero_reports_issues: bool,
}

impl Linter {
    fn new(extension: &str, language: &str, program: &str, args: &[&str]) -> Self {
        Self {
            extension: extension.to_string(),
            language: language.to_string(),
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            nonzero_reports_issues: false,
        }
    }

    /// Linters used when none are configured explicitly
    pub fn defaults() -> Vec<Linter> {
        let mut ruff = Linter::new(".py", "Python", "ruff", &["check"]);
        ruff.nonzero_reports_issues = true;
        vec![Linter::new(".go", "Go", "gofmt", &["-l"]), ruff]
    }

    /// Resolved location of the linter executable, if installed
    pub fn locate(&self) -> Option<PathBuf> {
        find_in_path(&self.program)
    }
}

/// Lint findings for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintIssue {
    pub file: String,
    pub language: String,
    pub issues: String,
}

/// Runs language linters over the files touched by a change
pub struct LintAgent {
    artifacts_dir: PathBuf,
    linters: Vec<Linter>,
}

impl LintAgent {
    pub const ID: &'static str = "lint";

    pub fn new(artifacts_dir: PathBuf) -> Self {
        Self::with_linters(artifacts_dir, Linter::defaults())
    }

    pub fn with_linters(artifacts_dir: PathBuf, linters: Vec<Linter>) -> Self {
        Self {
            artifacts_dir,
            linters,
        }
    }

    fn linter_for(&self, file: &str) -> Option<&Linter> {
        let extension = Path::new(file).extension()?.to_str()?;
        self.linters
            .iter()
            .find(|l| l.extension.trim_start_matches('.') == extension)
    }

    /// Lints one file, returning its findings if the linter reported any
    fn lint_file(&self, linter: &Linter, file: &str) -> Option<LintIssue> {
        let output = if find_in_path(&linter.program).is_none() {
            format!("{} not found in PATH", linter.program)
        } else {
            let result = Command::new(&linter.program)
                .args(&linter.args)
                .arg(file)
                .output();
            let output = match result {
                Ok(output) => output,
                Err(e) => {
                    tracing::warn!(
                        file,
                        linter = %linter.program,
                        error = %e,
                        "linter could not be started"
                    );
                    return None;
                }
            };

            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            let reported_issues = linter.nonzero_reports_issues && !text.trim().is_empty();
            if !output.status.success() && !reported_issues {
                tracing::warn!(
                    file,
                    linter = %linter.program,
                    status = %output.status,
                    output = %text.trim(),
                    "linter failed"
                );
                return None;
            }
            text
        };

        if output.trim().is_empty() {
            return None;
        }
        Some(LintIssue {
            file: file.to_string(),
            language: linter.language.clone(),
            issues: output,
        })
    }
}

impl Agent for LintAgent {
    fn id(&self) -> &str {
        Self::ID
    }

    fn description(&self) -> &str {
        "Multi-language code linting"
    }

    fn execute(&self, context: &AgentContext) -> Result<AgentResult, ExecutionError> {
        if context.files.is_empty() {
            return Ok(AgentResult::skipped(Self::ID, "No files to lint"));
        }

        let issues: Vec<LintIssue> = context
            .files
            .iter()
            .filter_map(|file| {
                let linter = self.linter_for(file)?;
                self.lint_file(linter, file)
            })
            .collect();

        let severity = if issues.len() > WARNING_ISSUE_COUNT {
            Severity::Warning
        } else {
            Severity::Info
        };

        let data = serde_json::json!({
            "total_issues": issues.len(),
            "files_checked": context.files.len(),
            "issues": issues,
        });
        let mut result = AgentResult::success(Self::ID)
            .with_data(data)
            .with_severity(severity);

        if !issues.is_empty() {
            fs::create_dir_all(&self.artifacts_dir)?;
            let report_path = self.artifacts_dir.join(REPORT_FILE);
            fs::write(&report_path, serde_json::to_string_pretty(&issues)?)?;
            result = result.with_artifact("report", report_path);
        }

        Ok(result)
    }
}

/// Locates `program` on the `PATH`
fn find_in_path(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let paths = env::var_os("PATH")?;
    env::split_paths(&paths).find_map(|dir| {
        let full = dir.join(program);
        if full.is_file() {
            return Some(full);
        }
        let exe = full.with_extension(env::consts::EXE_EXTENSION);
        (!env::consts::EXE_EXTENSION.is_empty() && exe.is_file()).then_some(exe)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::AgentStatus;

    fn context(files: &[&str]) -> AgentContext {
        AgentContext::new(files.iter().map(|f| f.to_string()).collect(), "", "main")
    }

    #[test]
    fn test_no_files_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let agent = LintAgent::new(dir.path().to_path_buf());

        let result = agent.execute(&AgentContext::default()).unwrap();
        assert_eq!(result.status, AgentStatus::Skipped);
        assert_eq!(result.error.as_deref(), Some("No files to lint"));
    }

    #[test]
    fn test_unknown_extensions_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let agent = LintAgent::new(dir.path().join("artifacts"));

        let result = agent.execute(&context(&["README.md", "Makefile"])).unwrap();
        assert_eq!(result.status, AgentStatus::Success);
        assert_eq!(result.data["total_issues"], 0);
        assert_eq!(result.data["files_checked"], 2);
        assert!(result.artifacts.is_empty());
        assert!(!dir.path().join("artifacts").exists());
    }

    #[test]
    fn test_missing_linter_is_reported_as_issue() {
        let dir = tempfile::tempdir().unwrap();
        let linter = Linter::new(".rs", "Rust", "verifier-test-no-such-linter", &[]);
        let agent = LintAgent::with_linters(dir.path().to_path_buf(), vec![linter]);

        let result = agent.execute(&context(&["src/lib.rs"])).unwrap();
        assert_eq!(result.status, AgentStatus::Success);
        assert_eq!(result.data["total_issues"], 1);
        assert_eq!(
            result.data["issues"][0]["issues"],
            "verifier-test-no-such-linter not found in PATH"
        );

        let report = dir.path().join(REPORT_FILE);
        assert_eq!(result.artifacts[0].path, report);
        let written: Vec<LintIssue> =
            serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
        assert_eq!(written[0].file, "src/lib.rs");
    }

    #[cfg(unix)]
    #[test]
    fn test_locate() {
        assert!(Linter::new(".txt", "Text", "sh", &[]).locate().is_some());
        assert!(
            Linter::new(".rs", "Rust", "verifier-test-no-such-linter", &[])
                .locate()
                .is_none()
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_linter_output_becomes_issue() {
        let dir = tempfile::tempdir().unwrap();
        let linter = Linter::new(".txt", "Text", "echo", &["needs formatting:"]);
        let agent = LintAgent::with_linters(dir.path().to_path_buf(), vec![linter]);

        let result = agent.execute(&context(&["notes.txt"])).unwrap();
        assert_eq!(result.data["total_issues"], 1);
        assert_eq!(
            result.data["issues"][0]["issues"].as_str().unwrap().trim(),
            "needs formatting: notes.txt"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_linter_without_issue_semantics_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let linter = Linter::new(".txt", "Text", "false", &[]);
        let agent = LintAgent::with_linters(dir.path().to_path_buf(), vec![linter]);

        let result = agent.execute(&context(&["notes.txt"])).unwrap();
        assert_eq!(result.status, AgentStatus::Success);
        assert_eq!(result.data["total_issues"], 0);
    }

    #[test]
    fn test_many_issues_raise_warning() {
        let dir = tempfile::tempdir().unwrap();
        let linter = Linter::new(".rs", "Rust", "verifier-test-no-such-linter", &[]);
        let agent = LintAgent::with_linters(dir.path().to_path_buf(), vec![linter]);
        let files: Vec<String> = (0..11).map(|i| format!("src/m{i}.rs")).collect();

        let result = agent
            .execute(&AgentContext::new(files, "", "main"))
            .unwrap();
        assert_eq!(result.severity, Severity::Warning);
    }
}
