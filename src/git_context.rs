//! Collects the staged change of a git working tree into an [`AgentContext`].

use crate::data::AgentContext;
use anyhow::{Context, Result};
use std::path::Path;
use std::process::Command;

/// Gathers branch, staged file list and staged diff for the repository at `repo_root`
pub fn collect(repo_root: &Path) -> Result<AgentContext> {
    let branch = git(repo_root, &["rev-parse", "--abbrev-ref", "HEAD"])
        // A repository without commits has no HEAD yet.
        .unwrap_or_default()
        .trim()
        .to_string();

    let files = git(repo_root, &["diff", "--cached", "--name-only"])?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    let diff = git(repo_root, &["diff", "--cached"])?;

    Ok(AgentContext {
        files,
        diff,
        branch,
    })
}

fn git(repo_root: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .output()
        .context("Failed to execute git")?;

    if !output.status.success() {
        anyhow::bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
