use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use verifier::agents::Linter;
use verifier::config::Config;
use verifier::contexts::{AgentRunner, FileMetricsStore, RunReport, budget_window};
use verifier::data::{AgentContext, AgentResult, AgentStatus, MetricsStore, total_tokens};
use verifier::git_context;
use verifier::providers::provider_for;
use verifier::registries::AgentRegistry;

mod progress;
pub mod usage;

use progress::ProgressIndicator;
use usage::{OutputFormat, Period, UsageSummary};

#[derive(Clone)]
pub struct Options {
    pub verbose: bool,
    /// Working tree the `.verifier` directory lives in
    pub root: PathBuf,
}

const ENV_TEMPLATE: &str = "ANTHROPIC_API_KEY=\"YOUR_API_KEY_HERE\"\n";

pub async fn init(force: bool, options: &Options) -> Result<()> {
    let config_path = Config::config_path(&options.root);
    if config_path.exists() && !force {
        println!(
            "Verifier already initialized at {} (use --force to overwrite)",
            config_path.display()
        );
        return Ok(());
    }

    let config = Config::default();
    config
        .save(&options.root)
        .context("Failed to write default configuration")?;
    println!("✓ Wrote {}", config_path.display());

    let env_path = Config::env_path(&options.root);
    if env_path.exists() {
        // Never clobber real API keys, even with --force.
        println!("Keeping existing {}", env_path.display());
    } else {
        write_private(&env_path, ENV_TEMPLATE)
            .with_context(|| format!("Failed to write {}", env_path.display()))?;
        println!("✓ Wrote {}", env_path.display());
    }

    println!("Set your API key in {} to enable LLM agents", env_path.display());
    Ok(())
}

pub async fn run(agent_id: String, registry: Arc<AgentRegistry>, options: &Options) -> Result<()> {
    let config = load_config(options)?;
    ensure_registered(&registry, &agent_id)?;

    let context = collect_context(&options.root);
    eprintln!("Running agent: {}...", agent_id);

    let mut reports = run_blocking(registry, config, vec![agent_id], context, None).await?;
    let report = reports.pop().context("agent run produced no result")?;

    warn_unmetered(&report);
    println!("{}", serde_json::to_string_pretty(&report.result)?);
    Ok(())
}

/// Runs every agent configured for hook `name` and fails when any result
/// blocks or fails.
pub async fn hook(name: String, registry: Arc<AgentRegistry>, options: &Options) -> Result<()> {
    let config = load_config(options)?;
    let Some(agent_ids) = config.hooks.get(&name).cloned() else {
        let configured: Vec<&str> = config.hooks.keys().map(String::as_str).collect();
        anyhow::bail!(
            "no hook named '{}' is configured. Configured hooks: {}",
            name,
            configured.join(", ")
        );
    };
    for agent_id in &agent_ids {
        ensure_registered(&registry, agent_id)?;
    }

    if agent_ids.is_empty() {
        println!("[]");
        return Ok(());
    }

    let context = collect_context(&options.root);
    let progress = ProgressIndicator::new(agent_ids.len());
    let reports = run_blocking(registry, config, agent_ids, context, Some(progress)).await?;

    let results: Vec<&AgentResult> = reports
        .iter()
        .inspect(|report| warn_unmetered(report))
        .map(|report| &report.result)
        .collect();
    println!("{}", serde_json::to_string_pretty(&results)?);

    let failed: Vec<&str> = results
        .iter()
        .filter(|r| r.status == AgentStatus::Failure || r.is_blocking())
        .map(|r| r.agent_id.as_str())
        .collect();
    if !failed.is_empty() {
        anyhow::bail!("Hook '{}' failed: {}", name, failed.join(", "));
    }
    Ok(())
}

pub async fn agents(registry: Arc<AgentRegistry>, options: &Options) -> Result<()> {
    let config = load_config(options)?;
    for agent_id in registry.list_ids() {
        let agent = registry.resolve(&agent_id, &config)?;
        println!("{:<16} {}", agent_id, agent.description());
    }
    Ok(())
}

pub async fn token_usage(period: Period, format: OutputFormat, options: &Options) -> Result<()> {
    let config = load_config(options)?;
    let store = FileMetricsStore::in_workspace(&options.root);
    let metrics = store
        .get_metrics(period.duration())
        .with_context(|| format!("Failed to read metrics from {}", store.metrics_dir().display()))?;

    if options.verbose {
        eprintln!(
            "Read {} metric(s) from {}",
            metrics.len(),
            store.metrics_dir().display()
        );
    }

    let summary = UsageSummary::from_metrics(&metrics);
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Table => {
            println!("Token usage ({})", period.label());
            print!("{}", summary.render_table());

            let daily = if period == Period::Daily {
                summary.total.tokens_used
            } else {
                total_tokens(&store.get_metrics(budget_window())?)
            };
            println!(
                "\nDaily budget: {} of {} tokens used",
                daily, config.budgets.daily_tokens
            );
        }
    }
    Ok(())
}

/// Checks the environment the agents depend on
pub async fn doctor(options: &Options) -> Result<()> {
    let mut problems = 0;
    let mut check = |ok: bool, label: &str, detail: String| {
        let mark = if ok { "✓" } else { "✗" };
        println!("{} {:<22} {}", mark, label, detail);
        if !ok {
            problems += 1;
        }
    };

    match git(&options.root, &["--version"]) {
        Ok(version) => check(true, "git", version),
        Err(e) => check(false, "git", e.to_string()),
    }
    match git(&options.root, &["rev-parse", "--show-toplevel"]) {
        Ok(top) => check(true, "repository", top),
        Err(_) => check(false, "repository", "not inside a git work tree".to_string()),
    }

    let config = match Config::load(&options.root) {
        Ok(config) => {
            let path = Config::config_path(&options.root);
            let detail = if path.exists() {
                path.display().to_string()
            } else {
                "defaults (run `verifier init`)".to_string()
            };
            check(true, "config", detail);
            Some(config)
        }
        Err(e) => {
            check(false, "config", e.to_string());
            None
        }
    };

    if let Some(config) = &config {
        let model = &config.models.primary;
        match provider_for(model, config) {
            Ok(_) => check(true, "provider", format!("{} ready", model)),
            Err(e) => check(false, "provider", e.to_string()),
        }

        let store = FileMetricsStore::in_workspace(&options.root);
        match store.get_metrics(budget_window()) {
            Ok(metrics) => {
                let used = total_tokens(&metrics);
                let budget = config.budgets.daily_tokens;
                check(
                    used < budget,
                    "daily budget",
                    format!("{} of {} tokens used", used, budget),
                );
            }
            Err(e) => check(false, "metrics", e.to_string()),
        }
    }

    for linter in Linter::defaults() {
        let label = format!("linter ({})", linter.language);
        match linter.locate() {
            Some(path) => check(true, &label, path.display().to_string()),
            None => check(false, &label, format!("{} not found in PATH", linter.program)),
        }
    }

    if problems == 0 {
        println!("\nAll checks passed");
    } else {
        println!("\n{} check(s) need attention", problems);
    }
    Ok(())
}

fn load_config(options: &Options) -> Result<Config> {
    Config::load(&options.root).with_context(|| {
        format!(
            "Failed to load configuration from {}",
            Config::config_path(&options.root).display()
        )
    })
}

fn ensure_registered(registry: &AgentRegistry, agent_id: &str) -> Result<()> {
    if !registry.contains(agent_id) {
        anyhow::bail!(
            "agent not found: {}. Available agents: {}",
            agent_id,
            registry.list_ids().join(", ")
        );
    }
    Ok(())
}

/// Staged change of the working tree, or an empty context outside a repository
fn collect_context(root: &Path) -> AgentContext {
    git_context::collect(root).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "could not collect git context; running on an empty change");
        AgentContext::default()
    })
}

/// Runs `agent_ids` in order on a blocking thread.
///
/// Agents shell out and make blocking HTTP calls, which must stay off the
/// async runtime.
async fn run_blocking(
    registry: Arc<AgentRegistry>,
    config: Config,
    agent_ids: Vec<String>,
    context: AgentContext,
    mut progress: Option<ProgressIndicator>,
) -> Result<Vec<RunReport>> {
    let store = FileMetricsStore::in_workspace(&config.root);

    tokio::task::spawn_blocking(move || {
        let runner = AgentRunner::new(config, &registry, store);
        let mut reports = Vec::with_capacity(agent_ids.len());
        for agent_id in &agent_ids {
            if let Some(progress) = &progress {
                progress.start_item(agent_id);
            }
            let report = runner.run_agent_report(agent_id, &context)?;
            if let Some(progress) = &mut progress {
                progress.complete_item(&report.result);
            }
            reports.push(report);
        }
        if let Some(progress) = &progress {
            progress.finish();
        }
        Ok::<_, anyhow::Error>(reports)
    })
    .await
    .context("Agent run was aborted")?
}

fn warn_unmetered(report: &RunReport) {
    if let Some(e) = &report.metering_error {
        eprintln!(
            "Warning: usage of agent {} was not recorded: {}",
            report.result.agent_id, e
        );
    }
}

fn git(root: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .context("Failed to execute git")?;
    if !output.status.success() {
        anyhow::bail!("git {} failed", args.join(" "));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Creates `path` readable only by the current user
fn write_private(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(content.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options_in(root: &Path) -> Options {
        Options {
            verbose: false,
            root: root.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn init_writes_config_and_env_template() {
        let dir = tempfile::tempdir().unwrap();
        init(false, &options_in(dir.path())).await.unwrap();

        let saved = fs::read_to_string(Config::config_path(dir.path())).unwrap();
        let parsed: Config = serde_yaml::from_str(&saved).unwrap();
        assert_eq!(parsed.budgets.daily_tokens, Config::default().budgets.daily_tokens);

        let env = fs::read_to_string(Config::env_path(dir.path())).unwrap();
        assert_eq!(env, ENV_TEMPLATE);
    }

    #[tokio::test]
    async fn init_keeps_existing_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = Config::env_path(dir.path());
        fs::create_dir_all(env_path.parent().unwrap()).unwrap();
        fs::write(&env_path, "ANTHROPIC_API_KEY=\"real\"\n").unwrap();

        init(true, &options_in(dir.path())).await.unwrap();
        assert_eq!(
            fs::read_to_string(&env_path).unwrap(),
            "ANTHROPIC_API_KEY=\"real\"\n"
        );
    }

    #[tokio::test]
    async fn init_without_force_leaves_config_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = Config::config_path(dir.path());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "budgets:\n  daily_tokens: 7\n").unwrap();

        init(false, &options_in(dir.path())).await.unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "budgets:\n  daily_tokens: 7\n"
        );
    }

    #[tokio::test]
    async fn unknown_agent_lists_available_ids() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(AgentRegistry::builtin());

        let err = run("nope".to_string(), registry, &options_in(dir.path()))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "agent not found: nope. Available agents: lint, security-scan"
        );
    }

    #[tokio::test]
    async fn unknown_hook_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(AgentRegistry::builtin());

        let err = hook("pre-push".to_string(), registry, &options_in(dir.path()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("pre-commit"));
    }

    #[tokio::test]
    async fn run_blocking_meters_each_agent() {
        let dir = tempfile::tempdir().unwrap();
        let options = options_in(dir.path());
        let config = load_config(&options).unwrap();
        let registry = Arc::new(AgentRegistry::builtin());

        // Lint with no staged files is skipped by the agent itself and still metered.
        let reports = run_blocking(
            registry,
            config,
            vec!["lint".to_string(), "lint".to_string()],
            AgentContext::default(),
            Some(ProgressIndicator::new(2)),
        )
        .await
        .unwrap();

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.metering_error.is_none()));
        let store = FileMetricsStore::in_workspace(dir.path());
        assert_eq!(store.get_metrics(budget_window()).unwrap().len(), 2);
    }
}
