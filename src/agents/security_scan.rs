use super::{Agent, ExecutionError};
use crate::config::Config;
use crate::data::{AgentContext, AgentResult, Severity};
use crate::providers::{LlmProvider, provider_for};
use serde::{Deserialize, Serialize};

const SYSTEM_PROMPT: &str = "You are a security expert analyzing code for vulnerabilities. \
Be thorough but avoid false positives.";
const RESPONSE_SHAPE: &str = r#"Respond JSON with { "risk_score": 0, "vulnerabilities": [{"type":"","severity":"critical|high|medium|low","description":"","location":"","recommendation":""}], "summary":"" }"#;
/// Risk assigned when the model reply cannot be parsed
const UNPARSED_RISK_SCORE: i64 = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityAnalysis {
    #[serde(default)]
    pub risk_score: i64,
    #[serde(default)]
    pub vulnerabilities: Vec<Vulnerability>,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vulnerability {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: String,
    pub description: String,
    pub location: String,
    pub recommendation: String,
}

impl Vulnerability {
    fn is_blocking(&self) -> bool {
        matches!(
            self.severity.to_ascii_lowercase().as_str(),
            "critical" | "high"
        )
    }
}

/// Asks a language model to review the staged diff for vulnerabilities
pub struct SecurityScanAgent {
    config: Config,
    provider: Option<Box<dyn LlmProvider>>,
}

impl SecurityScanAgent {
    pub const ID: &'static str = "security-scan";

    /// The provider is resolved from `config.models.primary` on each run
    pub fn new(config: Config) -> Self {
        Self {
            config,
            provider: None,
        }
    }

    pub fn with_provider(config: Config, provider: Box<dyn LlmProvider>) -> Self {
        Self {
            config,
            provider: Some(provider),
        }
    }

    fn model(&self) -> &str {
        &self.config.models.primary
    }

    fn severity_for(&self, analysis: &SecurityAnalysis) -> Severity {
        if analysis.vulnerabilities.iter().any(Vulnerability::is_blocking) {
            Severity::Blocking
        } else if analysis.risk_score > self.config.thresholds.security_risk {
            Severity::Warning
        } else {
            Severity::Info
        }
    }
}

impl Agent for SecurityScanAgent {
    fn id(&self) -> &str {
        Self::ID
    }

    fn description(&self) -> &str {
        "Scans code for security vulnerabilities"
    }

    fn execute(&self, context: &AgentContext) -> Result<AgentResult, ExecutionError> {
        if context.diff.trim().is_empty() {
            return Ok(AgentResult::skipped(Self::ID, "No diff available"));
        }

        let built;
        let provider: &dyn LlmProvider = match &self.provider {
            Some(provider) => provider.as_ref(),
            None => {
                built = provider_for(self.model(), &self.config)?;
                built.as_ref()
            }
        };

        let prompt = format!(
            "Analyze the following code diff for security vulnerabilities.\n\n{}\n\n{}",
            context.diff, RESPONSE_SHAPE
        );
        tracing::debug!(
            model = %self.model(),
            prompt_bytes = prompt.len(),
            "requesting security analysis"
        );
        let completion = provider.complete(&prompt, SYSTEM_PROMPT, true)?;

        let analysis = parse_analysis(&completion.text);
        let tokens_used = completion
            .tokens_used
            .unwrap_or_else(|| estimate_tokens(&prompt, &completion.text));

        Ok(AgentResult::success(Self::ID)
            .with_score(analysis.risk_score as f64)
            .with_severity(self.severity_for(&analysis))
            .with_usage(tokens_used, calculate_cost(self.model(), tokens_used))
            .with_data(serde_json::to_value(&analysis)?))
    }
}

/// Parses the model reply, tolerating fenced code blocks.
///
/// A reply that is not the requested JSON becomes the summary of a low-risk
/// analysis.
fn parse_analysis(reply: &str) -> SecurityAnalysis {
    let body = strip_code_fence(reply);
    serde_json::from_str(body).unwrap_or_else(|_| SecurityAnalysis {
        risk_score: UNPARSED_RISK_SCORE,
        vulnerabilities: Vec::new(),
        summary: reply.to_string(),
    })
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag on the opening fence line.
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Rough token count when the provider does not report usage
fn estimate_tokens(prompt: &str, reply: &str) -> u64 {
    ((prompt.len() + reply.len()) / 4) as u64
}

/// Cost in dollars for `tokens` on `model`
fn calculate_cost(model: &str, tokens: u64) -> f64 {
    let cost_per_million = if model.contains("sonnet") {
        3.0
    } else if model.contains("haiku") {
        0.25
    } else {
        5.0
    };
    tokens as f64 / 1_000_000.0 * cost_per_million
}
