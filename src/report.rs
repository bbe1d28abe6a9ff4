//! Result aggregation.
//!
//! Converts a raw [`ExecutionHistory`] into the one deterministic report
//! shape the API returns, under both success and failure. Every sub-
//! extraction is individually fault-contained: a history query that fails
//! degrades that field to its absent/empty value and never blocks the rest.

use serde::Serialize;

use crate::driver::{ExecutionHistory, HistoryError, Judgement};
use crate::llm::LlmProvider;

/// Outcome of one fault-contained sub-extraction.
///
/// Degradation carries the reason so "why is this field absent" is explicit
/// rather than buried in log output.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction<T> {
    Present(T),
    Degraded { reason: String },
}

impl<T> Extraction<T> {
    /// Wrap a history query, logging a warning on failure.
    pub fn from_query(query: &str, result: Result<T, HistoryError>) -> Self {
        match result {
            Ok(value) => Self::Present(value),
            Err(e) => {
                tracing::warn!("Could not extract {}: {}", query, e);
                Self::Degraded {
                    reason: e.to_string(),
                }
            }
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Present(value) => Some(value),
            Self::Degraded { .. } => None,
        }
    }

    pub fn unwrap_or(self, default: T) -> T {
        match self {
            Self::Present(value) => value,
            Self::Degraded { .. } => default,
        }
    }

    pub fn unwrap_or_default(self) -> T
    where
        T: Default,
    {
        self.unwrap_or(T::default())
    }
}

/// Request facets the aggregator needs.
#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub provider: LlmProvider,
    pub calculate_cost: bool,
    pub debug_mode: bool,
}

/// Per-step reasoning entry in the debug bundle.
#[derive(Debug, Clone, Serialize)]
pub struct DebugThought {
    pub step: u32,
    pub thought: String,
    pub action: Option<String>,
    pub reasoning: Option<String>,
}

/// Small performance summary included in the debug bundle.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub total_duration: f64,
    pub steps: u32,
    pub urls_visited: usize,
    pub has_errors: bool,
}

/// Extra diagnostics captured only when the caller asked for debug mode.
#[derive(Debug, Clone, Serialize)]
pub struct DebugBundle {
    pub extracted_content: Vec<String>,
    pub model_thoughts: Vec<DebugThought>,
    pub performance: PerformanceSummary,
}

/// The aggregated execution report. Produced once per task, immutable after
/// construction; absent optionals mean "not available", never "zero".
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub final_result: Option<String>,
    pub is_done: bool,
    pub is_successful: Option<bool>,
    pub has_errors: bool,
    pub urls: Vec<String>,
    pub steps: u32,
    pub duration_seconds: f64,
    pub errors: Vec<String>,
    pub is_rate_limit: bool,
    pub is_malformed_response: bool,
    pub judge_verdict: Option<String>,
    pub cost: Option<f64>,
    pub cost_currency: String,
    pub llm_calls: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugBundle>,
    pub downloaded_files: Vec<String>,
    pub conversation_path: Option<String>,
    pub gif_path: Option<String>,
}

impl ExecutionReport {
    /// Overall success: the explicit flag when the history has one, otherwise
    /// done, or a final result with no errors.
    pub fn derive_success(&self) -> bool {
        match self.is_successful {
            Some(flag) => flag,
            None => self.is_done || (self.final_result.is_some() && !self.has_errors),
        }
    }

    /// Human-actionable error text: classified guidance when a known provider
    /// pattern matched, otherwise the raw errors joined. The raw list stays
    /// on the report either way.
    pub fn error_summary(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        let joined = self.errors.join("; ");
        if self.is_rate_limit {
            Some(format_provider_error(&joined, ProviderErrorKind::RateLimit))
        } else if self.is_malformed_response {
            Some(format_provider_error(&joined, ProviderErrorKind::EmptyJson))
        } else {
            Some(joined)
        }
    }
}

/// Assemble the report from a finished run.
///
/// Contract: always returns a report, even if every optional field is
/// absent. No single failed sub-extraction may propagate.
pub fn assemble(
    history: &dyn ExecutionHistory,
    options: &ReportOptions,
    downloaded_files: Vec<String>,
    conversation_path: Option<String>,
    gif_path: Option<String>,
) -> ExecutionReport {
    let errors: Vec<String> = Extraction::from_query("errors", history.errors())
        .unwrap_or_default()
        .into_iter()
        .filter(|e| !e.is_empty())
        .collect();

    // Classification is advisory and provider-gated: the same error text
    // under another provider stays unclassified.
    let (is_malformed_response, is_rate_limit) =
        if options.provider == LlmProvider::OpenAi && !errors.is_empty() {
            (
                errors.iter().any(|e| is_empty_json_error(e)),
                errors.iter().any(|e| is_rate_limit_error(e)),
            )
        } else {
            (false, false)
        };

    let final_result =
        Extraction::from_query("final_result", history.final_result()).unwrap_or_default();
    let is_done = Extraction::from_query("is_done", history.is_done()).unwrap_or(false);
    let is_successful =
        Extraction::from_query("is_successful", history.is_successful()).unwrap_or(None);
    let has_errors = Extraction::from_query("has_errors", history.has_errors()).unwrap_or(false);
    let urls = Extraction::from_query("urls", history.urls()).unwrap_or_default();
    let steps = Extraction::from_query("steps", history.number_of_steps()).unwrap_or(0);
    let duration_seconds =
        Extraction::from_query("duration", history.total_duration_seconds()).unwrap_or(0.0);

    let judge_verdict = Extraction::from_query("judge verdict", history.judgement())
        .into_option()
        .flatten()
        .map(|j| format_judge_verdict(&j));

    let (cost, llm_calls) = extract_cost(history, options, steps);

    let debug = options.debug_mode.then(|| {
        let extracted_content =
            Extraction::from_query("extracted content", history.extracted_content())
                .unwrap_or_default();
        let model_thoughts = Extraction::from_query("model thoughts", history.model_thoughts())
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(i, t)| DebugThought {
                step: i as u32 + 1,
                thought: t.thought,
                action: t.action,
                reasoning: t.reasoning,
            })
            .collect();
        DebugBundle {
            extracted_content,
            model_thoughts,
            performance: PerformanceSummary {
                total_duration: duration_seconds,
                steps,
                urls_visited: urls.len(),
                has_errors,
            },
        }
    });

    ExecutionReport {
        final_result,
        is_done,
        is_successful,
        has_errors,
        urls,
        steps,
        duration_seconds,
        errors,
        is_rate_limit,
        is_malformed_response,
        judge_verdict,
        cost,
        cost_currency: "USD".to_string(),
        llm_calls,
        debug,
        downloaded_files,
        conversation_path,
        gif_path,
    }
}

/// Cost extraction with a degraded fallback that stays distinguishable from
/// zero cost: when the usage record carries no computed cost, `cost` is
/// absent and `llm_calls` reports the step count so callers can estimate
/// out-of-band.
fn extract_cost(
    history: &dyn ExecutionHistory,
    options: &ReportOptions,
    steps: u32,
) -> (Option<f64>, u32) {
    if !options.calculate_cost {
        return (None, 0);
    }

    let mut cost = None;
    let mut llm_calls = 0;

    if let Extraction::Present(Some(usage)) = Extraction::from_query("usage", history.usage()) {
        cost = usage.total_cost;
        if usage.input_tokens.is_some() && usage.output_tokens.is_some() {
            llm_calls = 1;
            tracing::info!(
                "Cost calculated: cost={:?}, input_tokens={:?}, output_tokens={:?}",
                cost,
                usage.input_tokens,
                usage.output_tokens
            );
        }
    }

    if cost.is_none() {
        tracing::warn!("No cost data available in history usage");
        llm_calls = steps;
    }

    (cost, llm_calls)
}

/// Markers of empty/malformed structured model output.
pub fn is_empty_json_error(message: &str) -> bool {
    const INDICATORS: [&str; 5] = [
        "eof while parsing",
        "invalid json",
        "input_value=''",
        "expecting value",
        "no json object could be decoded",
    ];
    let lowered = message.to_lowercase();
    INDICATORS.iter().any(|marker| lowered.contains(marker))
}

/// Markers of provider rate limiting.
pub fn is_rate_limit_error(message: &str) -> bool {
    const INDICATORS: [&str; 5] = [
        "rate limit",
        "rate_limit_exceeded",
        "quota exceeded",
        "too many requests",
        "429",
    ];
    let lowered = message.to_lowercase();
    INDICATORS.iter().any(|marker| lowered.contains(marker))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    RateLimit,
    EmptyJson,
}

/// Tailored guidance for classified provider failures. The original error
/// text is preserved (truncated) below the suggestions.
pub fn format_provider_error(original: &str, kind: ProviderErrorKind) -> String {
    let (base, suggestions): (&str, [&str; 3]) = match kind {
        ProviderErrorKind::EmptyJson => (
            "OpenAI returned an empty or malformed response. This is usually a transient issue.",
            [
                "Retry the task (very likely to succeed)",
                "Check OpenAI status page for outages",
                "Ensure your API key has remaining quota",
            ],
        ),
        ProviderErrorKind::RateLimit => (
            "OpenAI API rate limit reached. Your account exceeded the allowed requests.",
            [
                "Wait a few minutes and retry",
                "Upgrade the OpenAI plan for higher limits",
                "Switch to Gemini (no rate limits on free tier)",
            ],
        ),
    };

    let mut formatted = format!("{}\n\nSuggestions:\n", base);
    formatted.push_str(
        &suggestions
            .iter()
            .map(|tip| format!("  - {}", tip))
            .collect::<Vec<_>>()
            .join("\n"),
    );
    if !original.is_empty() {
        let truncated: String = original.chars().take(200).collect();
        formatted.push_str(&format!("\n\nOriginal error: {}", truncated));
    }
    formatted
}

/// Render a judge verdict into the fixed human-readable format.
pub fn format_judge_verdict(judgement: &Judgement) -> String {
    let (emoji, status) = if judgement.verdict {
        ("✅", "PASS")
    } else {
        ("❌", "FAIL")
    };

    let mut parts = vec![format!("⚖️  Judge Verdict: {} {}", emoji, status)];

    if let Some(reasoning) = &judgement.reasoning {
        parts.push(format!("Reasoning: {}", reasoning));
    }
    if let Some(failure_reason) = &judgement.failure_reason {
        parts.push(format!("Failure Reason: {}", failure_reason));
    }
    if judgement.impossible_task {
        parts.push("⚠️ Task was impossible to complete".to_string());
    }
    if judgement.reached_captcha {
        parts.push("🤖 Encountered CAPTCHA".to_string());
    }

    parts.join("\n")
}
