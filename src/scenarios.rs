use crate::completion::{CompletionOptions, CompletionProvider};
use crate::error::{ReplayError, Result};
use crate::models::{Candidate, Comparator, ExitAction, ExitCondition, ExitMetric};
use log::{info, warn};
use serde::Deserialize;
use serde_json::Value;

pub const MAX_SCENARIOS: usize = 100;
const MAX_SAMPLE_CANDIDATES: usize = 5;

const SYSTEM_PROMPT: &str = "You design exit strategies for long stock positions opened on \
insider-buying signals. Respond with a JSON array only, no prose. Each element: \
{\"name\": string, \"description\": string, \"action\": \"liquidate\", \"conditions\": \
[{\"metric\": \"price_change_percent\" | \"days_held\", \"comparator\": \">\" | \"<\" | \">=\" | \"<=\" | \"==\", \
\"threshold\": number}]}. Conditions are OR-combined: the position is fully liquidated on the \
first day any condition is true. Every strategy must include a take-profit (positive \
price_change_percent threshold) and either a stop-loss (negative price_change_percent \
threshold) or a days_held time exit.";

/// A validated exit-rule set, ready for simulation.
#[derive(Debug, Clone)]
pub struct ScenarioDraft {
    pub name: String,
    pub description: String,
    pub conditions: Vec<ExitCondition>,
    pub action: ExitAction,
}

/// Raw authored payloads. Everything is permissive here; the validation
/// pass decides what survives.
#[derive(Debug, Deserialize)]
struct RawScenarioPayload {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    conditions: Vec<RawConditionPayload>,
    #[serde(default)]
    action: String,
}

#[derive(Debug, Deserialize)]
struct RawConditionPayload {
    #[serde(default)]
    metric: String,
    #[serde(default)]
    comparator: String,
    #[serde(default)]
    threshold: Value,
}

/// Requests up to 100 exit-rule sets and validates them. Structural parse
/// failure is fatal; individually malformed or invariant-violating
/// scenarios are dropped.
pub async fn author_scenarios(
    completion: &dyn CompletionProvider,
    options: CompletionOptions,
    candidates: &[Candidate],
) -> Result<Vec<ScenarioDraft>> {
    let user_prompt = build_user_prompt(candidates);
    let raw = completion
        .complete(SYSTEM_PROMPT, &user_prompt, options)
        .await?;
    let payloads = parse_scenario_payloads(&raw)?;
    let drafts = validate_scenarios(payloads);
    if drafts.is_empty() {
        return Err(ReplayError::AuthoringParse(
            "no authored scenario satisfied the structural contract".to_string(),
        ));
    }
    info!("Authored {} valid exit-rule scenarios", drafts.len());
    Ok(drafts)
}

fn build_user_prompt(candidates: &[Candidate]) -> String {
    let mut samples = String::new();
    for candidate in candidates.iter().take(MAX_SAMPLE_CANDIDATES) {
        samples.push_str(&format!(
            "- {}: insider bought at ${:.2} on {}, market price ${:.2}, market cap ${:.0}M\n",
            candidate.ticker,
            candidate.insider_price,
            candidate
                .insider_trade_date
                .unwrap_or(candidate.signal_date),
            candidate.market_price,
            candidate.market_cap / 1_000_000.0
        ));
    }
    format!(
        "Generate up to {} distinct exit strategies to evaluate against insider-buy signals \
like these:\n{}\nVary take-profit levels, stop-loss levels and holding periods.",
        MAX_SCENARIOS, samples
    )
}

/// Strips leading/trailing markdown code fences the provider may wrap the
/// payload in.
pub fn strip_code_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // Drop the fence line, including any language tag.
        text = match rest.find('\n') {
            Some(idx) => &rest[idx + 1..],
            None => rest,
        };
    }
    if let Some(rest) = text.trim_end().strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

fn parse_scenario_payloads(raw: &str) -> Result<Vec<RawScenarioPayload>> {
    let stripped = strip_code_fences(raw);
    serde_json::from_str::<Vec<RawScenarioPayload>>(stripped)
        .map_err(|err| ReplayError::AuthoringParse(err.to_string()))
}

fn validate_scenarios(payloads: Vec<RawScenarioPayload>) -> Vec<ScenarioDraft> {
    let mut drafts = Vec::new();
    for payload in payloads.into_iter().take(MAX_SCENARIOS) {
        match validate_scenario(payload) {
            Ok(draft) => drafts.push(draft),
            Err(reason) => warn!("Dropping authored scenario: {}", reason),
        }
    }
    drafts
}

fn validate_scenario(payload: RawScenarioPayload) -> std::result::Result<ScenarioDraft, String> {
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err("missing name".to_string());
    }
    if payload.conditions.is_empty() {
        return Err(format!("'{}' has no conditions", name));
    }
    let Some(action) = ExitAction::parse(&payload.action) else {
        return Err(format!("'{}' has unrecognized action '{}'", name, payload.action));
    };

    let mut conditions = Vec::with_capacity(payload.conditions.len());
    for raw in payload.conditions {
        let Some(metric) = ExitMetric::parse(&raw.metric) else {
            return Err(format!("'{}' uses unrecognized metric '{}'", name, raw.metric));
        };
        let Some(comparator) = Comparator::parse(&raw.comparator) else {
            return Err(format!(
                "'{}' uses unrecognized comparator '{}'",
                name, raw.comparator
            ));
        };
        let Some(threshold) = threshold_value(&raw.threshold) else {
            return Err(format!(
                "'{}' carries a non-numeric threshold {}",
                name, raw.threshold
            ));
        };
        conditions.push(ExitCondition {
            metric,
            comparator,
            threshold,
        });
    }

    if !has_required_exit_pair(&conditions) {
        return Err(format!(
            "'{}' lacks a take-profit plus stop-loss or time exit",
            name
        ));
    }

    Ok(ScenarioDraft {
        name,
        description: payload.description.trim().to_string(),
        conditions,
        action,
    })
}

fn threshold_value(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(num) => num.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|value| value.is_finite())
}

/// Every persisted scenario must carry a take-profit (positive
/// price-change threshold) and a downside exit (negative price-change
/// threshold or any days-held condition).
pub fn has_required_exit_pair(conditions: &[ExitCondition]) -> bool {
    let has_take_profit = conditions
        .iter()
        .any(|c| c.metric == ExitMetric::PriceChangePercent && c.threshold > 0.0);
    let has_downside_exit = conditions.iter().any(|c| {
        (c.metric == ExitMetric::PriceChangePercent && c.threshold < 0.0)
            || c.metric == ExitMetric::DaysHeld
    });
    has_take_profit && has_downside_exit
}
