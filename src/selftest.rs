//! Smoke checks against the configured services
//!
//! Run by `copilot-bridge self-test` and by `server --run-tests` before serving.

use crate::context::BridgeContext;
use crate::copilot::evaluation::{PollSettings, DEFAULT_SESSION_NAME};
use crate::core::{Prompt, ResultEnvelope};
use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};
use tracing::{info, warn};

pub const SENTINEL_TEST_QUERY: &str = "Usage | project DataType | take 10";
pub const PROMPT_TEST_CONTENT: &str =
    "What is the most common alert type in defender for the last 24 hours?";
pub const SKILL_TEST_NAME: &str = "GetAbnormalSignIns";
pub const SKILLSET_TEST_FILTER: &str = "Entra";

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SmokeReport {
    pub checks: Vec<CheckResult>,
}

impl SmokeReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> usize {
        self.checks.iter().filter(|c| !c.passed).count()
    }

    fn record(&mut self, name: &'static str, passed: bool, detail: String) {
        if passed {
            info!("{} check passed", name);
        } else {
            warn!("{} check failed: {}", name, detail);
        }
        self.checks.push(CheckResult {
            name,
            passed,
            detail,
        });
    }
}

fn skill_test_inputs() -> Map<String, JsonValue> {
    let inputs = json!({
        "UniquePropertiesThreshold": "3",
        "Period": "24h",
        "Limit": "10"
    });
    match inputs {
        JsonValue::Object(map) => map,
        _ => Map::new(),
    }
}

/// Run every check; individual failures are recorded, never propagated
pub async fn run_smoke_checks(context: &BridgeContext, poll: PollSettings) -> SmokeReport {
    let mut report = SmokeReport::default();

    info!("Running Sentinel check");
    let envelope = context.run_sentinel_query(SENTINEL_TEST_QUERY).await;
    let detail = match &envelope {
        ResultEnvelope::Success { result, .. } => format!("{} records", result.len()),
        ResultEnvelope::Error { error } => error.message.clone(),
    };
    report.record("sentinel_query", envelope.is_success(), detail);

    info!("Running Security Copilot prompt check");
    let prompt = Prompt::freeform(PROMPT_TEST_CONTENT);
    match context.run_prompt(&prompt, DEFAULT_SESSION_NAME, poll).await {
        Ok(outcome) => report.record(
            "copilot_prompt",
            true,
            format!("evaluation {}", outcome.evaluation_id),
        ),
        Err(e) => report.record("copilot_prompt", false, e.to_string()),
    }

    info!("Running Security Copilot skill check");
    let skill = Prompt::skill(SKILL_TEST_NAME, skill_test_inputs());
    match context.run_prompt(&skill, DEFAULT_SESSION_NAME, poll).await {
        Ok(outcome) => report.record(
            "copilot_skill",
            true,
            format!("evaluation {}", outcome.evaluation_id),
        ),
        Err(e) => report.record("copilot_skill", false, e.to_string()),
    }

    info!("Running Security Copilot skillsets check");
    match context.get_skillsets(Some(SKILLSET_TEST_FILTER), false).await {
        Ok(listing) => report.record(
            "copilot_skillsets",
            listing.count > 0,
            format!("{} skillsets matching '{}'", listing.count, SKILLSET_TEST_FILTER),
        ),
        Err(e) => report.record("copilot_skillsets", false, e.to_string()),
    }

    report
}
