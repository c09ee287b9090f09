//! Prompt evaluation workflow
//!
//! Drives one prompt through Security Copilot:
//!
//! ```text
//! NoSession → SessionCreated → PromptCreated → EvaluationCreated → Polling → Completed
//!                                                                         ↘ TimedOut
//! ```
//!
//! Session, prompt and evaluation creation are single-shot: any failure aborts the
//! workflow and nothing created so far is cleaned up. Polling is bounded by an attempt
//! counter; transport errors while polling consume an attempt and are otherwise
//! ignored. Only the `"Completed"` state ends polling early.

use crate::core::{
    BridgeError, EvaluationId, EvaluationRecord, Prompt, PromptId, Result, SessionId,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_SESSION_NAME: &str = "Security Copilot Session";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;

/// The Security Copilot calls the workflow depends on
///
/// Creation calls return the raw response body; the workflow extracts identifiers
/// itself so a response without one is reported uniformly.
#[async_trait]
pub trait EvaluationApi: Send + Sync {
    async fn create_session(&self, name: &str) -> Result<JsonValue>;

    async fn create_prompt(&self, session_id: &SessionId, prompt: &Prompt) -> Result<JsonValue>;

    async fn create_evaluation(
        &self,
        session_id: &SessionId,
        prompt_id: &PromptId,
    ) -> Result<JsonValue>;

    async fn get_evaluation(
        &self,
        session_id: &SessionId,
        prompt_id: &PromptId,
        evaluation_id: &EvaluationId,
    ) -> Result<EvaluationRecord>;
}

/// Polling cadence and bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        PollSettings {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowState {
    NoSession,
    SessionCreated,
    PromptCreated,
    EvaluationCreated,
    Polling,
    Completed,
    TimedOut,
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkflowState::NoSession => "NoSession",
            WorkflowState::SessionCreated => "SessionCreated",
            WorkflowState::PromptCreated => "PromptCreated",
            WorkflowState::EvaluationCreated => "EvaluationCreated",
            WorkflowState::Polling => "Polling",
            WorkflowState::Completed => "Completed",
            WorkflowState::TimedOut => "TimedOut",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    Completed,
    TimedOut,
}

/// Result of polling: the record to report and how polling ended
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub record: EvaluationRecord,
    pub attempts: u32,
    pub status: PollStatus,
}

/// Everything produced by one workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub session_id: SessionId,
    pub prompt_id: PromptId,
    pub evaluation_id: EvaluationId,
    pub result: EvaluationRecord,
}

fn require_id(response: &JsonValue, pointer: &str, what: &str) -> Result<String> {
    match response.pointer(pointer).and_then(|v| v.as_str()) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => {
            error!("Failed to create {}. No {} in response.", what, pointer);
            debug!("{} response: {}", what, response);
            Err(BridgeError::MalformedResponse(format!(
                "Failed to create {}. No {} in response.",
                what,
                pointer.trim_start_matches('/')
            )))
        }
    }
}

pub async fn create_session<A: EvaluationApi + ?Sized>(api: &A, name: &str) -> Result<SessionId> {
    let response = api.create_session(name).await?;
    let id = require_id(&response, "/sessionId", "session")?;
    debug!("Session created with ID: {}", id);
    Ok(SessionId::from(id))
}

pub async fn create_prompt<A: EvaluationApi + ?Sized>(
    api: &A,
    session_id: &SessionId,
    prompt: &Prompt,
) -> Result<PromptId> {
    info!("Creating prompt with type: {}", prompt.kind());
    let response = api.create_prompt(session_id, prompt).await?;
    let id = require_id(&response, "/promptId", "prompt")?;
    info!("Prompt created successfully with ID: {}", id);
    Ok(PromptId::from(id))
}

pub async fn create_evaluation<A: EvaluationApi + ?Sized>(
    api: &A,
    session_id: &SessionId,
    prompt_id: &PromptId,
) -> Result<EvaluationId> {
    info!("Creating evaluation for prompt_id: {}", prompt_id);
    let response = api.create_evaluation(session_id, prompt_id).await?;
    let id = require_id(&response, "/evaluation/evaluationId", "evaluation")?;
    info!("Evaluation created successfully with ID: {}", id);
    Ok(EvaluationId::from(id))
}

/// Poll an evaluation until it completes or `max_attempts` fetches were made.
///
/// Exhausting the attempts is not an error: the last record fetched is returned
/// with `PollStatus::TimedOut`. Only when no fetch succeeded at all does this fail
/// with `NoEvaluationData`.
pub async fn poll_evaluation<A: EvaluationApi + ?Sized>(
    api: &A,
    session_id: &SessionId,
    prompt_id: &PromptId,
    evaluation_id: &EvaluationId,
    settings: PollSettings,
) -> Result<PollOutcome> {
    info!("Polling evaluation ID: {}", evaluation_id);
    debug!(
        "Polling interval: {:?}, max attempts: {}",
        settings.interval, settings.max_attempts
    );

    let mut last_record: Option<EvaluationRecord> = None;

    for attempt in 1..=settings.max_attempts {
        debug!("Polling attempt {}/{}", attempt, settings.max_attempts);

        match api
            .get_evaluation(session_id, prompt_id, evaluation_id)
            .await
        {
            Ok(record) => {
                debug!("Current evaluation state: {:?}", record.state());
                if record.is_completed() {
                    info!("Evaluation completed after {} polling attempts", attempt);
                    return Ok(PollOutcome {
                        record,
                        attempts: attempt,
                        status: PollStatus::Completed,
                    });
                }
                last_record = Some(record);
            }
            Err(e) => {
                error!("Error during polling: {}", e);
            }
        }

        if attempt < settings.max_attempts {
            tokio::time::sleep(settings.interval).await;
        }
    }

    warn!(
        "Max polling attempts ({}) reached without completion",
        settings.max_attempts
    );

    match last_record {
        Some(record) => Ok(PollOutcome {
            record,
            attempts: settings.max_attempts,
            status: PollStatus::TimedOut,
        }),
        None => Err(BridgeError::NoEvaluationData {
            attempts: settings.max_attempts,
        }),
    }
}

/// One prompt evaluation; create a new instance per invocation
pub struct EvaluationWorkflow<'a, A: EvaluationApi + ?Sized> {
    api: &'a A,
    poll: PollSettings,
    state: WorkflowState,
}

impl<'a, A: EvaluationApi + ?Sized> EvaluationWorkflow<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self::with_poll_settings(api, PollSettings::default())
    }

    pub fn with_poll_settings(api: &'a A, poll: PollSettings) -> Self {
        EvaluationWorkflow {
            api,
            poll,
            state: WorkflowState::NoSession,
        }
    }

    /// Last state reached; after a failure this is where the workflow stopped
    pub fn state(&self) -> WorkflowState {
        self.state
    }

    fn advance(&mut self, next: WorkflowState) {
        debug!("Workflow state {} -> {}", self.state, next);
        self.state = next;
    }

    /// Run every step in order, stopping at the first fatal error
    pub async fn run(&mut self, prompt: &Prompt, session_name: &str) -> Result<RunOutcome> {
        if self.state != WorkflowState::NoSession {
            return Err(BridgeError::InvalidArgument(format!(
                "workflow already ran (state {})",
                self.state
            )));
        }

        info!(
            "Processing {} with session name: {}",
            prompt.kind(),
            session_name
        );
        if let Prompt::Skill { skill_name, inputs } = prompt {
            info!("Skill name: {}", skill_name);
            debug!("Skill inputs: {:?}", inputs);
        }

        let session_id = create_session(self.api, session_name).await?;
        self.advance(WorkflowState::SessionCreated);

        let prompt_id = create_prompt(self.api, &session_id, prompt).await?;
        self.advance(WorkflowState::PromptCreated);

        let evaluation_id = create_evaluation(self.api, &session_id, &prompt_id).await?;
        self.advance(WorkflowState::EvaluationCreated);

        self.advance(WorkflowState::Polling);
        let outcome =
            poll_evaluation(self.api, &session_id, &prompt_id, &evaluation_id, self.poll).await?;

        self.advance(match outcome.status {
            PollStatus::Completed => WorkflowState::Completed,
            PollStatus::TimedOut => WorkflowState::TimedOut,
        });
        info!("Prompt processing finished in state {}", self.state);

        Ok(RunOutcome {
            session_id,
            prompt_id,
            evaluation_id,
            result: outcome.record,
        })
    }
}
