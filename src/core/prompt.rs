//! Prompt variants accepted by a Security Copilot session

use super::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::fmt;
use std::str::FromStr;

/// Wire-level prompt type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
pub enum PromptKind {
    /// Freeform natural-language prompt
    #[default]
    Prompt,
    /// Direct invocation of a named skill
    Skill,
}

impl FromStr for PromptKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Prompt" => Ok(PromptKind::Prompt),
            "Skill" => Ok(PromptKind::Skill),
            _ => Err(BridgeError::InvalidArgument(format!(
                "prompt_type must be either 'Prompt' or 'Skill', got '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptKind::Prompt => write!(f, "Prompt"),
            PromptKind::Skill => write!(f, "Skill"),
        }
    }
}

/// A validated unit of work for a session
#[derive(Debug, Clone, PartialEq)]
pub enum Prompt {
    Freeform {
        content: String,
    },
    Skill {
        skill_name: String,
        inputs: Map<String, JsonValue>,
    },
}

impl Prompt {
    /// Validate loose tool arguments into a prompt.
    ///
    /// Only the fields relevant to `kind` are inspected; extra fields are ignored.
    pub fn from_parts(
        kind: &str,
        content: Option<String>,
        skill_name: Option<String>,
        inputs: Option<Map<String, JsonValue>>,
    ) -> Result<Self> {
        match kind.parse::<PromptKind>()? {
            PromptKind::Prompt => {
                let content = content.filter(|c| !c.is_empty()).ok_or_else(|| {
                    BridgeError::InvalidArgument(
                        "content is required for prompt_type 'Prompt'".to_string(),
                    )
                })?;
                Ok(Prompt::Freeform { content })
            }
            PromptKind::Skill => {
                let skill_name = skill_name.filter(|s| !s.is_empty()).ok_or_else(|| {
                    BridgeError::InvalidArgument(
                        "skill_name is required for prompt_type 'Skill'".to_string(),
                    )
                })?;
                Ok(Prompt::Skill {
                    skill_name,
                    inputs: inputs.unwrap_or_default(),
                })
            }
        }
    }

    pub fn freeform(content: impl Into<String>) -> Self {
        Prompt::Freeform {
            content: content.into(),
        }
    }

    pub fn skill(skill_name: impl Into<String>, inputs: Map<String, JsonValue>) -> Self {
        Prompt::Skill {
            skill_name: skill_name.into(),
            inputs,
        }
    }

    pub fn kind(&self) -> PromptKind {
        match self {
            Prompt::Freeform { .. } => PromptKind::Prompt,
            Prompt::Skill { .. } => PromptKind::Skill,
        }
    }

    /// Request body for `POST /sessions/{id}/prompts`
    pub fn to_payload(&self) -> JsonValue {
        match self {
            Prompt::Freeform { content } => json!({
                "PromptType": PromptKind::Prompt.to_string(),
                "Content": content,
            }),
            Prompt::Skill { skill_name, inputs } => json!({
                "PromptType": PromptKind::Skill.to_string(),
                "SkillName": skill_name,
                "Inputs": inputs,
            }),
        }
    }
}
