//! Skillset listing and upload
//!
//! Skillsets are keyed by name. Upload is idempotent on that name: an existing skillset
//! is replaced in place, a missing one is created only when the caller allows it.

use super::CopilotClient;
use crate::core::{BridgeError, Result};
use crate::http::read_json;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, error, info, warn};

const YAML_CONTENT_TYPE: &str = "application/yaml";
const UPLOAD_QUERY: [(&str, &str); 2] = [("scope", "Tenant"), ("skillsetFormat", "SkillsetYaml")];

/// A skillset as listed by the service; fields other than `name` pass through untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skillset {
    pub name: String,
    #[serde(flatten)]
    pub details: Map<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<JsonValue>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillsetListing {
    pub count: usize,
    pub skillsets: Vec<Skillset>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Updated,
    Created,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub status: UploadStatus,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct SkillsetDefinition {
    #[serde(rename = "Descriptor")]
    descriptor: Option<Descriptor>,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    #[serde(rename = "Name")]
    name: Option<String>,
}

/// Extract `Descriptor.Name` from a skillset YAML definition.
///
/// The name is returned as written; it is the key matched against existing skillsets.
pub fn parse_definition(yaml: &str) -> Result<String> {
    let definition: SkillsetDefinition = serde_yaml::from_str(yaml)
        .map_err(|e| BridgeError::Parse(format!("Invalid skillset YAML: {}", e)))?;

    let descriptor = definition.descriptor.ok_or_else(|| {
        BridgeError::Parse("Skillset YAML has no Descriptor section".to_string())
    })?;

    descriptor
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| BridgeError::Parse("Skillset name not found in YAML".to_string()))
}

fn value_array(response: JsonValue, operation: &str) -> Result<Vec<JsonValue>> {
    match response {
        JsonValue::Object(mut body) => match body.remove("value") {
            Some(JsonValue::Array(items)) => Ok(items),
            None | Some(JsonValue::Null) => Ok(Vec::new()),
            Some(_) => Err(BridgeError::MalformedResponse(format!(
                "{}: 'value' is not an array",
                operation
            ))),
        },
        JsonValue::Null => Ok(Vec::new()),
        _ => Err(BridgeError::MalformedResponse(format!(
            "{}: expected a JSON object",
            operation
        ))),
    }
}

fn matches_filter(name: &str, filter: Option<&str>) -> bool {
    match filter {
        Some(f) if !f.is_empty() => name.to_lowercase().contains(&f.to_lowercase()),
        _ => true,
    }
}

impl CopilotClient {
    /// Raw skillset list, unfiltered and without skills
    pub async fn fetch_skillsets(&self) -> Result<Vec<Skillset>> {
        let url = self.skillsets_url(&[])?;
        let response = self.get_json(url, "getting skillsets").await?;

        let skillsets = value_array(response, "getting skillsets")?
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<Skillset>(item) {
                Ok(skillset) => Some(skillset),
                Err(e) => {
                    warn!("Skipping unexpected skillset record: {}", e);
                    None
                }
            })
            .collect();
        Ok(skillsets)
    }

    pub async fn fetch_skills(&self, skillset_name: &str) -> Result<Vec<JsonValue>> {
        let url = self.skillsets_url(&[skillset_name, "skills"])?;
        let response = self.get_json(url, "getting skills").await?;
        value_array(response, "getting skills")
    }

    /// List skillsets whose name contains `filter` (case-insensitive).
    ///
    /// With `expand`, each retained skillset carries its skills; a skillset whose skills
    /// cannot be fetched gets an empty list instead of failing the listing.
    pub async fn list_skillsets(&self, filter: Option<&str>, expand: bool) -> Result<SkillsetListing> {
        info!("Retrieving skillsets from Security Copilot");
        let mut skillsets: Vec<Skillset> = self
            .fetch_skillsets()
            .await?
            .into_iter()
            .filter(|s| matches_filter(&s.name, filter))
            .collect();

        if let Some(f) = filter {
            debug!("Filtered to {} skillsets matching '{}'", skillsets.len(), f);
        }

        if expand {
            for skillset in &mut skillsets {
                let skills = match self.fetch_skills(&skillset.name).await {
                    Ok(skills) => skills,
                    Err(e) => {
                        warn!("Failed to get skills for skillset {}: {}", skillset.name, e);
                        Vec::new()
                    }
                };
                skillset.skills = Some(skills);
            }
        }

        info!("Retrieved {} skillsets", skillsets.len());
        Ok(SkillsetListing {
            count: skillsets.len(),
            skillsets,
        })
    }

    /// Create or update a skillset from its YAML definition
    pub async fn upload_skillset(&self, yaml: &str, create_if_missing: bool) -> Result<UploadOutcome> {
        let name = parse_definition(yaml)?;
        info!("Uploading skillset: {}", name);

        let exists = self.fetch_skillsets().await?.iter().any(|s| s.name == name);

        let (method, url, status) = if exists {
            info!("Skillset {} exists, updating", name);
            (
                Method::PUT,
                self.skillsets_url(&[name.as_str()])?,
                UploadStatus::Updated,
            )
        } else if create_if_missing {
            info!("Skillset {} does not exist, creating", name);
            (Method::POST, self.skillsets_url(&[])?, UploadStatus::Created)
        } else {
            info!("Skillset {} does not exist and create_if_missing is false", name);
            return Ok(UploadOutcome {
                status: UploadStatus::NotFound,
                name,
                response: None,
            });
        };

        debug!("{} request to: {}", method, url);
        let response = self
            .authorized(method, url, YAML_CONTENT_TYPE)
            .await?
            .query(&UPLOAD_QUERY)
            .body(yaml.to_string())
            .send()
            .await?;

        let body = read_json(response, "uploading skillset").await.map_err(|e| {
            error!("Skillset {} upload failed: {}", name, e);
            e
        })?;

        info!("Skillset {} {:?} successfully", name, status);
        Ok(UploadOutcome {
            status,
            name,
            response: Some(body),
        })
    }
}
