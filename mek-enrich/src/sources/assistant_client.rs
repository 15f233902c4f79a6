// Language-Model Assistant Client
//
// OpenRouter-compatible chat completions. Models are tried in configured
// order until one returns a reply; the first JSON object in the reply is
// mapped onto canonical fields.

use super::{build_http_client, SourceAdapter, SourceError, SourcePayload};
use crate::error::EnrichError;
use crate::types::{put_list, put_text, CanonicalField, FieldMap, Lookup, SourceKind};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

pub const DEFAULT_MODELS: [&str; 5] = [
    "perplexity/sonar-reasoning",
    "perplexity/sonar-deep-research",
    "perplexity/sonar-reasoning-pro",
    "perplexity/sonar-pro",
    "perplexity/llama-3.1-sonar-large-128k-online",
];

pub const DEFAULT_MAX_TOKENS: u32 = 2048;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Keys requested from the model
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AssistantAnswer {
    synonyms: Vec<String>,
    chemical_classes: Vec<String>,
    description: String,
    molecular_formula: String,
    molecular_weight: Option<Value>,
    biological_roles: Vec<String>,
    common_name: String,
    iupac_name: String,
}

pub struct AssistantClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    models: Vec<String>,
    max_tokens: u32,
}

impl AssistantClient {
    pub fn new(
        api_key: String,
        models: Vec<String>,
        max_tokens: u32,
        endpoint: Option<String>,
        timeout: Duration,
    ) -> Result<Self, EnrichError> {
        if api_key.trim().is_empty() {
            return Err(EnrichError::Config("assistant API key is empty".into()));
        }
        let models = if models.is_empty() {
            DEFAULT_MODELS.iter().map(|m| m.to_string()).collect()
        } else {
            models
        };

        Ok(Self {
            client: build_http_client(timeout)?,
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            models,
            max_tokens,
        })
    }

    /// Try each model in order; the first non-empty reply wins
    async fn complete(&self, prompt: &str) -> Result<String, SourceError> {
        let mut last_error = SourceError::Unavailable("no assistant models configured".into());

        for model in &self.models {
            info!(model = %model, "Querying assistant model");
            let request = ChatRequest {
                model,
                messages: vec![ChatMessage {
                    role: "user",
                    content: prompt,
                }],
                max_tokens: self.max_tokens,
            };

            let result = self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .header("HTTP-Referer", "https://mek-enrich.local")
                .header("X-Title", "MEK Enricher")
                .json(&request)
                .send()
                .await;

            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    warn!(model = %model, error = %e, "Assistant request failed");
                    last_error = e.into();
                    continue;
                }
            };

            if !response.status().is_success() {
                warn!(model = %model, status = %response.status(), "Assistant model returned error");
                last_error = SourceError::from_status(response.status(), "assistant request");
                continue;
            }

            let body: ChatResponse = match response.json().await {
                Ok(body) => body,
                Err(e) => {
                    warn!(model = %model, error = %e, "Assistant reply not decodable");
                    last_error = e.into();
                    continue;
                }
            };

            match body.choices.into_iter().next().and_then(|c| c.message.content) {
                Some(content) if !content.trim().is_empty() => {
                    debug!(model = %model, chars = content.len(), "Assistant reply received");
                    return Ok(content);
                }
                _ => {
                    warn!(model = %model, "Assistant reply had no choices");
                    last_error = SourceError::MalformedResponse(format!("no choices from {}", model));
                }
            }
        }

        Err(last_error)
    }
}

#[async_trait]
impl SourceAdapter for AssistantClient {
    fn kind(&self) -> SourceKind {
        SourceKind::Assistant
    }

    fn accepts(&self, lookup: &Lookup) -> bool {
        lookup.is_name_only() && !lookup.entity_name.trim().is_empty()
    }

    async fn fetch(&self, lookup: &Lookup) -> Result<SourcePayload, SourceError> {
        let prompt = build_prompt(&lookup.entity_name);
        let reply = self.complete(&prompt).await?;
        let fields = parse_reply(&reply)?;
        Ok(SourcePayload::from_fields(fields))
    }
}

/// Prompt asking for a single JSON object with fixed keys
pub fn build_prompt(name: &str) -> String {
    format!(
        r#"Please provide information about the metabolite "{name}" in JSON format.

Include:
1. Alternative names and synonyms
2. Chemical classification (super class, class, sub class)
3. Biological description and function
4. Molecular formula and molecular weight if available
5. Metabolic pathways or biological roles

Respond with one JSON object using exactly these keys:
{{
  "synonyms": [],
  "chemical_classes": [],
  "description": "",
  "molecular_formula": "",
  "molecular_weight": "",
  "biological_roles": [],
  "common_name": "",
  "iupac_name": ""
}}

Use empty strings or empty arrays for anything unknown."#
    )
}

fn json_object_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("static regex"))
}

/// Map the first JSON object in a free-text reply onto canonical fields
pub fn parse_reply(reply: &str) -> Result<FieldMap, SourceError> {
    let block = json_object_pattern()
        .find(reply)
        .map(|m| m.as_str())
        .ok_or_else(|| SourceError::MalformedResponse("no JSON object in assistant reply".into()))?;

    let answer: AssistantAnswer = match serde_json::from_str(block) {
        Ok(answer) => answer,
        // Raw newlines inside string literals are a common model mistake
        Err(_) => serde_json::from_str(&block.replace(['\n', '\r'], " "))?,
    };

    let mut fields = FieldMap::new();
    put_list(&mut fields, CanonicalField::Synonyms, answer.synonyms);
    put_list(&mut fields, CanonicalField::ChemicalClasses, answer.chemical_classes);
    put_list(&mut fields, CanonicalField::BiologicalRoles, answer.biological_roles);
    put_text(&mut fields, CanonicalField::Description, answer.description);
    put_text(&mut fields, CanonicalField::Formula, answer.molecular_formula);
    put_text(&mut fields, CanonicalField::CommonName, answer.common_name);
    put_text(&mut fields, CanonicalField::IupacName, answer.iupac_name);
    match answer.molecular_weight {
        Some(Value::String(weight)) => put_text(&mut fields, CanonicalField::MolecularWeight, weight),
        Some(Value::Number(weight)) => {
            put_text(&mut fields, CanonicalField::MolecularWeight, weight.to_string())
        }
        _ => {}
    }

    Ok(fields)
}
