//! Ollama-backed agent client.
//!
//! Each capability is a single non-streaming `/api/chat` call with
//! `format: "json"`. The JSON answer is parsed into the capability's output
//! struct; anything that does not parse is reported as malformed so the
//! retry policy can ask again in strict mode, this time with the JSON
//! schema of the expected output attached to the prompt.

use crate::agent::capability::{
    AgentClient, AgentOutput, AgentRequest, EvaluationOutput, ExtractionOutput, PlanOutput,
    SynthesisOutput,
};
use crate::config::ModelConfig;
use crate::error::AgentError;
use anyhow::Context;
use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Longest source excerpt sent for extraction, in characters.
const MAX_SOURCE_CHARS: usize = 6000;

/// Message in the chat history.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Ollama chat API request.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    format: &'static str,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Ollama chat API response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Agent client talking to an Ollama server.
pub struct OllamaAgent {
    http_client: reqwest::Client,
    ollama_url: String,
    model_name: String,
    temperature: f32,
    timeout_seconds: u64,
}

impl OllamaAgent {
    pub fn new(config: &ModelConfig) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            ollama_url: config.ollama_url.trim_end_matches('/').to_string(),
            model_name: config.name.clone(),
            temperature: config.temperature,
            timeout_seconds: config.timeout_seconds,
        })
    }

    /// Send one system + user exchange and return the raw assistant content.
    async fn chat(&self, system: &str, user: String) -> Result<String, AgentError> {
        let url = format!("{}/api/chat", self.ollama_url);

        let request = OllamaChatRequest {
            model: self.model_name.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user,
                },
            ],
            stream: false,
            format: "json",
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AgentError::Unavailable(format!(
                        "request timed out after {}s",
                        self.timeout_seconds
                    ))
                } else if e.is_connect() {
                    AgentError::Unavailable(format!(
                        "cannot connect to Ollama at {}",
                        self.ollama_url
                    ))
                } else {
                    AgentError::Unavailable(format!("failed to send request: {}", e))
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AgentError::RateLimited(format!("Ollama returned {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Unavailable(format!(
                "Ollama API error {}: {}",
                status, body
            )));
        }

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| AgentError::MalformedOutput(format!("unreadable Ollama response: {}", e)))?;

        Ok(chat_response.message.content)
    }
}

#[async_trait]
impl AgentClient for OllamaAgent {
    async fn invoke(&self, request: &AgentRequest, strict: bool) -> Result<AgentOutput, AgentError> {
        debug!(
            "Invoking {} capability on {} (strict: {})",
            request.capability(),
            self.model_name,
            strict
        );

        match request {
            AgentRequest::Plan(_) => {
                let prompt = with_schema::<PlanOutput>(build_user_prompt(request), strict);
                let content = self.chat(PLANNER_SYSTEM_PROMPT, prompt).await?;
                parse_json::<PlanOutput>(&content).map(AgentOutput::Plan)
            }
            AgentRequest::Extract(_) => {
                let prompt = with_schema::<ExtractionOutput>(build_user_prompt(request), strict);
                let content = self.chat(EXTRACTOR_SYSTEM_PROMPT, prompt).await?;
                parse_json::<ExtractionOutput>(&content).map(AgentOutput::Extraction)
            }
            AgentRequest::Evaluate(_) => {
                let prompt = with_schema::<EvaluationOutput>(build_user_prompt(request), strict);
                let content = self.chat(EVALUATOR_SYSTEM_PROMPT, prompt).await?;
                parse_json::<EvaluationOutput>(&content).map(AgentOutput::Evaluation)
            }
            AgentRequest::Synthesize(_) => {
                let prompt = with_schema::<SynthesisOutput>(build_user_prompt(request), strict);
                let content = self.chat(SYNTHESIZER_SYSTEM_PROMPT, prompt).await?;
                parse_json::<SynthesisOutput>(&content).map(AgentOutput::Synthesis)
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Render the capability-specific user prompt.
fn build_user_prompt(request: &AgentRequest) -> String {
    let mut prompt = String::new();

    match request {
        AgentRequest::Plan(plan) => {
            prompt.push_str(&format!("Research query: {}\n\n", plan.query));
            prompt.push_str(&format!(
                "Break the query into at most {} distinct, non-overlapping sub-questions.\n",
                plan.max_sub_questions
            ));
            if !plan.answered.is_empty() {
                prompt.push_str("\nAlready researched (do not repeat):\n");
                for q in &plan.answered {
                    prompt.push_str(&format!("- {}\n", q));
                }
            }
            if !plan.gaps.is_empty() {
                prompt.push_str("\nTarget only these coverage gaps:\n");
                for gap in &plan.gaps {
                    prompt.push_str(&format!("- {}\n", gap));
                }
            }
            if !plan.evidence_digest.is_empty() {
                prompt.push_str("\nEvidence gathered so far:\n");
                for line in &plan.evidence_digest {
                    prompt.push_str(&format!("- {}\n", line));
                }
            }
            prompt.push_str(
                "\nRespond with JSON: {\"sub_questions\": [{\"question\": \"...\", \"angle\": \"...\"}]}",
            );
        }
        AgentRequest::Extract(extract) => {
            let content: String = extract.source_content.chars().take(MAX_SOURCE_CHARS).collect();
            prompt.push_str(&format!("Research query: {}\n", extract.query));
            prompt.push_str(&format!("Sub-question: {}\n\n", extract.sub_question));
            prompt.push_str(&format!(
                "### SOURCE: {} ({})\n```\n{}\n```\n\n",
                extract.source_title, extract.source_url, content
            ));
            prompt.push_str(
                "Extract only claims this source actually supports that help answer the sub-question.\n",
            );
            prompt.push_str(
                "Respond with JSON: {\"findings\": [{\"claim\": \"...\", \"confidence\": 0.0}]}",
            );
        }
        AgentRequest::Evaluate(evaluate) => {
            prompt.push_str(&format!("Research query: {}\n", evaluate.query));
            prompt.push_str(&format!("Iteration: {}\n\n", evaluate.iteration));
            prompt.push_str("Sub-questions researched:\n");
            for q in &evaluate.sub_questions {
                prompt.push_str(&format!("- {}\n", q));
            }
            prompt.push_str("\nEvidence:\n");
            for line in &evaluate.evidence_digest {
                prompt.push_str(&format!("- {}\n", line));
            }
            prompt.push_str(
                "\nDoes the evidence cover the topics the query implies? \
                 Respond with JSON: {\"sufficient\": true, \"gaps\": [\"...\"]}",
            );
        }
        AgentRequest::Synthesize(synthesize) => {
            prompt.push_str(&format!("Research query: {}\n\n", synthesize.query));
            for section in &synthesize.sections {
                prompt.push_str(&format!("## {}\n", section.heading));
                for claim in &section.claims {
                    prompt.push_str(&format!("- [{}] {}\n", claim.citation, claim.claim));
                }
                prompt.push('\n');
            }
            if !synthesize.disagreements.is_empty() {
                prompt.push_str("Disagreements to surface, not resolve:\n");
                for d in &synthesize.disagreements {
                    prompt.push_str(&format!("- {}\n", d));
                }
                prompt.push('\n');
            }
            prompt.push_str(
                "Write a title and one summary per section. Cite only the bracketed keys above.\n\
                 Respond with JSON: {\"title\": \"...\", \"sections\": [{\"heading\": \"...\", \
                 \"summary\": \"...\", \"citations\": [\"...\"]}]}",
            );
        }
    }

    prompt
}

/// Attach the JSON schema of `T` when retrying in strict mode.
fn with_schema<T: JsonSchema>(mut prompt: String, strict: bool) -> String {
    if strict {
        let schema = schema_for!(T);
        let schema_json = serde_json::to_string_pretty(&schema).unwrap_or_default();
        prompt.push_str("\n\nYour previous answer did not match the required format. ");
        prompt.push_str("Output ONLY a JSON object that validates against this schema:\n");
        prompt.push_str(&schema_json);
    }
    prompt
}

/// Parse model output as `T`, tolerating a surrounding markdown code fence.
fn parse_json<T: DeserializeOwned>(content: &str) -> Result<T, AgentError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end().trim_end_matches("```").trim())
        .unwrap_or(trimmed);

    serde_json::from_str(body).map_err(|e| {
        let preview: String = body.chars().take(120).collect();
        AgentError::MalformedOutput(format!("{} in: {}", e, preview))
    })
}

const PLANNER_SYSTEM_PROMPT: &str = r#"You are a research planner.
Split a research query into distinct, non-overlapping sub-questions, each covering one angle.
Only output valid JSON, no explanations or markdown."#;

const EXTRACTOR_SYSTEM_PROMPT: &str = r#"You are a careful research reader.
Extract factual claims from the given source that answer the sub-question.
Never add information that is not in the source. Only output valid JSON."#;

const EVALUATOR_SYSTEM_PROMPT: &str = r#"You are a research reviewer.
Judge whether the gathered evidence covers the sub-topics implied by the query and list what is missing.
Only output valid JSON."#;

const SYNTHESIZER_SYSTEM_PROMPT: &str = r#"You are a research writer.
Summarize the provided evidence section by section. Cite claims with their bracketed keys.
Report disagreements as disagreements. Only output valid JSON."#;
