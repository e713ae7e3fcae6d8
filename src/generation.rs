//! Answer generation via chat-completion services.
//!
//! Two wire protocols are supported:
//! - **OpenAI-compatible** `POST {url}/chat/completions` (OpenAI, OpenRouter,
//!   vLLM, llama.cpp server, ...)
//! - **Ollama** `POST {url}/api/chat` with `stream: false`
//!
//! Generators make exactly one request per call. Timeouts around the call
//! are enforced by the pipeline, not here.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::GenerationConfig;

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    /// Complete `prompt` under the given system instruction.
    async fn generate(&self, prompt: &str, system_prompt: &str) -> Result<String>;
}

fn messages(prompt: &str, system_prompt: &str) -> Value {
    json!([
        { "role": "system", "content": system_prompt },
        { "role": "user", "content": prompt },
    ])
}

async fn read_json(response: reqwest::Response, label: &str) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        bail!("{} generation error {}: {}", label, status, text);
    }
    Ok(response.json().await?)
}

// ============ OpenAI-compatible ============

pub struct OpenAICompatGenerator {
    url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAICompatGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            tracing::warn!(
                env = %config.api_key_env,
                "generation API key not set; sending unauthenticated requests"
            );
        }

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client: reqwest::Client::builder().build()?,
        })
    }
}

#[async_trait]
impl Generator for OpenAICompatGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, system_prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": messages(prompt, system_prompt),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let json = read_json(request.send().await?, "OpenAI-compatible").await?;
        parse_openai_completion(&json)
    }
}

fn parse_openai_completion(json: &Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow!("Invalid completion response: missing choices[0].message.content"))
}

// ============ Ollama ============

pub struct OllamaGenerator {
    url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client: reqwest::Client::builder().build()?,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, system_prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": messages(prompt, system_prompt),
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": self.max_tokens,
            },
        });

        let response = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("Ollama connection error (is Ollama running at {}?): {}", self.url, e))?;

        let json = read_json(response, "Ollama").await?;
        json.get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow!("Invalid Ollama response: missing message.content"))
    }
}

pub fn create_generator(config: &GenerationConfig) -> Result<Box<dyn Generator>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAICompatGenerator::new(config)?)),
        "ollama" => Ok(Box::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_openai_completion() {
        let json = json!({
            "choices": [ { "message": { "role": "assistant", "content": "  Answer. \n" } } ]
        });
        assert_eq!(parse_openai_completion(&json).unwrap(), "Answer.");
    }

    #[test]
    fn test_parse_openai_completion_missing_choices() {
        let json = json!({ "error": { "message": "quota" } });
        assert!(parse_openai_completion(&json).is_err());
    }

    #[test]
    fn test_messages_shape() {
        let m = messages("question", "system");
        assert_eq!(m[0]["role"], "system");
        assert_eq!(m[1]["content"], "question");
    }
}
