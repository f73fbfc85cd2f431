//! Chat/completion clients for the language model backends.
//!
//! Both adapters talk HTTP directly through `reqwest`: Ollama via `/api/generate` and
//! OpenAI-compatible servers via `/chat/completions`. Every pipeline collaborator that needs a
//! model (generation, topic classification, grading, guard judges) goes through [`LlmClient`].

use crate::config::{Config, Provider};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced while calling a language model.
#[derive(Debug, Error)]
pub enum LlmClientError {
    /// Provider was unreachable or not serving the endpoint.
    #[error("Language model provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate completion: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
    /// Client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

/// One completion request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionRequest {
    /// Optional system instructions.
    pub system: Option<String>,
    /// User prompt.
    pub prompt: String,
    /// Ask the provider to constrain the answer to a JSON object.
    pub json: bool,
}

impl CompletionRequest {
    /// Plain prompt without system instructions.
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Prompt with system instructions.
    pub fn with_system(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            prompt: prompt.into(),
            json: false,
        }
    }

    /// Request a JSON-object answer.
    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }
}

/// Interface implemented by language model backends.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Produce a completion for `request`.
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmClientError>;
}

/// Sampling parameters shared by every call.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// Model identifier understood by the provider.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
}

/// Build the language model client selected by configuration.
pub fn build_llm_client(config: &Config) -> Result<Arc<dyn LlmClient>, LlmClientError> {
    let settings = ModelSettings {
        model: config.llm_model.clone(),
        temperature: config.llm_temperature,
        max_tokens: config.llm_max_tokens,
    };
    tracing::info!(
        provider = ?config.llm_provider,
        model = %settings.model,
        temperature = settings.temperature,
        max_tokens = settings.max_tokens,
        "Initializing language model client"
    );
    let client: Arc<dyn LlmClient> = match config.llm_provider {
        Provider::Ollama => Arc::new(OllamaClient::new(config.ollama_url.clone(), settings)?),
        Provider::OpenAI => {
            let api_key = config
                .openai_api_key
                .clone()
                .ok_or_else(|| LlmClientError::Client("OPENAI_API_KEY is not set".into()))?;
            Arc::new(OpenAiClient::new(
                config.openai_base_url.clone(),
                api_key,
                settings,
            )?)
        }
    };
    Ok(client)
}

pub(crate) fn http_client(user_agent: &str) -> Result<Client, String> {
    Client::builder()
        .user_agent(user_agent)
        .build()
        .map_err(|error| error.to_string())
}

/// Client for a local Ollama runtime.
pub struct OllamaClient {
    http: Client,
    base_url: String,
    settings: ModelSettings,
}

impl OllamaClient {
    /// Create a client for the Ollama runtime at `base_url`.
    pub fn new(base_url: String, settings: ModelSettings) -> Result<Self, LlmClientError> {
        let http = http_client("support-graph/llm").map_err(LlmClientError::Client)?;
        Ok(Self {
            http,
            base_url,
            settings,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmClientError> {
        let mut payload = json!({
            "model": self.settings.model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": self.settings.temperature,
                "num_predict": self.settings.max_tokens,
            }
        });
        if let Some(object) = payload.as_object_mut() {
            if let Some(system) = request.system {
                object.insert("system".into(), Value::String(system));
            }
            if request.json {
                object.insert("format".into(), Value::String("json".into()));
            }
        }

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                LlmClientError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(LlmClientError::ProviderUnavailable(format!(
                "Ollama endpoint {} returned 404",
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmClientError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaResponse = response.json().await.map_err(|error| {
            LlmClientError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;

        if !body.done {
            return Err(LlmClientError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.response.trim().to_string())
    }
}

/// Client for OpenAI-compatible chat completion APIs.
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: String,
    settings: ModelSettings,
}

impl OpenAiClient {
    /// Create a client for the API rooted at `base_url` (for example `https://api.openai.com/v1`).
    pub fn new(
        base_url: String,
        api_key: String,
        settings: ModelSettings,
    ) -> Result<Self, LlmClientError> {
        let http = http_client("support-graph/llm").map_err(LlmClientError::Client)?;
        Ok(Self {
            http,
            base_url,
            api_key,
            settings,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmClientError> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt }));

        let mut payload = json!({
            "model": self.settings.model,
            "messages": messages,
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
        });
        if request.json
            && let Some(object) = payload.as_object_mut()
        {
            object.insert(
                "response_format".into(),
                json!({ "type": "json_object" }),
            );
        }

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                LlmClientError::ProviderUnavailable(format!(
                    "failed to reach {}: {error}",
                    self.base_url
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmClientError::GenerationFailed(format!(
                "provider returned {status}: {body}"
            )));
        }

        let body: ChatCompletionResponse = response.json().await.map_err(|error| {
            LlmClientError::InvalidResponse(format!("failed to decode completion: {error}"))
        })?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| LlmClientError::InvalidResponse("completion has no content".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn settings() -> ModelSettings {
        ModelSettings {
            model: "llama3.2:1b".into(),
            temperature: 0.0,
            max_tokens: 100,
        }
    }

    #[tokio::test]
    async fn ollama_client_sends_options_and_system_prompt() {
        let server = MockServer::start_async().await;
        let client = OllamaClient::new(server.base_url(), settings()).expect("client");

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .json_body_partial(
                        r#"{"model":"llama3.2:1b","system":"be brief","format":"json","options":{"num_predict":100}}"#,
                    );
                then.status(200).json_body(json!({
                    "response": " {\"score\":\"Yes\"} ",
                    "done": true
                }));
            })
            .await;

        let text = client
            .complete(CompletionRequest::with_system("be brief", "hello").json())
            .await
            .expect("completion");

        mock.assert();
        assert_eq!(text, "{\"score\":\"Yes\"}");
    }

    #[tokio::test]
    async fn ollama_client_handles_error_status() {
        let server = MockServer::start_async().await;
        let client = OllamaClient::new(server.base_url(), settings()).expect("client");

        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(500).body("boom");
            })
            .await;

        let error = client
            .complete(CompletionRequest::prompt("hello"))
            .await
            .expect_err("error response");

        assert!(
            matches!(error, LlmClientError::GenerationFailed(ref message) if message.contains("500"))
        );
    }

    #[tokio::test]
    async fn ollama_client_maps_missing_endpoint_to_unavailable() {
        let server = MockServer::start_async().await;
        let client = OllamaClient::new(server.base_url(), settings()).expect("client");

        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(404);
            })
            .await;

        let error = client
            .complete(CompletionRequest::prompt("hello"))
            .await
            .expect_err("404");
        assert!(matches!(error, LlmClientError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn openai_client_reads_first_choice() {
        let server = MockServer::start_async().await;
        let client =
            OpenAiClient::new(server.base_url(), "sk-test".into(), settings()).expect("client");

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .header("authorization", "Bearer sk-test");
                then.status(200).json_body(json!({
                    "choices": [
                        { "message": { "role": "assistant", "content": "You can return it within 30 days." } }
                    ]
                }));
            })
            .await;

        let text = client
            .complete(CompletionRequest::prompt("How do I return a package?"))
            .await
            .expect("completion");

        mock.assert();
        assert_eq!(text, "You can return it within 30 days.");
    }

    #[tokio::test]
    async fn openai_client_rejects_empty_choices() {
        let server = MockServer::start_async().await;
        let client =
            OpenAiClient::new(server.base_url(), "sk-test".into(), settings()).expect("client");

        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(json!({ "choices": [] }));
            })
            .await;

        let error = client
            .complete(CompletionRequest::prompt("hi"))
            .await
            .expect_err("no content");
        assert!(matches!(error, LlmClientError::InvalidResponse(_)));
    }
}
