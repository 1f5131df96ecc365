//! Client for the Ollama HTTP API.
//!
//! Only the two endpoints the query engine needs are covered: `/api/tags`
//! for connectivity and model checks, and `/api/generate` for non-streaming
//! completion.

use crate::error::GenerationError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "mistral:latest";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_NUM_PREDICT: i32 = 2000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Connection and sampling settings for the Ollama server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Maximum tokens to generate; negative values use Ollama's own limits
    pub num_predict: i32,
    pub timeout_secs: u64,
    /// Overrides the engine's built-in system prompt when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            num_predict: DEFAULT_NUM_PREDICT,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            system_prompt: None,
        }
    }
}

impl OllamaConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_num_predict(mut self, num_predict: i32) -> Self {
        self.num_predict = num_predict;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.base_url.trim().is_empty() {
            return Err(GenerationError::invalid_config("base_url must not be empty"));
        }
        if self.model.trim().is_empty() {
            return Err(GenerationError::invalid_config("model must not be empty"));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(GenerationError::invalid_config(
                "temperature must be finite and non-negative",
            ));
        }
        if self.timeout_secs == 0 {
            return Err(GenerationError::invalid_config(
                "timeout_secs must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: i32,
}

/// Non-streaming completion result. Timing fields are nanoseconds and only
/// present once generation is done.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub eval_duration: Option<u64>,
    #[serde(default)]
    pub total_duration: Option<u64>,
}

impl GenerateResponse {
    /// Generation speed, when the server reported timing.
    pub fn tokens_per_second(&self) -> Option<f64> {
        match (self.eval_count, self.eval_duration) {
            (Some(count), Some(nanos)) if nanos > 0 => {
                Some(count as f64 * 1_000_000_000.0 / nanos as f64)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

/// One entry from `/api/tags`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub modified_at: String,
}

pub struct OllamaClient {
    config: OllamaConfig,
    client: Client,
}

impl std::fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaClient")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .finish()
    }
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Result<Self, GenerationError> {
        config.validate()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                GenerationError::invalid_config(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn request_error(&self, e: reqwest::Error) -> GenerationError {
        if e.is_timeout() {
            GenerationError::Timeout {
                seconds: self.config.timeout_secs,
            }
        } else {
            GenerationError::Connection {
                url: self.config.base_url.clone(),
                source: e,
            }
        }
    }

    async fn fetch_tags(&self) -> Result<TagsResponse, GenerationError> {
        let response = self
            .client
            .get(self.endpoint("api/tags"))
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(GenerationError::Api {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json()
            .await
            .map_err(|e| GenerationError::invalid_response(e.to_string()))
    }

    /// Check that the server is reachable and list its installed models.
    pub async fn verify_connection(&self) -> Result<Vec<String>, GenerationError> {
        let tags = self.fetch_tags().await?;
        let names: Vec<String> = tags.models.into_iter().map(|tag| tag.name).collect();
        tracing::debug!(
            "Ollama server at {} has {} models",
            self.config.base_url,
            names.len()
        );
        Ok(names)
    }

    /// The `/api/tags` entry for the configured model, if installed.
    pub async fn model_info(&self) -> Result<Option<ModelInfo>, GenerationError> {
        let tags = self.fetch_tags().await?;
        Ok(tags
            .models
            .into_iter()
            .find(|tag| model_matches(&tag.name, &self.config.model)))
    }

    /// Run one non-streaming completion.
    pub async fn generate(&self, prompt: &str) -> Result<GenerateResponse, GenerationError> {
        let request = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.config.temperature,
                num_predict: self.config.num_predict,
            },
        };

        let response = self
            .client
            .post(self.endpoint("api/generate"))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(GenerationError::ModelNotAvailable {
                model: self.config.model.clone(),
            });
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(GenerationError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::invalid_response(e.to_string()))?;
        if !generated.done {
            tracing::warn!("Ollama reported an unfinished generation");
        }
        if let Some(tps) = generated.tokens_per_second() {
            tracing::debug!(
                "Generated {} tokens at {tps:.1} tokens/sec",
                generated.eval_count.unwrap_or(0)
            );
        }
        Ok(generated)
    }
}

/// True when an installed tag satisfies the configured model name. A bare
/// name like "mistral" matches any of its tags.
pub(crate) fn model_matches(tag: &str, model: &str) -> bool {
    if tag == model {
        return true;
    }
    !model.contains(':') && tag.strip_prefix(model).is_some_and(|rest| rest.starts_with(':'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OllamaConfig::default();
        assert_eq!(config.base_url, "http://localhost:11434");
        assert_eq!(config.model, "mistral:latest");
        assert_eq!(config.temperature, 0.7);
        assert_eq!(config.num_predict, 2000);
        assert_eq!(config.timeout_secs, 120);
        assert!(config.system_prompt.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let err = OllamaConfig::new().with_model("").validate().unwrap_err();
        assert!(err.to_string().contains("model"));

        assert!(OllamaConfig::new().with_base_url(" ").validate().is_err());
        assert!(
            OllamaConfig::new()
                .with_temperature(f32::NAN)
                .validate()
                .is_err()
        );
        assert!(
            OllamaConfig::new()
                .with_temperature(-0.1)
                .validate()
                .is_err()
        );
        assert!(OllamaConfig::new().with_timeout_secs(0).validate().is_err());
    }

    #[test]
    fn test_generate_request_wire_format() {
        let request = GenerateRequest {
            model: "mistral:latest",
            prompt: "Why is the sky blue?",
            stream: false,
            options: GenerateOptions {
                temperature: 0.7,
                num_predict: 2000,
            },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "mistral:latest");
        assert_eq!(value["prompt"], "Why is the sky blue?");
        assert_eq!(value["stream"], false);
        assert_eq!(value["options"]["temperature"], 0.7);
        assert_eq!(value["options"]["num_predict"], 2000);
    }

    #[test]
    fn test_generate_response_defaults() {
        let minimal: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(minimal.response, "");
        assert!(!minimal.done);
        assert!(minimal.tokens_per_second().is_none());

        let full: GenerateResponse = serde_json::from_str(
            r#"{
                "model": "mistral:latest",
                "response": "The sky is blue because...",
                "done": true,
                "eval_count": 100,
                "eval_duration": 2000000000,
                "total_duration": 2500000000
            }"#,
        )
        .unwrap();
        assert_eq!(full.response, "The sky is blue because...");
        assert!(full.done);
        assert_eq!(full.tokens_per_second(), Some(50.0));
    }

    #[test]
    fn test_model_matching() {
        assert!(model_matches("mistral:latest", "mistral:latest"));
        assert!(model_matches("mistral:latest", "mistral"));
        assert!(model_matches("mistral:7b", "mistral"));
        assert!(!model_matches("mistral:latest", "llama3"));
        assert!(!model_matches("mistrale:latest", "mistral"));
        assert!(!model_matches("mistral:7b", "mistral:latest"));
    }

    #[test]
    fn test_endpoint_handles_trailing_slash() {
        let client =
            OllamaClient::new(OllamaConfig::new().with_base_url("http://localhost:11434/"))
                .unwrap();
        assert_eq!(
            client.endpoint("api/tags"),
            "http://localhost:11434/api/tags"
        );
    }

    #[test]
    fn test_model_info_deserializes_sparse_tags() {
        let tags: TagsResponse = serde_json::from_str(
            r#"{"models": [{"name": "mistral:latest"}, {"name": "llama3:8b", "size": 4661224676}]}"#,
        )
        .unwrap();
        assert_eq!(tags.models.len(), 2);
        assert_eq!(tags.models[0].name, "mistral:latest");
        assert_eq!(tags.models[0].size, 0);
        assert_eq!(tags.models[1].size, 4661224676);

        let empty: TagsResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.models.is_empty());
    }

    #[tokio::test]
    #[ignore = "requires a running Ollama server"]
    async fn test_live_generate() {
        let client = OllamaClient::new(OllamaConfig::default()).unwrap();
        let models = client.verify_connection().await.unwrap();
        assert!(!models.is_empty());
        let response = client.generate("Reply with the single word: hello").await.unwrap();
        assert!(response.done);
        assert!(!response.response.is_empty());
    }
}
