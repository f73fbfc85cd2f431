use serde::Deserialize;
use std::env;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the Support Graph server.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the Qdrant instance holding the support index.
    pub qdrant_url: String,
    /// Name of the Qdrant collection holding the support index.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Embedding provider used for retrieval and output relevance checks.
    pub embedding_provider: Provider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Language model provider used for generation, grading, and judging.
    pub llm_provider: Provider,
    /// Language model identifier passed to the provider.
    pub llm_model: String,
    /// Sampling temperature for every language model call.
    pub llm_temperature: f32,
    /// Upper bound on generated tokens per call.
    pub llm_max_tokens: u32,
    /// Base URL of the local Ollama runtime.
    pub ollama_url: String,
    /// API key for the OpenAI-compatible provider.
    pub openai_api_key: Option<String>,
    /// Base URL for the OpenAI-compatible provider.
    pub openai_base_url: String,
    /// Number of nearest documents requested from the retriever.
    pub retrieval_top_k: usize,
    /// Classifier confidence below which an off-topic verdict is overridden.
    pub topic_confidence_threshold: f32,
    /// Maximum number of memoized topic classifications.
    pub topic_cache_capacity: usize,
    /// Maximum number of grading calls in flight for one run.
    pub grading_concurrency: usize,
    /// Token budget enforced on incoming questions.
    pub input_token_limit: usize,
    /// Minimum cosine similarity between answer and prompt.
    pub output_relevance_threshold: f32,
    /// Deadline applied to a whole pipeline run.
    pub request_timeout_secs: u64,
    /// Refuse instead of generating when grading leaves no documents.
    pub refuse_without_context: bool,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported model backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI-compatible API.
    OpenAI,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source = Source(lookup);
        let config = Self {
            qdrant_url: source.required("QDRANT_URL")?,
            qdrant_collection_name: source.required("QDRANT_COLLECTION_NAME")?,
            qdrant_api_key: source.optional("QDRANT_API_KEY"),
            embedding_provider: source.required_parsed("EMBEDDING_PROVIDER")?,
            embedding_model: source.required("EMBEDDING_MODEL")?,
            embedding_dimension: source.required_parsed("EMBEDDING_DIMENSION")?,
            llm_provider: source.parsed_or("LLM_PROVIDER", Provider::Ollama)?,
            llm_model: source.required("LLM_MODEL")?,
            llm_temperature: source.parsed_or("LLM_TEMPERATURE", 0.0)?,
            llm_max_tokens: source.parsed_or("LLM_MAX_TOKENS", 100)?,
            ollama_url: source
                .optional("OLLAMA_URL")
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            openai_api_key: source.optional("OPENAI_API_KEY"),
            openai_base_url: source
                .optional("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            retrieval_top_k: source.parsed_or("RETRIEVAL_TOP_K", 5)?,
            topic_confidence_threshold: source.parsed_or("TOPIC_CONFIDENCE_THRESHOLD", 0.7)?,
            topic_cache_capacity: source.parsed_or("TOPIC_CACHE_CAPACITY", 100)?,
            grading_concurrency: source.parsed_or("GRADING_CONCURRENCY", 4)?,
            input_token_limit: source.parsed_or("INPUT_TOKEN_LIMIT", 4096)?,
            output_relevance_threshold: source.parsed_or("OUTPUT_RELEVANCE_THRESHOLD", 0.5)?,
            request_timeout_secs: source.parsed_or("REQUEST_TIMEOUT_SECS", 120)?,
            refuse_without_context: source.flag_or("REFUSE_WITHOUT_CONTEXT", true)?,
            server_port: source
                .optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Deadline applied to a single pipeline run.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_DIMENSION".into()));
        }
        if self.retrieval_top_k == 0 {
            return Err(ConfigError::InvalidValue("RETRIEVAL_TOP_K".into()));
        }
        if !(0.0..=1.0).contains(&self.topic_confidence_threshold) {
            return Err(ConfigError::InvalidValue(
                "TOPIC_CONFIDENCE_THRESHOLD".into(),
            ));
        }
        if self.grading_concurrency == 0 {
            return Err(ConfigError::InvalidValue("GRADING_CONCURRENCY".into()));
        }
        let uses_openai =
            self.llm_provider == Provider::OpenAI || self.embedding_provider == Provider::OpenAI;
        if uses_openai && self.openai_api_key.is_none() {
            return Err(ConfigError::MissingVariable("OPENAI_API_KEY".into()));
        }
        Ok(())
    }
}

struct Source<F>(F);

impl<F> Source<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
    }

    fn required_parsed<T: std::str::FromStr>(&self, key: &str) -> Result<T, ConfigError> {
        self.required(key)?
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string()))
    }

    fn parsed_or<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.optional(key) {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string())),
            None => Ok(default),
        }
    }

    fn flag_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(key) {
            Some(value) => match value.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::InvalidValue(key.to_string())),
            },
            None => Ok(default),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        qdrant_url = %config.qdrant_url,
        collection = %config.qdrant_collection_name,
        llm_provider = ?config.llm_provider,
        llm_model = %config.llm_model,
        embedding_provider = ?config.embedding_provider,
        top_k = config.retrieval_top_k,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
