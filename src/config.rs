use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

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

/// Runtime configuration for the document QA service.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding partition lock files, and partitions for the local backend.
    pub index_dir: PathBuf,
    /// Which index store persists partitions; Qdrant unless overridden.
    pub index_backend: IndexBackend,
    /// Base URL of the Qdrant instance (required for the default Qdrant backend).
    pub qdrant_url: Option<String>,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Per-call timeout for embedding requests.
    pub embedding_timeout: Duration,
    /// Chat-completion provider used to answer questions.
    pub completion_provider: CompletionProvider,
    /// Chat model identifier passed to the provider.
    pub completion_model: String,
    /// Sampling temperature for answers.
    pub completion_temperature: f32,
    /// Per-call timeout for completion requests.
    pub completion_timeout: Duration,
    /// Upper bound on generated answer tokens.
    pub completion_max_output_tokens: u32,
    /// OpenAI API key (required when any provider is OpenAI).
    pub openai_api_key: Option<String>,
    /// Base URL of the OpenAI-compatible API.
    pub openai_base_url: String,
    /// Base URL of the Ollama runtime.
    pub ollama_url: String,
    /// Maximum chunk length in chars.
    pub chunk_size: usize,
    /// Chars repeated between adjacent chunks.
    pub chunk_overlap: usize,
    /// Chunk boundary separators in preference order.
    pub chunk_separators: Vec<String>,
    /// Chunks retrieved per question.
    pub top_k: usize,
    /// Attempts per question before giving up.
    pub answer_max_attempts: u32,
    /// Delay after the first failed answer attempt.
    pub answer_backoff_initial: Duration,
    /// Cap on the delay between answer attempts.
    pub answer_backoff_max: Duration,
    /// How long ingestion waits for a partition lock.
    pub ingest_lock_timeout: Duration,
    /// Maximum number of questions per request.
    pub max_questions: usize,
    /// Maximum size of each uploaded file.
    pub max_file_size_bytes: usize,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported index store backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexBackend {
    /// One Qdrant collection per partition.
    Qdrant,
    /// Brute-force JSON partition files under the index directory, for offline runs and tests.
    Local,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// Hosted OpenAI embeddings API.
    OpenAI,
    /// Local Ollama runtime.
    Ollama,
    /// Deterministic offline hashing, for development and tests.
    Hash,
}

/// Supported chat-completion backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionProvider {
    /// Hosted OpenAI chat completions API.
    OpenAI,
    /// Local Ollama runtime.
    Ollama,
}

impl FromStr for IndexBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "qdrant" => Ok(Self::Qdrant),
            _ => Err(()),
        }
    }
}

impl FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            "hash" => Ok(Self::Hash),
            _ => Err(()),
        }
    }
}

impl FromStr for CompletionProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}

const DEFAULT_CHUNK_SEPARATORS: &str = "\\n\\n,\\n, ,";

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);

        let embedding_provider: EmbeddingProvider =
            env.parse_or("EMBEDDING_PROVIDER", EmbeddingProvider::OpenAI)?;
        let completion_provider: CompletionProvider =
            env.parse_or("COMPLETION_PROVIDER", CompletionProvider::OpenAI)?;
        let index_backend: IndexBackend = env.parse_or("INDEX_BACKEND", IndexBackend::Qdrant)?;

        let openai_api_key = env.optional("OPENAI_API_KEY");
        let uses_openai = embedding_provider == EmbeddingProvider::OpenAI
            || completion_provider == CompletionProvider::OpenAI;
        if uses_openai && openai_api_key.is_none() {
            return Err(ConfigError::MissingVariable("OPENAI_API_KEY".into()));
        }

        let qdrant_url = env.optional("QDRANT_URL");
        if index_backend == IndexBackend::Qdrant && qdrant_url.is_none() {
            return Err(ConfigError::MissingVariable("QDRANT_URL".into()));
        }

        let chunk_size: usize = env.parse_or("CHUNK_SIZE", 1000)?;
        let chunk_overlap: usize = env.parse_or("CHUNK_OVERLAP", 150)?;
        if chunk_size == 0 {
            return Err(ConfigError::InvalidValue("CHUNK_SIZE must be positive".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(ConfigError::InvalidValue(
                "CHUNK_OVERLAP must be smaller than CHUNK_SIZE".into(),
            ));
        }

        let embedding_dimension: usize = env.parse_or("EMBEDDING_DIMENSION", 1536)?;
        if embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue(
                "EMBEDDING_DIMENSION must be positive".into(),
            ));
        }

        let top_k: usize = env.parse_or("TOP_K", 4)?;
        if top_k == 0 {
            return Err(ConfigError::InvalidValue("TOP_K must be positive".into()));
        }

        let answer_max_attempts: u32 = env.parse_or("ANSWER_MAX_ATTEMPTS", 3)?;
        if answer_max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "ANSWER_MAX_ATTEMPTS must be positive".into(),
            ));
        }

        Ok(Self {
            index_dir: env
                .optional("DOCQA_INDEX_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".docqa-index")),
            index_backend,
            qdrant_url,
            qdrant_api_key: env.optional("QDRANT_API_KEY"),
            embedding_provider,
            embedding_model: env
                .optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| "text-embedding-3-small".into()),
            embedding_dimension,
            embedding_timeout: env.seconds_or("EMBEDDING_TIMEOUT_SECONDS", 30.0)?,
            completion_provider,
            completion_model: env
                .optional("COMPLETION_MODEL")
                .unwrap_or_else(|| "gpt-4o-mini".into()),
            completion_temperature: env.parse_or("COMPLETION_TEMPERATURE", 0.0)?,
            completion_timeout: env.seconds_or("COMPLETION_TIMEOUT_SECONDS", 30.0)?,
            completion_max_output_tokens: env.parse_or("COMPLETION_MAX_OUTPUT_TOKENS", 300)?,
            openai_api_key,
            openai_base_url: env
                .optional("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".into()),
            ollama_url: env
                .optional("OLLAMA_URL")
                .unwrap_or_else(|| "http://127.0.0.1:11434".into()),
            chunk_size,
            chunk_overlap,
            chunk_separators: parse_separators(
                &env.raw("CHUNK_SEPARATORS")
                    .unwrap_or_else(|| DEFAULT_CHUNK_SEPARATORS.into()),
            ),
            top_k,
            answer_max_attempts,
            answer_backoff_initial: env.seconds_or("ANSWER_BACKOFF_INITIAL_SECONDS", 1.0)?,
            answer_backoff_max: env.seconds_or("ANSWER_BACKOFF_MAX_SECONDS", 8.0)?,
            ingest_lock_timeout: env.seconds_or("INGEST_LOCK_TIMEOUT_SECONDS", 30.0)?,
            max_questions: env.parse_or("MAX_QUESTIONS", 50)?,
            max_file_size_bytes: env.parse_or("MAX_FILE_SIZE_BYTES", 15_000_000)?,
            server_port: env
                .optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
        })
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Value exactly as provided, including surrounding whitespace.
    fn raw(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.is_empty())
    }

    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.optional(key) {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidValue(format!("{key}={value}"))),
            None => Ok(default),
        }
    }

    fn seconds_or(&self, key: &str, default: f64) -> Result<Duration, ConfigError> {
        let seconds: f64 = self.parse_or(key, default)?;
        Duration::try_from_secs_f64(seconds)
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={seconds}")))
    }
}

/// Split a comma list of separators, expanding `\n`, `\r`, `\t` and `\\` escapes.
///
/// An empty item is kept and means "split between characters".
pub fn parse_separators(raw: &str) -> Vec<String> {
    raw.split(',').map(unescape).collect()
}

fn unescape(item: &str) -> String {
    let mut out = String::with_capacity(item.len());
    let mut chars = item.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Load configuration from the environment (and `.env`) once per process.
///
/// Later calls return the first configuration loaded.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    if let Some(existing) = CONFIG.get() {
        return Ok(existing);
    }
    let config = Config::from_env()?;
    tracing::debug!(
        index_dir = %config.index_dir.display(),
        index_backend = ?config.index_backend,
        embedding_provider = ?config.embedding_provider,
        embedding_model = %config.embedding_model,
        completion_provider = ?config.completion_provider,
        completion_model = %config.completion_model,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_with_minimal_environment() {
        let config = config_from(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("QDRANT_URL", "http://127.0.0.1:6333"),
        ])
        .expect("config");
        assert_eq!(config.index_dir, PathBuf::from(".docqa-index"));
        assert_eq!(config.index_backend, IndexBackend::Qdrant);
        assert_eq!(config.qdrant_url.as_deref(), Some("http://127.0.0.1:6333"));
        assert_eq!(config.embedding_provider, EmbeddingProvider::OpenAI);
        assert_eq!(config.embedding_model, "text-embedding-3-small");
        assert_eq!(config.embedding_dimension, 1536);
        assert_eq!(config.embedding_timeout, Duration::from_secs(30));
        assert_eq!(config.completion_model, "gpt-4o-mini");
        assert_eq!(config.completion_temperature, 0.0);
        assert_eq!(config.completion_timeout, Duration::from_secs(30));
        assert_eq!(config.completion_max_output_tokens, 300);
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 150);
        assert_eq!(config.chunk_separators, vec!["\n\n", "\n", " ", ""]);
        assert_eq!(config.top_k, 4);
        assert_eq!(config.answer_max_attempts, 3);
        assert_eq!(config.answer_backoff_initial, Duration::from_secs(1));
        assert_eq!(config.answer_backoff_max, Duration::from_secs(8));
        assert_eq!(config.ingest_lock_timeout, Duration::from_secs(30));
        assert_eq!(config.max_questions, 50);
        assert_eq!(config.max_file_size_bytes, 15_000_000);
        assert_eq!(config.server_port, None);
    }

    #[test]
    fn openai_key_is_required_only_for_openai_providers() {
        let missing = config_from(&[("QDRANT_URL", "http://qdrant:6333")]).unwrap_err();
        assert!(matches!(missing, ConfigError::MissingVariable(key) if key == "OPENAI_API_KEY"));

        let offline = config_from(&[
            ("EMBEDDING_PROVIDER", "hash"),
            ("COMPLETION_PROVIDER", "Ollama"),
            ("INDEX_BACKEND", "local"),
        ])
        .expect("offline config");
        assert_eq!(offline.embedding_provider, EmbeddingProvider::Hash);
        assert_eq!(offline.completion_provider, CompletionProvider::Ollama);
        assert!(offline.openai_api_key.is_none());
        assert_eq!(offline.index_backend, IndexBackend::Local);
        assert!(offline.qdrant_url.is_none());
    }

    #[test]
    fn default_qdrant_backend_requires_url() {
        let error = config_from(&[("OPENAI_API_KEY", "k")]).unwrap_err();
        assert!(matches!(error, ConfigError::MissingVariable(key) if key == "QDRANT_URL"));

        let explicit = config_from(&[("OPENAI_API_KEY", "k"), ("INDEX_BACKEND", "qdrant")])
            .unwrap_err();
        assert!(matches!(explicit, ConfigError::MissingVariable(key) if key == "QDRANT_URL"));
    }

    #[test]
    fn rejects_invalid_values() {
        for pairs in [
            vec![("CHUNK_SIZE", "abc")],
            vec![("CHUNK_SIZE", "100"), ("CHUNK_OVERLAP", "100")],
            vec![("EMBEDDING_PROVIDER", "cohere")],
            vec![("TOP_K", "0")],
            vec![("ANSWER_BACKOFF_MAX_SECONDS", "-1")],
            vec![("EMBEDDING_TIMEOUT_SECONDS", "soon")],
            vec![("SERVER_PORT", "99999")],
        ] {
            let mut all = vec![("OPENAI_API_KEY", "k"), ("INDEX_BACKEND", "local")];
            all.extend(pairs.iter().copied());
            assert!(
                matches!(config_from(&all), Err(ConfigError::InvalidValue(_))),
                "{pairs:?} should be rejected"
            );
        }
    }

    #[test]
    fn separators_expand_escapes() {
        assert_eq!(parse_separators("\\n\\n,\\n, ,"), vec!["\n\n", "\n", " ", ""]);
        assert_eq!(parse_separators(". ,\\t"), vec![". ", "\t"]);
    }
}
