//! Configuration and tracing setup for the Dreams workspace.
//!
//! Configuration is read from TOML, then environment overrides are applied, then
//! [`DreamsConfig::validate`] is run. Every section is optional; an empty file yields
//! the same configuration as [`DreamsConfig::default`].

use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once, OnceLock};

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use url::Url;

/// Environment variable naming the config file to load.
pub const CONFIG_PATH_ENV: &str = "DREAMS_CONFIG";
/// Overrides `ai.provider.model`.
pub const MODEL_ENV: &str = "OLLAMA_MODEL";
/// Overrides `ai.provider.url`.
pub const BASE_URL_ENV: &str = "OLLAMA_BASE_URL";
/// Overrides `storage.data_file`.
pub const DATA_FILE_ENV: &str = "DREAMS_DATA_FILE";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DreamsConfig {
    pub logging: LoggingConfig,
    pub ai: AiConfig,
    pub storage: StorageConfig,
    pub search: SearchConfig,
    pub layout: LayoutConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// A simple level (`info`, `debug`, ...) or a full `EnvFilter` directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,

    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Append logs to this file. If it cannot be opened, file logging is skipped.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// The effective filter: the configured level merged with `RUST_LOG` when set.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

#[derive(Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub provider: AiProviderConfig,

    /// Sent as a bearer token to OpenAI-compatible endpoints.
    pub api_key: Option<String>,

    /// Year that relative phrases like "next year" are resolved against.
    ///
    /// Defaults to the current calendar year.
    pub reference_year: Option<i32>,

    pub embeddings: AiEmbeddingsConfig,
}

impl AiConfig {
    pub fn reference_year(&self) -> i32 {
        self.reference_year
            .unwrap_or_else(|| chrono::Local::now().year())
    }
}

impl fmt::Debug for AiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiConfig")
            .field("provider", &self.provider)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("reference_year", &self.reference_year)
            .field("embeddings", &self.embeddings)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiProviderKind {
    /// Ollama HTTP API (e.g. http://localhost:11434)
    #[default]
    Ollama,
    /// OpenAI-compatible endpoints (vLLM, llama.cpp server, ...)
    OpenAiCompatible,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AiProviderConfig {
    #[serde(default)]
    pub kind: AiProviderKind,

    /// Base URL for the provider.
    #[serde(default = "default_provider_url")]
    pub url: Url,

    #[serde(default = "default_model_name")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: Option<f32>,

    /// Per-request timeout (in milliseconds). For streams this is an idle timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum number of in-flight requests to the backend.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_provider_url() -> Url {
    Url::parse("http://localhost:11434").expect("valid default url")
}

fn default_model_name() -> String {
    "llama3".to_owned()
}

fn default_max_tokens() -> u32 {
    1_024
}

fn default_temperature() -> Option<f32> {
    Some(0.7)
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_concurrency() -> usize {
    4
}

impl AiProviderConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms.max(1))
    }
}

impl Default for AiProviderConfig {
    fn default() -> Self {
        Self {
            kind: AiProviderKind::default(),
            url: default_provider_url(),
            model: default_model_name(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_ms: default_timeout_ms(),
            concurrency: default_concurrency(),
        }
    }
}

impl fmt::Debug for AiProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiProviderConfig")
            .field("kind", &self.kind)
            .field("url", &sanitize_url_for_debug(&self.url))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout_ms", &self.timeout_ms)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

fn sanitize_url_for_debug(url: &Url) -> String {
    let mut url = url.clone();
    if !url.username().is_empty() {
        let _ = url.set_username("<redacted>");
    }
    if url.password().is_some() {
        let _ = url.set_password(Some("<redacted>"));
    }
    url.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiEmbeddingsBackend {
    /// Deterministic hashing-trick vectors; no model required.
    #[default]
    Hash,
    /// Ollama's embedding endpoint, using `ai.provider.url`.
    Provider,
    /// In-process sentence-transformer model (`embeddings-local` feature).
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiEmbeddingsConfig {
    #[serde(default)]
    pub backend: AiEmbeddingsBackend,

    /// Embedding model for the provider backend. Falls back to `ai.provider.model`.
    #[serde(default)]
    pub model: Option<String>,

    /// Timeout override (milliseconds) for the provider backend.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default = "default_embeddings_local_model")]
    pub local_model: String,

    /// Directory holding downloaded model files.
    #[serde(default = "default_embeddings_model_dir")]
    pub model_dir: PathBuf,

    #[serde(default = "default_embeddings_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_hash_dims")]
    pub hash_dims: usize,
}

fn default_embeddings_local_model() -> String {
    "all-MiniLM-L6-v2".to_owned()
}

fn default_embeddings_model_dir() -> PathBuf {
    PathBuf::from(".dreams/models/embeddings")
}

fn default_embeddings_batch_size() -> usize {
    32
}

fn default_hash_dims() -> usize {
    256
}

impl Default for AiEmbeddingsConfig {
    fn default() -> Self {
        Self {
            backend: AiEmbeddingsBackend::default(),
            model: None,
            timeout_ms: None,
            local_model: default_embeddings_local_model(),
            model_dir: default_embeddings_model_dir(),
            batch_size: default_embeddings_batch_size(),
            hash_dims: default_hash_dims(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON document holding every stored dream.
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
}

fn default_data_file() -> PathBuf {
    PathBuf::from("data/dreams.json")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,
}

fn default_search_limit() -> usize {
    5
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_search_limit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Maximum distance of any projected point from the origin.
    #[serde(default = "default_radius")]
    pub radius: f64,
}

fn default_radius() -> f64 {
    20.0
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            radius: default_radius(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("invalid value in environment variable {var}: {message}")]
    Env { var: &'static str, message: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn sanitize_toml_error_message(message: &str) -> String {
    // Messages can echo user-provided scalars (`invalid type: string "sk-..."`), so
    // quoted and backticked values are redacted.
    static QUOTED_RE: OnceLock<Option<regex::Regex>> = OnceLock::new();
    static BACKTICK_RE: OnceLock<Option<regex::Regex>> = OnceLock::new();

    let mut out = message.to_owned();
    if let Some(re) = QUOTED_RE
        .get_or_init(|| regex::Regex::new(r#""(?:\\.|[^"\\])*"|'(?:\\.|[^'\\])*'"#).ok())
    {
        out = re.replace_all(&out, r#""<redacted>""#).into_owned();
    }

    // `missing field `foo`` names a schema field and stays readable.
    if !out.starts_with("missing field") {
        if let Some(re) = BACKTICK_RE.get_or_init(|| regex::Regex::new(r"`[^`]*`").ok()) {
            let boundary = out.find(", expected").unwrap_or(out.len());
            let (head, tail) = out.split_at(boundary);
            out = format!("{}{tail}", re.replace_all(head, "`<redacted>`"));
        }
    }

    out
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The default `Display` includes a source snippet, which may contain `ai.api_key`.
        ConfigError::Toml(sanitize_toml_error_message(err.message()))
    }
}

impl DreamsConfig {
    /// Load a config file from TOML. No environment overrides are applied.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Resolve the effective configuration for a process.
    ///
    /// The file is `explicit` if given, else `$DREAMS_CONFIG` if set, else defaults.
    /// Environment overrides are applied and the result is validated.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var_os(CONFIG_PATH_ENV)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        let path = explicit.map(Path::to_path_buf).or(env_path);

        let mut config = match path {
            Some(path) => {
                tracing::debug!(target: "dreams.config", path = %path.display(), "loading config file");
                Self::load_from_path(&path)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env_overrides_with(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        if let Some(model) = read(MODEL_ENV) {
            self.ai.provider.model = model;
        }
        if let Some(url) = read(BASE_URL_ENV) {
            self.ai.provider.url = Url::parse(&url).map_err(|err| ConfigError::Env {
                var: BASE_URL_ENV,
                message: err.to_string(),
            })?;
        }
        if let Some(path) = read(DATA_FILE_ENV) {
            self.storage.data_file = PathBuf::from(path);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ai.provider.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "ai.provider.concurrency must be >= 1".into(),
            ));
        }
        if self.ai.embeddings.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "ai.embeddings.batch_size must be >= 1".into(),
            ));
        }
        if self.ai.embeddings.hash_dims == 0 {
            return Err(ConfigError::Invalid(
                "ai.embeddings.hash_dims must be >= 1".into(),
            ));
        }
        if !(self.layout.radius.is_finite() && self.layout.radius > 0.0) {
            return Err(ConfigError::Invalid(
                "layout.radius must be a positive number".into(),
            ));
        }
        if self.search.default_limit == 0 {
            return Err(ConfigError::Invalid(
                "search.default_limit must be >= 1".into(),
            ));
        }
        if let Some(temperature) = self.ai.provider.temperature {
            if !(temperature.is_finite() && temperature >= 0.0) {
                return Err(ConfigError::Invalid(
                    "ai.provider.temperature must be >= 0".into(),
                ));
            }
        }
        Ok(())
    }
}

struct MutexFileMakeWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl<'a> MakeWriter<'a> for MutexFileMakeWriter {
    type Writer = MutexFileWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        MutexFileWriter {
            guard: self
                .file
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        }
    }
}

struct MutexFileWriter<'a> {
    guard: std::sync::MutexGuard<'a, std::fs::File>,
}

impl Write for MutexFileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.guard.flush()
    }
}

static TRACING_INIT: Once = Once::new();

/// Install the global tracing subscriber. Only the first call has any effect.
pub fn init_tracing(logging: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = logging.env_filter();

        let file_path = logging.file.clone();
        let file = file_path
            .as_ref()
            .and_then(|path| {
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .ok()
            })
            .map(|file| Arc::new(Mutex::new(file)));
        let file_open_failed = file_path.is_some() && file.is_none();

        let mut make_writer = BoxMakeWriter::new(io::sink);
        if logging.stderr {
            // `TestWriter` goes through `eprint!`, which `cargo test` captures.
            if cfg!(debug_assertions) {
                make_writer = BoxMakeWriter::new(
                    make_writer.and(tracing_subscriber::fmt::writer::TestWriter::with_stderr),
                );
            } else {
                make_writer = BoxMakeWriter::new(make_writer.and(io::stderr));
            }
        }
        if let Some(file) = file {
            make_writer = BoxMakeWriter::new(make_writer.and(MutexFileMakeWriter { file }));
        }

        let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if logging.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        if tracing::subscriber::set_global_default(subscriber).is_ok() && file_open_failed {
            if let Some(path) = file_path.as_ref() {
                tracing::warn!(
                    target: "dreams.config",
                    path = %path.display(),
                    "failed to open log file; file logging disabled"
                );
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_matches_defaults() {
        let config = DreamsConfig::from_toml_str("").unwrap();
        assert_eq!(config, DreamsConfig::default());
        assert_eq!(config.ai.provider.model, "llama3");
        assert_eq!(config.ai.provider.url.as_str(), "http://localhost:11434/");
        assert_eq!(config.ai.provider.temperature, Some(0.7));
        assert_eq!(config.search.default_limit, 5);
        assert_eq!(config.layout.radius, 20.0);
        assert_eq!(config.ai.embeddings.backend, AiEmbeddingsBackend::Hash);
    }

    #[test]
    fn level_synonyms_are_normalized() {
        assert_eq!(LoggingConfig::normalize_level_directives("WARNING"), "warn");
        assert_eq!(LoggingConfig::normalize_level_directives("  "), "info");
        assert_eq!(
            LoggingConfig::normalize_level_directives("dreams.ai=debug"),
            "dreams.ai=debug"
        );
    }

    #[test]
    fn env_overrides_replace_model_url_and_data_file() {
        let mut config = DreamsConfig::default();
        config
            .apply_env_overrides_with(|key| match key {
                MODEL_ENV => Some("mistral".to_owned()),
                BASE_URL_ENV => Some("http://10.0.0.2:11434".to_owned()),
                DATA_FILE_ENV => Some("/tmp/dreams.json".to_owned()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.ai.provider.model, "mistral");
        assert_eq!(config.ai.provider.url.host_str(), Some("10.0.0.2"));
        assert_eq!(config.storage.data_file, PathBuf::from("/tmp/dreams.json"));
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut config = DreamsConfig::default();
        config
            .apply_env_overrides_with(|_| Some("   ".to_owned()))
            .unwrap();
        assert_eq!(config, DreamsConfig::default());
    }

    #[test]
    fn bad_base_url_is_reported_with_variable_name() {
        let mut config = DreamsConfig::default();
        let err = config
            .apply_env_overrides_with(|key| (key == BASE_URL_ENV).then(|| "not a url".to_owned()))
            .unwrap_err();
        assert!(err.to_string().contains(BASE_URL_ENV));
    }

    #[test]
    fn validate_rejects_zero_concurrency_and_bad_radius() {
        let mut config = DreamsConfig::default();
        config.ai.provider.concurrency = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = DreamsConfig::default();
        config.layout.radius = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        assert!(DreamsConfig::default().validate().is_ok());
    }

    #[test]
    fn toml_errors_do_not_leak_secret_values() {
        let err = DreamsConfig::from_toml_str(
            r#"
[ai]
api_key = "sk-very-secret"
reference_year = "sk-very-secret"
"#,
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(!message.contains("sk-very-secret"), "{message}");
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let config = AiConfig {
            api_key: Some("sk-very-secret".to_owned()),
            ..AiConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
    }

    #[test]
    fn reference_year_prefers_configured_value() {
        let config = AiConfig {
            reference_year: Some(2030),
            ..AiConfig::default()
        };
        assert_eq!(config.reference_year(), 2030);
    }
}
