use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "forum-replier.toml";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub slack: SlackConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub crawler: CrawlerConfig,
    pub github: GithubConfig,
    pub retrieval: RetrievalConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub app_token: SecretString,
    pub bot_token: SecretString,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub project: Option<String>,
    pub region: Option<String>,
    /// Fixed bearer token for Vertex. Skips credential discovery when set.
    pub access_token: Option<SecretString>,
    /// Google credentials JSON (service account or `gcloud` user credentials).
    pub credentials_file: Option<PathBuf>,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub dims: usize,
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub batch_size: usize,
}

#[derive(Clone, Debug)]
pub struct CrawlerConfig {
    pub max_pages: usize,
    pub max_depth: usize,
    pub user_agent: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct GithubConfig {
    pub token: Option<SecretString>,
    pub api_base_url: String,
    pub max_files: usize,
    pub max_issues: usize,
}

#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub min_score: f32,
    pub max_context_chars: usize,
    pub recent_turns: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Anthropic,
    Vertex,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Vertex => "vertex",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    Hashing,
    #[serde(rename = "openai")]
    OpenAi,
}

impl EmbeddingProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hashing => "hashing",
            Self::OpenAi => "openai",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub embedding_provider: Option<EmbeddingProvider>,
    pub slack_app_token: Option<String>,
    pub slack_bot_token: Option<String>,
    pub github_token: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://forum-replier.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            slack: SlackConfig { app_token: String::new().into(), bot_token: String::new().into() },
            llm: LlmConfig {
                provider: LlmProvider::Vertex,
                api_key: None,
                base_url: None,
                project: None,
                region: Some("us-east5".to_string()),
                access_token: None,
                credentials_file: None,
                model: "claude-sonnet-4@20250514".to_string(),
                max_tokens: 512,
                timeout_secs: 60,
            },
            embedding: EmbeddingConfig {
                provider: EmbeddingProvider::Hashing,
                model: "text-embedding-3-small".to_string(),
                dims: 384,
                base_url: None,
                api_key: None,
                batch_size: 64,
            },
            crawler: CrawlerConfig {
                max_pages: 500,
                max_depth: 5,
                user_agent: "ForumReplierBot/1.0".to_string(),
                timeout_secs: 30,
            },
            github: GithubConfig {
                token: None,
                api_base_url: "https://api.github.com".to_string(),
                max_files: 100,
                max_issues: 100,
            },
            retrieval: RetrievalConfig {
                top_k: 5,
                min_score: 0.3,
                max_context_chars: 12_000,
                recent_turns: 3,
                chunk_size: 1000,
                chunk_overlap: 200,
            },
            server: ServerConfig { bind_address: "127.0.0.1".to_string(), health_check_port: 8080 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "vertex" | "vertex_ai" => Ok(Self::Vertex),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected anthropic|vertex)"
            ))),
        }
    }
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hashing" => Ok(Self::Hashing),
            "openai" => Ok(Self::OpenAi),
            other => Err(ConfigError::Validation(format!(
                "unsupported embedding provider `{other}` (expected hashing|openai)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(slack) = patch.slack {
            if let Some(app_token) = slack.app_token {
                self.slack.app_token = secret_value(app_token);
            }
            if let Some(bot_token) = slack.bot_token {
                self.slack.bot_token = secret_value(bot_token);
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(project) = llm.project {
                self.llm.project = Some(project);
            }
            if let Some(region) = llm.region {
                self.llm.region = Some(region);
            }
            if let Some(access_token) = llm.access_token {
                self.llm.access_token = Some(secret_value(access_token));
            }
            if let Some(credentials_file) = llm.credentials_file {
                self.llm.credentials_file = Some(PathBuf::from(credentials_file));
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(embedding) = patch.embedding {
            if let Some(provider) = embedding.provider {
                self.embedding.provider = provider;
            }
            if let Some(model) = embedding.model {
                self.embedding.model = model;
            }
            if let Some(dims) = embedding.dims {
                self.embedding.dims = dims;
            }
            if let Some(base_url) = embedding.base_url {
                self.embedding.base_url = Some(base_url);
            }
            if let Some(api_key) = embedding.api_key {
                self.embedding.api_key = Some(secret_value(api_key));
            }
            if let Some(batch_size) = embedding.batch_size {
                self.embedding.batch_size = batch_size;
            }
        }

        if let Some(crawler) = patch.crawler {
            if let Some(max_pages) = crawler.max_pages {
                self.crawler.max_pages = max_pages;
            }
            if let Some(max_depth) = crawler.max_depth {
                self.crawler.max_depth = max_depth;
            }
            if let Some(user_agent) = crawler.user_agent {
                self.crawler.user_agent = user_agent;
            }
            if let Some(timeout_secs) = crawler.timeout_secs {
                self.crawler.timeout_secs = timeout_secs;
            }
        }

        if let Some(github) = patch.github {
            if let Some(token) = github.token {
                self.github.token = Some(secret_value(token));
            }
            if let Some(api_base_url) = github.api_base_url {
                self.github.api_base_url = api_base_url;
            }
            if let Some(max_files) = github.max_files {
                self.github.max_files = max_files;
            }
            if let Some(max_issues) = github.max_issues {
                self.github.max_issues = max_issues;
            }
        }

        if let Some(retrieval) = patch.retrieval {
            if let Some(top_k) = retrieval.top_k {
                self.retrieval.top_k = top_k;
            }
            if let Some(min_score) = retrieval.min_score {
                self.retrieval.min_score = min_score;
            }
            if let Some(max_context_chars) = retrieval.max_context_chars {
                self.retrieval.max_context_chars = max_context_chars;
            }
            if let Some(recent_turns) = retrieval.recent_turns {
                self.retrieval.recent_turns = recent_turns;
            }
            if let Some(chunk_size) = retrieval.chunk_size {
                self.retrieval.chunk_size = chunk_size;
            }
            if let Some(chunk_overlap) = retrieval.chunk_overlap {
                self.retrieval.chunk_overlap = chunk_overlap;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("REPLIER_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("REPLIER_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("REPLIER_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("REPLIER_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("REPLIER_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("REPLIER_SLACK_APP_TOKEN") {
            self.slack.app_token = secret_value(value);
        }
        if let Some(value) = read_env("REPLIER_SLACK_BOT_TOKEN") {
            self.slack.bot_token = secret_value(value);
        }

        if let Some(value) = read_env("REPLIER_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("REPLIER_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("REPLIER_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        let project =
            read_env("REPLIER_LLM_PROJECT").or_else(|| read_env("GOOGLE_CLOUD_PROJECT"));
        if let Some(value) = project {
            self.llm.project = Some(value);
        }
        let region = read_env("REPLIER_LLM_REGION").or_else(|| read_env("GOOGLE_CLOUD_REGION"));
        if let Some(value) = region {
            self.llm.region = Some(value);
        }
        if let Some(value) = read_env("REPLIER_LLM_ACCESS_TOKEN") {
            self.llm.access_token = Some(secret_value(value));
        }
        let credentials_file = read_env("REPLIER_LLM_CREDENTIALS_FILE")
            .or_else(|| read_env("GOOGLE_APPLICATION_CREDENTIALS"));
        if let Some(value) = credentials_file {
            self.llm.credentials_file = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("REPLIER_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("REPLIER_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_u32("REPLIER_LLM_MAX_TOKENS", &value)?;
        }
        if let Some(value) = read_env("REPLIER_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("REPLIER_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("REPLIER_EMBEDDING_PROVIDER") {
            self.embedding.provider = value.parse()?;
        }
        if let Some(value) = read_env("REPLIER_EMBEDDING_MODEL") {
            self.embedding.model = value;
        }
        if let Some(value) = read_env("REPLIER_EMBEDDING_DIMS") {
            self.embedding.dims = parse_usize("REPLIER_EMBEDDING_DIMS", &value)?;
        }
        if let Some(value) = read_env("REPLIER_EMBEDDING_BASE_URL") {
            self.embedding.base_url = Some(value);
        }
        let embedding_key =
            read_env("REPLIER_EMBEDDING_API_KEY").or_else(|| read_env("OPENAI_API_KEY"));
        if let Some(value) = embedding_key {
            self.embedding.api_key = Some(secret_value(value));
        }

        if let Some(value) = read_env("REPLIER_CRAWLER_MAX_PAGES") {
            self.crawler.max_pages = parse_usize("REPLIER_CRAWLER_MAX_PAGES", &value)?;
        }
        if let Some(value) = read_env("REPLIER_CRAWLER_MAX_DEPTH") {
            self.crawler.max_depth = parse_usize("REPLIER_CRAWLER_MAX_DEPTH", &value)?;
        }
        if let Some(value) = read_env("REPLIER_CRAWLER_USER_AGENT") {
            self.crawler.user_agent = value;
        }

        let github_token = read_env("REPLIER_GITHUB_TOKEN").or_else(|| read_env("GITHUB_TOKEN"));
        if let Some(value) = github_token {
            self.github.token = Some(secret_value(value));
        }
        if let Some(value) = read_env("REPLIER_GITHUB_API_BASE_URL") {
            self.github.api_base_url = value;
        }

        if let Some(value) = read_env("REPLIER_RETRIEVAL_TOP_K") {
            self.retrieval.top_k = parse_usize("REPLIER_RETRIEVAL_TOP_K", &value)?;
        }
        if let Some(value) = read_env("REPLIER_RETRIEVAL_MIN_SCORE") {
            self.retrieval.min_score = parse_f32("REPLIER_RETRIEVAL_MIN_SCORE", &value)?;
        }

        if let Some(value) = read_env("REPLIER_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("REPLIER_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("REPLIER_SERVER_HEALTH_CHECK_PORT", &value)?;
        }

        let log_level =
            read_env("REPLIER_LOGGING_LEVEL").or_else(|| read_env("REPLIER_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("REPLIER_LOGGING_FORMAT").or_else(|| read_env("REPLIER_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(llm_base_url);
        }
        if let Some(embedding_provider) = overrides.embedding_provider {
            self.embedding.provider = embedding_provider;
        }
        if let Some(slack_app_token) = overrides.slack_app_token {
            self.slack.app_token = secret_value(slack_app_token);
        }
        if let Some(slack_bot_token) = overrides.slack_bot_token {
            self.slack.bot_token = secret_value(slack_bot_token);
        }
        if let Some(github_token) = overrides.github_token {
            self.github.token = Some(secret_value(github_token));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_slack(&self.slack)?;
        validate_llm(&self.llm)?;
        validate_embedding(&self.embedding)?;
        validate_crawler(&self.crawler)?;
        validate_github(&self.github)?;
        validate_retrieval(&self.retrieval)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from(DEFAULT_CONFIG_FILE), Path::new("config").join(DEFAULT_CONFIG_FILE)]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    let app_token = slack.app_token.expose_secret();
    if app_token.is_empty() {
        return Err(ConfigError::Validation(
            "slack.app_token is required. Create an app-level token with `connections:write` under Basic Information > App-Level Tokens".to_string()
        ));
    }
    if !app_token.starts_with("xapp-") {
        let hint = if app_token.starts_with("xoxb-") {
            " (hint: you may have used the bot token instead of the app token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.app_token must start with `xapp-`{hint}"
        )));
    }

    let bot_token = slack.bot_token.expose_secret();
    if bot_token.is_empty() {
        return Err(ConfigError::Validation(
            "slack.bot_token is required. Copy the Bot User OAuth Token from OAuth & Permissions"
                .to_string(),
        ));
    }
    if !bot_token.starts_with("xoxb-") {
        let hint = if bot_token.starts_with("xapp-") {
            " (hint: you may have used the app token instead of the bot token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.bot_token must start with `xoxb-`{hint}"
        )));
    }

    Ok(())
}

fn is_blank_secret(value: Option<&SecretString>) -> bool {
    value.map(|secret| secret.expose_secret().trim().is_empty()).unwrap_or(true)
}

fn is_blank(value: Option<&String>) -> bool {
    value.map(|value| value.trim().is_empty()).unwrap_or(true)
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm.max_tokens must be greater than zero".to_string(),
        ));
    }
    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    match llm.provider {
        LlmProvider::Anthropic => {
            if is_blank_secret(llm.api_key.as_ref()) {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the anthropic provider".to_string(),
                ));
            }
        }
        LlmProvider::Vertex => {
            if is_blank(llm.project.as_ref()) {
                return Err(ConfigError::Validation(
                    "llm.project is required for the vertex provider (or set GOOGLE_CLOUD_PROJECT)"
                        .to_string(),
                ));
            }
            if is_blank(llm.region.as_ref()) {
                return Err(ConfigError::Validation(
                    "llm.region is required for the vertex provider (or set GOOGLE_CLOUD_REGION)"
                        .to_string(),
                ));
            }
            if let Some(path) = &llm.credentials_file {
                if !path.is_file() {
                    return Err(ConfigError::Validation(format!(
                        "llm.credentials_file `{}` does not exist (or unset it to use gcloud or metadata credentials)",
                        path.display()
                    )));
                }
            }
        }
    }

    if let Some(base_url) = &llm.base_url {
        validate_http_url("llm.base_url", base_url)?;
    }

    Ok(())
}

fn validate_embedding(embedding: &EmbeddingConfig) -> Result<(), ConfigError> {
    if embedding.dims == 0 {
        return Err(ConfigError::Validation(
            "embedding.dims must be greater than zero".to_string(),
        ));
    }
    if embedding.batch_size == 0 {
        return Err(ConfigError::Validation(
            "embedding.batch_size must be greater than zero".to_string(),
        ));
    }
    if embedding.provider == EmbeddingProvider::OpenAi && is_blank_secret(embedding.api_key.as_ref())
    {
        return Err(ConfigError::Validation(
            "embedding.api_key is required for the openai provider (or set OPENAI_API_KEY)"
                .to_string(),
        ));
    }
    if let Some(base_url) = &embedding.base_url {
        validate_http_url("embedding.base_url", base_url)?;
    }

    Ok(())
}

fn validate_crawler(crawler: &CrawlerConfig) -> Result<(), ConfigError> {
    if crawler.max_pages == 0 {
        return Err(ConfigError::Validation(
            "crawler.max_pages must be greater than zero".to_string(),
        ));
    }
    if crawler.timeout_secs == 0 || crawler.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "crawler.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if crawler.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "crawler.user_agent must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_github(github: &GithubConfig) -> Result<(), ConfigError> {
    validate_http_url("github.api_base_url", &github.api_base_url)?;
    if github.max_files == 0 {
        return Err(ConfigError::Validation(
            "github.max_files must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_retrieval(retrieval: &RetrievalConfig) -> Result<(), ConfigError> {
    if retrieval.top_k == 0 {
        return Err(ConfigError::Validation(
            "retrieval.top_k must be greater than zero".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&retrieval.min_score) {
        return Err(ConfigError::Validation(
            "retrieval.min_score must be in range 0.0..=1.0".to_string(),
        ));
    }
    if retrieval.max_context_chars == 0 {
        return Err(ConfigError::Validation(
            "retrieval.max_context_chars must be greater than zero".to_string(),
        ));
    }
    if retrieval.chunk_size == 0 {
        return Err(ConfigError::Validation(
            "retrieval.chunk_size must be greater than zero".to_string(),
        ));
    }
    if retrieval.chunk_overlap >= retrieval.chunk_size {
        return Err(ConfigError::Validation(
            "retrieval.chunk_overlap must be smaller than retrieval.chunk_size".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_http_url(key: &str, value: &str) -> Result<(), ConfigError> {
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(ConfigError::Validation(format!("{key} must start with http:// or https://")));
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| invalid_override(key, value))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    slack: Option<SlackPatch>,
    llm: Option<LlmPatch>,
    embedding: Option<EmbeddingPatch>,
    crawler: Option<CrawlerPatch>,
    github: Option<GithubPatch>,
    retrieval: Option<RetrievalPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    app_token: Option<String>,
    bot_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    project: Option<String>,
    region: Option<String>,
    access_token: Option<String>,
    credentials_file: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EmbeddingPatch {
    provider: Option<EmbeddingProvider>,
    model: Option<String>,
    dims: Option<usize>,
    base_url: Option<String>,
    api_key: Option<String>,
    batch_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct CrawlerPatch {
    max_pages: Option<usize>,
    max_depth: Option<usize>,
    user_agent: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GithubPatch {
    token: Option<String>,
    api_base_url: Option<String>,
    max_files: Option<usize>,
    max_issues: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RetrievalPatch {
    top_k: Option<usize>,
    min_score: Option<f32>,
    max_context_chars: Option<usize>,
    recent_turns: Option<usize>,
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
