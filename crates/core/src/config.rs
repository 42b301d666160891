use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::safety::CrisisResources;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub tools: ToolsConfig,
    pub orchestrator: OrchestratorConfig,
    pub safety: SafetyConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

/// Optional language-model classifier used by triage when keywords are inconclusive.
#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub enabled: bool,
    pub endpoint: Option<String>,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct ToolsConfig {
    /// Collaborator base URL. Unset means the in-process demo collaborators are used.
    pub base_url: Option<String>,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub default_search_distance_miles: u32,
}

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub agent_timeout_secs: u64,
    pub max_consecutive_failures: u32,
    pub max_handoffs_per_turn: u32,
    pub max_input_chars: usize,
    pub session_idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SafetyConfig {
    pub crisis: CrisisResources,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
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
    pub server_port: Option<u16>,
    pub llm_enabled: Option<bool>,
    pub llm_endpoint: Option<String>,
    pub tools_base_url: Option<String>,
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

pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["navigator.toml", "config/navigator.toml"];

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://navigator.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            llm: LlmConfig {
                enabled: false,
                endpoint: None,
                api_key: None,
                model: "triage-classifier".to_string(),
                timeout_secs: 5,
                max_retries: 1,
            },
            tools: ToolsConfig {
                base_url: None,
                timeout_ms: 5_000,
                max_retries: 2,
                initial_backoff_ms: 200,
                max_backoff_ms: 2_000,
                backoff_multiplier: 2.0,
                default_search_distance_miles: 25,
            },
            orchestrator: OrchestratorConfig {
                agent_timeout_secs: 20,
                max_consecutive_failures: 2,
                max_handoffs_per_turn: 3,
                max_input_chars: 4_000,
                session_idle_timeout_secs: 1_800,
                sweep_interval_secs: 60,
            },
            safety: SafetyConfig { crisis: CrisisResources::default() },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
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

impl ToolsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl OrchestratorConfig {
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
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
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILES[0]));
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

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(enabled) = llm.enabled {
                self.llm.enabled = enabled;
            }
            if let Some(endpoint) = llm.endpoint {
                self.llm.endpoint = Some(endpoint);
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(SecretString::from(api_key));
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(tools) = patch.tools {
            if let Some(base_url) = tools.base_url {
                self.tools.base_url = Some(base_url);
            }
            if let Some(timeout_ms) = tools.timeout_ms {
                self.tools.timeout_ms = timeout_ms;
            }
            if let Some(max_retries) = tools.max_retries {
                self.tools.max_retries = max_retries;
            }
            if let Some(initial_backoff_ms) = tools.initial_backoff_ms {
                self.tools.initial_backoff_ms = initial_backoff_ms;
            }
            if let Some(max_backoff_ms) = tools.max_backoff_ms {
                self.tools.max_backoff_ms = max_backoff_ms;
            }
            if let Some(backoff_multiplier) = tools.backoff_multiplier {
                self.tools.backoff_multiplier = backoff_multiplier;
            }
            if let Some(distance) = tools.default_search_distance_miles {
                self.tools.default_search_distance_miles = distance;
            }
        }

        if let Some(orchestrator) = patch.orchestrator {
            if let Some(agent_timeout_secs) = orchestrator.agent_timeout_secs {
                self.orchestrator.agent_timeout_secs = agent_timeout_secs;
            }
            if let Some(max_consecutive_failures) = orchestrator.max_consecutive_failures {
                self.orchestrator.max_consecutive_failures = max_consecutive_failures;
            }
            if let Some(max_handoffs_per_turn) = orchestrator.max_handoffs_per_turn {
                self.orchestrator.max_handoffs_per_turn = max_handoffs_per_turn;
            }
            if let Some(max_input_chars) = orchestrator.max_input_chars {
                self.orchestrator.max_input_chars = max_input_chars;
            }
            if let Some(idle) = orchestrator.session_idle_timeout_secs {
                self.orchestrator.session_idle_timeout_secs = idle;
            }
            if let Some(sweep_interval_secs) = orchestrator.sweep_interval_secs {
                self.orchestrator.sweep_interval_secs = sweep_interval_secs;
            }
        }

        if let Some(safety) = patch.safety {
            if let Some(crisis) = safety.crisis {
                if let Some(version) = crisis.version {
                    self.safety.crisis.version = version;
                }
                if let Some(message) = crisis.message {
                    self.safety.crisis.message = message;
                }
                if let Some(hotline) = crisis.hotline {
                    self.safety.crisis.hotline = hotline;
                }
                if let Some(text_line) = crisis.text_line {
                    self.safety.crisis.text_line = text_line;
                }
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
        if let Some(value) = read_env("NAVIGATOR_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("NAVIGATOR_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("NAVIGATOR_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("NAVIGATOR_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("NAVIGATOR_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("NAVIGATOR_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("NAVIGATOR_SERVER_PORT") {
            self.server.port = parse_u16("NAVIGATOR_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("NAVIGATOR_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("NAVIGATOR_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("NAVIGATOR_LLM_ENABLED") {
            self.llm.enabled = parse_bool("NAVIGATOR_LLM_ENABLED", &value)?;
        }
        if let Some(value) = read_env("NAVIGATOR_LLM_ENDPOINT") {
            self.llm.endpoint = Some(value);
        }
        if let Some(value) = read_env("NAVIGATOR_LLM_API_KEY") {
            self.llm.api_key = Some(SecretString::from(value));
        }
        if let Some(value) = read_env("NAVIGATOR_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("NAVIGATOR_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("NAVIGATOR_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("NAVIGATOR_TOOLS_BASE_URL") {
            self.tools.base_url = Some(value);
        }
        if let Some(value) = read_env("NAVIGATOR_TOOLS_TIMEOUT_MS") {
            self.tools.timeout_ms = parse_u64("NAVIGATOR_TOOLS_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("NAVIGATOR_TOOLS_MAX_RETRIES") {
            self.tools.max_retries = parse_u32("NAVIGATOR_TOOLS_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("NAVIGATOR_ORCHESTRATOR_AGENT_TIMEOUT_SECS") {
            self.orchestrator.agent_timeout_secs =
                parse_u64("NAVIGATOR_ORCHESTRATOR_AGENT_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("NAVIGATOR_ORCHESTRATOR_SESSION_IDLE_TIMEOUT_SECS") {
            self.orchestrator.session_idle_timeout_secs =
                parse_u64("NAVIGATOR_ORCHESTRATOR_SESSION_IDLE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("NAVIGATOR_SAFETY_CRISIS_VERSION") {
            self.safety.crisis.version = value;
        }

        let log_level =
            read_env("NAVIGATOR_LOGGING_LEVEL").or_else(|| read_env("NAVIGATOR_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("NAVIGATOR_LOGGING_FORMAT").or_else(|| read_env("NAVIGATOR_LOG_FORMAT"));
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
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(enabled) = overrides.llm_enabled {
            self.llm.enabled = enabled;
        }
        if let Some(endpoint) = overrides.llm_endpoint {
            self.llm.endpoint = Some(endpoint);
        }
        if let Some(base_url) = overrides.tools_base_url {
            self.tools.base_url = Some(base_url);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_llm(&self.llm)?;
        validate_tools(&self.tools)?;
        validate_orchestrator(&self.orchestrator)?;
        validate_tool_budget(&self.tools, &self.orchestrator)?;
        validate_safety(&self.safety)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    DEFAULT_CONFIG_FILES.iter().map(PathBuf::from).find(|path| path.exists())
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

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.enabled {
        let endpoint = llm.endpoint.as_deref().map(str::trim).unwrap_or_default();
        if endpoint.is_empty() {
            return Err(ConfigError::Validation(
                "llm.endpoint is required when llm.enabled is true".to_string(),
            ));
        }
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.endpoint must start with http:// or https://".to_string(),
            ));
        }
        let blank_key =
            llm.api_key.as_ref().map(|key| key.expose_secret().trim().is_empty()).unwrap_or(false);
        if blank_key {
            return Err(ConfigError::Validation(
                "llm.api_key is set but empty; remove it or provide a key".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_tools(tools: &ToolsConfig) -> Result<(), ConfigError> {
    if let Some(base_url) = &tools.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "tools.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    if tools.timeout_ms == 0 || tools.timeout_ms > 120_000 {
        return Err(ConfigError::Validation(
            "tools.timeout_ms must be in range 1..=120000".to_string(),
        ));
    }

    if tools.max_retries > 10 {
        return Err(ConfigError::Validation("tools.max_retries must be at most 10".to_string()));
    }

    if tools.initial_backoff_ms > tools.max_backoff_ms {
        return Err(ConfigError::Validation(
            "tools.initial_backoff_ms must not exceed tools.max_backoff_ms".to_string(),
        ));
    }

    if !tools.backoff_multiplier.is_finite() || tools.backoff_multiplier < 1.0 {
        return Err(ConfigError::Validation(
            "tools.backoff_multiplier must be a finite number >= 1.0".to_string(),
        ));
    }

    if tools.default_search_distance_miles == 0 {
        return Err(ConfigError::Validation(
            "tools.default_search_distance_miles must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_orchestrator(orchestrator: &OrchestratorConfig) -> Result<(), ConfigError> {
    if orchestrator.agent_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "orchestrator.agent_timeout_secs must be greater than zero".to_string(),
        ));
    }

    if orchestrator.max_consecutive_failures == 0 {
        return Err(ConfigError::Validation(
            "orchestrator.max_consecutive_failures must be greater than zero".to_string(),
        ));
    }

    if orchestrator.max_input_chars == 0 {
        return Err(ConfigError::Validation(
            "orchestrator.max_input_chars must be greater than zero".to_string(),
        ));
    }

    if orchestrator.session_idle_timeout_secs == 0 || orchestrator.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "orchestrator idle timeout and sweep interval must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

/// Every attempt timing out plus every backoff between them.
pub fn worst_case_tool_budget_ms(tools: &ToolsConfig) -> u64 {
    let attempts = u64::from(tools.max_retries) + 1;
    let mut total = tools.timeout_ms.saturating_mul(attempts);
    let mut delay = tools.initial_backoff_ms as f64;
    for _ in 0..tools.max_retries {
        total = total.saturating_add(delay.min(tools.max_backoff_ms as f64) as u64);
        delay *= tools.backoff_multiplier;
    }
    total
}

/// An agent timeout inside a booking call would drop its outcome, so the
/// agent budget has to cover the slowest possible tool call.
fn validate_tool_budget(
    tools: &ToolsConfig,
    orchestrator: &OrchestratorConfig,
) -> Result<(), ConfigError> {
    let budget_ms = worst_case_tool_budget_ms(tools);
    if orchestrator.agent_timeout_secs.saturating_mul(1_000) <= budget_ms {
        return Err(ConfigError::Validation(format!(
            "orchestrator.agent_timeout_secs must exceed the worst-case tool budget of \
             {budget_ms}ms (tools.timeout_ms, tools.max_retries and backoff)"
        )));
    }
    Ok(())
}

fn validate_safety(safety: &SafetyConfig) -> Result<(), ConfigError> {
    let crisis = &safety.crisis;
    let missing = [
        ("safety.crisis.version", crisis.version.as_str()),
        ("safety.crisis.message", crisis.message.as_str()),
        ("safety.crisis.hotline", crisis.hotline.as_str()),
        ("safety.crisis.text_line", crisis.text_line.as_str()),
    ]
    .into_iter()
    .find(|(_, value)| value.trim().is_empty());

    if let Some((key, _)) = missing {
        return Err(ConfigError::Validation(format!(
            "{key} must not be empty; the crisis payload is returned on every escalation"
        )));
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

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    llm: Option<LlmPatch>,
    tools: Option<ToolsPatch>,
    orchestrator: Option<OrchestratorPatch>,
    safety: Option<SafetyPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    enabled: Option<bool>,
    endpoint: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolsPatch {
    base_url: Option<String>,
    timeout_ms: Option<u64>,
    max_retries: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    backoff_multiplier: Option<f64>,
    default_search_distance_miles: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct OrchestratorPatch {
    agent_timeout_secs: Option<u64>,
    max_consecutive_failures: Option<u32>,
    max_handoffs_per_turn: Option<u32>,
    max_input_chars: Option<usize>,
    session_idle_timeout_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SafetyPatch {
    crisis: Option<CrisisPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct CrisisPatch {
    version: Option<String>,
    message: Option<String>,
    hotline: Option<String>,
    text_line: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{
        worst_case_tool_budget_ms, AppConfig, ConfigError, ConfigOverrides, LoadOptions,
        LogFormat,
    };

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid_and_use_demo_collaborators() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.tools.base_url.is_none(), "no collaborator url by default")?;
        ensure(!config.llm.enabled, "llm classifier is opt-in")?;
        ensure(
            config.orchestrator.max_consecutive_failures == 2,
            "circuit breaker defaults to two consecutive failures",
        )?;
        ensure(config.safety.crisis.is_complete(), "default crisis payload is complete")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_NAVIGATOR_LLM_KEY", "key-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("navigator.toml");
            fs::write(
                &path,
                r#"
[llm]
enabled = true
endpoint = "http://localhost:9090/classify"
api_key = "${TEST_NAVIGATOR_LLM_KEY}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            let key = config.llm.api_key.as_ref().map(|key| key.expose_secret().to_string());
            ensure(key.as_deref() == Some("key-from-env"), "api key should be interpolated")?;
            ensure(config.llm.enabled, "llm should be enabled from file")?;
            Ok(())
        })();

        clear_vars(&["TEST_NAVIGATOR_LLM_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("NAVIGATOR_LOG_LEVEL", "warn");
        env::set_var("NAVIGATOR_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["NAVIGATOR_LOG_LEVEL", "NAVIGATOR_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("NAVIGATOR_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("NAVIGATOR_TOOLS_MAX_RETRIES", "4");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("navigator.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[tools]
max_retries = 1
timeout_ms = 750

[orchestrator]
max_handoffs_per_turn = 4

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.tools.max_retries == 4, "env retries should win over file")?;
            ensure(config.tools.timeout_ms == 750, "file timeout should win over default")?;
            ensure(
                config.orchestrator.max_handoffs_per_turn == 4,
                "file handoff bound should win over default",
            )?;
            Ok(())
        })();

        clear_vars(&["NAVIGATOR_DATABASE_URL", "NAVIGATOR_TOOLS_MAX_RETRIES"]);
        result
    }

    #[test]
    fn empty_crisis_hotline_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("navigator.toml");
        fs::write(
            &path,
            r#"
[safety.crisis]
version = "2025.2"
hotline = "   "
"#,
        )
        .map_err(|err| err.to_string())?;

        let error =
            match AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
            {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("safety.crisis.hotline")
        );
        ensure(has_message, "validation failure should mention safety.crisis.hotline")
    }

    #[test]
    fn invalid_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("NAVIGATOR_SERVER_PORT", "not-a-port");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected env override failure".to_string()),
                Err(error) => error,
            };
            let names_variable = matches!(
                error,
                ConfigError::InvalidEnvOverride { ref key, .. } if key == "NAVIGATOR_SERVER_PORT"
            );
            ensure(names_variable, "error should name the offending variable")
        })();

        clear_vars(&["NAVIGATOR_SERVER_PORT"]);
        result
    }

    #[test]
    fn enabled_llm_requires_endpoint() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let error = match AppConfig::load(LoadOptions {
            overrides: ConfigOverrides { llm_enabled: Some(true), ..ConfigOverrides::default() },
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected validation failure".to_string()),
            Err(error) => error,
        };
        let has_message = matches!(
            error,
            ConfigError::Validation(ref message) if message.contains("llm.endpoint")
        );
        ensure(has_message, "validation failure should mention llm.endpoint")
    }

    #[test]
    fn agent_timeout_must_cover_the_tool_retry_budget() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("NAVIGATOR_TOOLS_TIMEOUT_MS", "10000");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected validation failure".to_string()),
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message)
                    if message.contains("agent_timeout_secs") && message.contains("30600ms")
            );
            ensure(has_message, "validation failure should name the agent timeout and budget")?;

            let defaults = AppConfig::default();
            ensure(
                worst_case_tool_budget_ms(&defaults.tools) == 15_600,
                "three 5s attempts plus 200ms and 400ms of backoff",
            )
        })();

        clear_vars(&["NAVIGATOR_TOOLS_TIMEOUT_MS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("NAVIGATOR_LLM_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")
        })();

        clear_vars(&["NAVIGATOR_LLM_API_KEY"]);
        result
    }
}
