use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use navigator_core::config::{resolve_config_path, AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

struct Field {
    key: &'static str,
    env_key: Option<&'static str>,
    value: String,
}

impl Field {
    fn new(key: &'static str, env_key: Option<&'static str>, value: impl Into<String>) -> Self {
        Self { key, env_key, value: value.into() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(
            field.key,
            field.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    let api_key = match &config.llm.api_key {
        Some(key) => redact_secret(key.expose_secret()),
        None => "<unset>".to_string(),
    };

    vec![
        Field::new("database.url", Some("NAVIGATOR_DATABASE_URL"), config.database.url.as_str()),
        Field::new(
            "database.max_connections",
            Some("NAVIGATOR_DATABASE_MAX_CONNECTIONS"),
            config.database.max_connections.to_string(),
        ),
        Field::new(
            "database.timeout_secs",
            Some("NAVIGATOR_DATABASE_TIMEOUT_SECS"),
            config.database.timeout_secs.to_string(),
        ),
        Field::new(
            "server.bind_address",
            Some("NAVIGATOR_SERVER_BIND_ADDRESS"),
            config.server.bind_address.as_str(),
        ),
        Field::new("server.port", Some("NAVIGATOR_SERVER_PORT"), config.server.port.to_string()),
        Field::new("llm.enabled", Some("NAVIGATOR_LLM_ENABLED"), config.llm.enabled.to_string()),
        Field::new(
            "llm.endpoint",
            Some("NAVIGATOR_LLM_ENDPOINT"),
            config.llm.endpoint.as_deref().unwrap_or("<unset>"),
        ),
        Field::new("llm.model", Some("NAVIGATOR_LLM_MODEL"), config.llm.model.as_str()),
        Field::new("llm.api_key", Some("NAVIGATOR_LLM_API_KEY"), api_key),
        Field::new(
            "tools.base_url",
            Some("NAVIGATOR_TOOLS_BASE_URL"),
            config.tools.base_url.as_deref().unwrap_or("<demo collaborators>"),
        ),
        Field::new(
            "tools.timeout_ms",
            Some("NAVIGATOR_TOOLS_TIMEOUT_MS"),
            config.tools.timeout_ms.to_string(),
        ),
        Field::new(
            "tools.max_retries",
            Some("NAVIGATOR_TOOLS_MAX_RETRIES"),
            config.tools.max_retries.to_string(),
        ),
        Field::new(
            "orchestrator.agent_timeout_secs",
            Some("NAVIGATOR_ORCHESTRATOR_AGENT_TIMEOUT_SECS"),
            config.orchestrator.agent_timeout_secs.to_string(),
        ),
        Field::new(
            "orchestrator.max_handoffs_per_turn",
            None,
            config.orchestrator.max_handoffs_per_turn.to_string(),
        ),
        Field::new(
            "orchestrator.session_idle_timeout_secs",
            Some("NAVIGATOR_ORCHESTRATOR_SESSION_IDLE_TIMEOUT_SECS"),
            config.orchestrator.session_idle_timeout_secs.to_string(),
        ),
        Field::new(
            "safety.crisis.version",
            Some("NAVIGATOR_SAFETY_CRISIS_VERSION"),
            config.safety.crisis.version.as_str(),
        ),
        Field::new("logging.level", Some("NAVIGATOR_LOGGING_LEVEL"), config.logging.level.as_str()),
        Field::new(
            "logging.format",
            Some("NAVIGATOR_LOGGING_FORMAT"),
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("config file"));
            return format!("file ({})", file_path.display());
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: &str) -> String {
    if secret.trim().is_empty() {
        "<empty>".to_string()
    } else {
        "<redacted>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, redact_secret};

    #[test]
    fn nested_keys_are_found_in_config_documents() {
        let doc: Value = "[safety.crisis]\nversion = \"2025-01\"\n".parse().expect("toml");

        assert!(contains_path(&doc, "safety.crisis.version"));
        assert!(!contains_path(&doc, "safety.crisis.hotline"));
        assert!(!contains_path(&doc, "llm.model"));
    }

    #[test]
    fn secrets_never_render_their_value() {
        assert_eq!(redact_secret("sk-live-abc"), "<redacted>");
        assert_eq!(redact_secret("  "), "<empty>");
    }
}
