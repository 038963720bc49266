//! Layered configuration for Conduit.
//!
//! Settings resolve with precedence:
//! CLI flags > env vars > `~/.conduit/config.toml` > defaults

use conduit_api::Endpoint;
use conduit_mcp::{CollisionPolicy, McpConfig};
use conduit_types::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// The default OpenAI API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// The default model (or Azure deployment) to use.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Azure OpenAI API version used when none is configured.
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-05-01-preview";

pub use conduit_core::{DEFAULT_HISTORY_WINDOW, DEFAULT_MAX_TOOL_ROUNDS};

/// File name of the tool-server declarations inside the config dir.
pub const MCP_CONFIG_FILE: &str = "mcp_servers.json";

/// Resolved configuration for a Conduit session.
#[derive(Debug, Clone)]
pub struct ConduitConfig {
    pub api_key: String,
    pub model: String,
    pub endpoint: Endpoint,
    pub history_window: usize,
    pub max_tool_rounds: usize,
    pub tool_collision: CollisionPolicy,
    pub mcp_config_path: PathBuf,
    pub config_dir: PathBuf,
}

/// Settings that can be read from the TOML config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsFile {
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub conversation: ConversationSettings,
    #[serde(default)]
    pub mcp: McpSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiSettings {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// Azure OpenAI resource URL. When set, requests go to Azure.
    pub azure_endpoint: Option<String>,
    pub api_version: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationSettings {
    pub history_window: Option<usize>,
    pub max_tool_rounds: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct McpSettings {
    /// Path of the JSON server declarations.
    pub config: Option<PathBuf>,
    pub tool_collision: Option<CollisionPolicy>,
}

/// CLI overrides that take highest precedence.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub mcp_config: Option<PathBuf>,
}

impl ConduitConfig {
    /// Load configuration from all sources, applying precedence rules.
    ///
    /// Precedence (highest to lowest):
    /// 1. CLI flags
    /// 2. Environment variables
    /// 3. Global config (~/.conduit/config.toml)
    /// 4. Defaults
    pub fn load(overrides: CliOverrides) -> Result<Self, ConfigError> {
        let config_dir = config_dir();
        let settings = load_settings_file(&config_dir.join("config.toml"))?;
        Self::resolve(overrides, |key| std::env::var(key).ok(), settings, config_dir)
    }

    /// Resolve from explicit sources. `env` looks up an environment variable.
    pub fn resolve(
        overrides: CliOverrides,
        env: impl Fn(&str) -> Option<String>,
        settings: SettingsFile,
        config_dir: PathBuf,
    ) -> Result<Self, ConfigError> {
        let azure_endpoint = env("AZURE_OPENAI_ENDPOINT").or(settings.api.azure_endpoint);

        // Resolve API key: CLI > env > config file
        let env_key = if azure_endpoint.is_some() {
            env("AZURE_OPENAI_API_KEY").or_else(|| env("OPENAI_API_KEY"))
        } else {
            env("OPENAI_API_KEY")
        };
        let api_key = overrides
            .api_key
            .or(env_key)
            .or(settings.api.api_key)
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingKey {
                key: "api_key (set OPENAI_API_KEY or add to ~/.conduit/config.toml)".into(),
            })?;

        let model = overrides
            .model
            .or_else(|| env("CONDUIT_MODEL"))
            .or(settings.api.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let endpoint = match azure_endpoint {
            Some(resource_url) => Endpoint::Azure {
                resource_url,
                api_version: env("OPENAI_API_VERSION")
                    .or(settings.api.api_version)
                    .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
            },
            None => Endpoint::OpenAi {
                base_url: env("OPENAI_BASE_URL")
                    .or(settings.api.base_url)
                    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            },
        };

        let history_window = positive(
            "conversation.history_window",
            settings.conversation.history_window,
            DEFAULT_HISTORY_WINDOW,
        )?;
        let max_tool_rounds = positive(
            "conversation.max_tool_rounds",
            settings.conversation.max_tool_rounds,
            DEFAULT_MAX_TOOL_ROUNDS,
        )?;

        let mcp_config_path = overrides
            .mcp_config
            .or_else(|| env("CONDUIT_MCP_CONFIG").map(PathBuf::from))
            .or(settings.mcp.config)
            .unwrap_or_else(|| config_dir.join(MCP_CONFIG_FILE));

        Ok(ConduitConfig {
            api_key,
            model,
            endpoint,
            history_window,
            max_tool_rounds,
            tool_collision: settings.mcp.tool_collision.unwrap_or_default(),
            mcp_config_path,
            config_dir,
        })
    }

    /// Read the tool-server declarations this config points at.
    pub fn load_mcp_config(&self) -> Result<McpConfig, ConfigError> {
        load_mcp_config(&self.mcp_config_path)
    }
}

fn positive(key: &str, value: Option<usize>, default: usize) -> Result<usize, ConfigError> {
    match value {
        None => Ok(default),
        Some(0) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be at least 1".into(),
        }),
        Some(n) => Ok(n),
    }
}

/// Get the Conduit config directory path (~/.conduit/).
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CONDUIT_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".conduit")
}

/// Load and parse a TOML settings file. A missing file means defaults.
pub fn load_settings_file(path: &Path) -> Result<SettingsFile, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(SettingsFile::default()),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            });
        }
    };
    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Load the JSON tool-server declarations.
///
/// A missing file is not an error: Conduit then runs without tools.
pub fn load_mcp_config(path: &Path) -> Result<McpConfig, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(
                "No MCP server config at {}; continuing without tools",
                path.display()
            );
            return Ok(McpConfig::default());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            });
        }
    };
    McpConfig::from_json_str(&content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn resolve(
        overrides: CliOverrides,
        env: &[(&str, &str)],
        settings: SettingsFile,
    ) -> Result<ConduitConfig, ConfigError> {
        ConduitConfig::resolve(overrides, env_of(env), settings, PathBuf::from("/cfg"))
    }

    #[test]
    fn defaults_with_env_key() {
        let config = resolve(
            CliOverrides::default(),
            &[("OPENAI_API_KEY", "sk-env")],
            SettingsFile::default(),
        )
        .unwrap();
        assert_eq!(config.api_key, "sk-env");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(
            config.endpoint,
            Endpoint::OpenAi {
                base_url: DEFAULT_BASE_URL.into()
            }
        );
        assert_eq!(config.history_window, 20);
        assert_eq!(config.max_tool_rounds, 50);
        assert_eq!(config.tool_collision, CollisionPolicy::LastWins);
        assert_eq!(config.mcp_config_path, PathBuf::from("/cfg/mcp_servers.json"));
    }

    #[test]
    fn conversation_defaults_match_a_fresh_engine() {
        let config = resolve(
            CliOverrides::default(),
            &[("OPENAI_API_KEY", "sk-env")],
            SettingsFile::default(),
        )
        .unwrap();
        let provider = conduit_api::OpenAiProvider::new(&config.api_key, config.endpoint.clone())
            .unwrap();
        let engine = conduit_core::ConversationEngine::new(std::sync::Arc::new(provider), "m");
        assert_eq!(config.history_window, engine.history_window());
        assert_eq!(config.max_tool_rounds, engine.max_tool_rounds());
    }

    #[test]
    fn missing_key_is_an_error() {
        let err = resolve(CliOverrides::default(), &[], SettingsFile::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey { .. }));

        let err = resolve(
            CliOverrides::default(),
            &[("OPENAI_API_KEY", "  ")],
            SettingsFile::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey { .. }));
    }

    #[test]
    fn cli_beats_env_beats_file() {
        let settings: SettingsFile = toml::from_str(
            r#"
[api]
api_key = "sk-file"
model = "file-model"
base_url = "http://file/v1"
"#,
        )
        .unwrap();

        let from_file = resolve(CliOverrides::default(), &[], settings.clone()).unwrap();
        assert_eq!(from_file.api_key, "sk-file");
        assert_eq!(from_file.model, "file-model");
        assert_eq!(
            from_file.endpoint,
            Endpoint::OpenAi {
                base_url: "http://file/v1".into()
            }
        );

        let env = [
            ("OPENAI_API_KEY", "sk-env"),
            ("CONDUIT_MODEL", "env-model"),
            ("OPENAI_BASE_URL", "http://env/v1"),
        ];
        let from_env = resolve(CliOverrides::default(), &env, settings.clone()).unwrap();
        assert_eq!(from_env.api_key, "sk-env");
        assert_eq!(from_env.model, "env-model");
        assert_eq!(
            from_env.endpoint,
            Endpoint::OpenAi {
                base_url: "http://env/v1".into()
            }
        );

        let overrides = CliOverrides {
            api_key: Some("sk-cli".into()),
            model: Some("cli-model".into()),
            mcp_config: Some(PathBuf::from("/elsewhere/servers.json")),
        };
        let from_cli = resolve(overrides, &env, settings).unwrap();
        assert_eq!(from_cli.api_key, "sk-cli");
        assert_eq!(from_cli.model, "cli-model");
        assert_eq!(from_cli.mcp_config_path, PathBuf::from("/elsewhere/servers.json"));
    }

    #[test]
    fn azure_endpoint_switches_flavor() {
        let config = resolve(
            CliOverrides::default(),
            &[
                ("AZURE_OPENAI_ENDPOINT", "https://res.openai.azure.com"),
                ("AZURE_OPENAI_API_KEY", "az-key"),
                ("OPENAI_API_KEY", "sk-ignored"),
                ("CONDUIT_MODEL", "gpt4o-deployment"),
            ],
            SettingsFile::default(),
        )
        .unwrap();
        assert_eq!(config.api_key, "az-key");
        assert_eq!(config.model, "gpt4o-deployment");
        assert_eq!(
            config.endpoint,
            Endpoint::Azure {
                resource_url: "https://res.openai.azure.com".into(),
                api_version: DEFAULT_AZURE_API_VERSION.into(),
            }
        );
    }

    #[test]
    fn azure_from_file_with_version() {
        let settings: SettingsFile = toml::from_str(
            r#"
[api]
api_key = "k"
azure_endpoint = "https://res.openai.azure.com"
api_version = "2024-06-01"
"#,
        )
        .unwrap();
        let config = resolve(CliOverrides::default(), &[], settings).unwrap();
        assert!(matches!(
            config.endpoint,
            Endpoint::Azure { ref api_version, .. } if api_version == "2024-06-01"
        ));
    }

    #[test]
    fn conversation_and_mcp_sections() {
        let settings: SettingsFile = toml::from_str(
            r#"
[conversation]
history_window = 8
max_tool_rounds = 5

[mcp]
config = "/srv/mcp.json"
tool_collision = "reject"
"#,
        )
        .unwrap();
        let config = resolve(
            CliOverrides::default(),
            &[("OPENAI_API_KEY", "k")],
            settings,
        )
        .unwrap();
        assert_eq!(config.history_window, 8);
        assert_eq!(config.max_tool_rounds, 5);
        assert_eq!(config.tool_collision, CollisionPolicy::Reject);
        assert_eq!(config.mcp_config_path, PathBuf::from("/srv/mcp.json"));
    }

    #[test]
    fn zero_window_is_rejected() {
        let settings: SettingsFile = toml::from_str("[conversation]\nhistory_window = 0\n").unwrap();
        let err = resolve(
            CliOverrides::default(),
            &[("OPENAI_API_KEY", "k")],
            settings,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "conversation.history_window"));
    }

    #[test]
    fn settings_file_missing_or_broken() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let settings = load_settings_file(&path).unwrap();
        assert!(settings.api.api_key.is_none());

        std::fs::write(&path, "[api\nmodel = ").unwrap();
        assert!(matches!(
            load_settings_file(&path),
            Err(ConfigError::Parse { .. })
        ));

        std::fs::write(&path, "[api]\nmodel = \"gpt-4o-mini\"\n").unwrap();
        let settings = load_settings_file(&path).unwrap();
        assert_eq!(settings.api.model.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn mcp_config_file_is_read_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MCP_CONFIG_FILE);
        std::fs::write(
            &path,
            r#"{"mcpServers": {
                "zeta": {"command": "zeta-server"},
                "alpha": {"baseUrl": "http://localhost:8000/mcp", "isActive": false}
            }}"#,
        )
        .unwrap();

        let config = load_mcp_config(&path).unwrap();
        let ids: Vec<&str> = config.servers.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "alpha"]);
        assert_eq!(config.active_servers().count(), 1);
    }

    #[test]
    fn missing_mcp_config_means_no_servers() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_mcp_config(&dir.path().join("absent.json")).unwrap();
        assert!(config.servers.is_empty());
    }

    #[test]
    fn malformed_mcp_config_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MCP_CONFIG_FILE);
        std::fs::write(&path, "{\"mcpServers\": [").unwrap();
        assert!(matches!(load_mcp_config(&path), Err(ConfigError::Parse { .. })));
    }
}
