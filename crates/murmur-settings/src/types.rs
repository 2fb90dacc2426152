//! Settings tree. Every section uses `#[serde(default)]` so a partial
//! `settings.json` fills in the rest from compiled defaults.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MurmurSettings {
    pub server: ServerSettings,
    pub agent: AgentSettings,
    pub client: ClientSettings,
    pub logging: LoggingSettings,
}

/// Where the chat server listens.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

/// Upstream agent runtime. Without a URL the server runs the built-in demo agent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    pub server_url: String,
    pub show_intermediate_steps: bool,
    /// Lower bound of the pause between replayed steps.
    pub replay_min_ms: u64,
    /// Upper bound (inclusive) of the pause between replayed steps.
    pub replay_max_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8787".to_string(),
            show_intermediate_steps: false,
            replay_min_ms: 1000,
            replay_max_ms: 2000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `trace`, `debug`, `info`, `warn` or `error`.
    pub level: String,
    pub json: bool,
    /// Persist warn+ events to the SQLite log database.
    pub persist: bool,
    /// Overrides `~/.murmur/logs.db`.
    pub db_path: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            persist: true,
            db_path: None,
        }
    }
}
