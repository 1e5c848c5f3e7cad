use serde::Deserialize;
use std::fs::File;
use std::path::Path;

#[derive(Deserialize, Debug, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 8000,
        }
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StoreConfig {
    /// Messages live in process memory and are gone after a restart.
    #[default]
    Memory,
    /// Messages live in one JSON file of a GitHub repository.
    Github(GitHubConfig),
}

impl StoreConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreConfig::Memory => "memory",
            StoreConfig::Github(_) => "github",
        }
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct GitHubConfig {
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_commit_message")]
    pub commit_message: String,
    pub token: Option<String>,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Times an append re-reads and retries after losing a write race.
    /// Zero drops the message on the first conflict.
    #[serde(default)]
    pub max_conflict_retries: u32,
}

fn default_path() -> String {
    "messages.json".into()
}

fn default_branch() -> String {
    "main".into()
}

fn default_api_url() -> String {
    "https://api.github.com".into()
}

fn default_commit_message() -> String {
    "Update chat log".into()
}

fn default_token_env() -> String {
    "GITHUB_CHAT_TOKEN".into()
}

impl GitHubConfig {
    /// The inline `token` wins over the environment variable.
    pub fn resolve_token(&self) -> Result<String, ConfigError> {
        if let Some(token) = self.token.as_ref().filter(|t| !t.trim().is_empty()) {
            return Ok(token.clone());
        }

        match std::env::var(&self.token_env) {
            Ok(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(ConfigError::MissingToken {
                env: self.token_env.clone(),
            }),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("no GitHub token configured, set `token` or the {env} environment variable")]
    MissingToken { env: String },
}
