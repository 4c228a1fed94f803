use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub email: EmailConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Base URL for the completion/embedding provider (Ollama-compatible)
    pub llm_url: String,
    pub llm_model: String,
    pub embedding_model: String,
    /// Per-request timeout in seconds; a hung call becomes a stage fallback
    pub request_timeout_secs: u64,
    /// Qdrant endpoint; when unset the in-memory store is used
    pub qdrant_url: Option<String>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            llm_url: "http://127.0.0.1:11434".to_string(),
            llm_model: "qwen2.5:7b-instruct".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            request_timeout_secs: 30,
            qdrant_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Hard cutoff: matches below this never answer a question
    pub similarity_threshold: f32,
    pub top_k: usize,
    /// Retry budget for rate-limited embedding calls
    pub embed_retries: u32,
    /// Base backoff before the first retry, doubled per attempt
    pub embed_backoff_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            top_k: 3,
            embed_retries: 3,
            embed_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Pending requests older than this are swept to unresolved
    pub pending_timeout_mins: i64,
    /// Where the file-backed ledger keeps its state
    pub ledger_dir: Option<PathBuf>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            pending_timeout_mins: 15,
            ledger_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Idle sessions past this are evicted
    pub ttl_mins: i64,
    /// Turns retained per session; the persona turn is never pruned
    pub max_turns: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            ttl_mins: 30,
            max_turns: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmailConfig {
    /// Mail API endpoint; when unset, outbound email is disabled
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub from_address: Option<String>,
}

impl Config {
    /// Load configuration from file, creating default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            let config = Config::default();
            config.save()?;
            return Ok(config);
        }

        let contents = fs::read_to_string(&config_path)
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents)
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration from an explicit path; the file must exist
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .context("Failed to create config directory")?;
        }

        let toml_string = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        fs::write(&config_path, toml_string)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .context("Could not determine home directory")?;

        Ok(home.join(".salon-assist").join("config.toml"))
    }

    /// Ledger storage directory, defaulting next to the config file
    pub fn ledger_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.escalation.ledger_dir {
            return Ok(dir.clone());
        }
        let home = dirs::home_dir()
            .context("Could not determine home directory")?;
        Ok(home.join(".salon-assist").join("ledger"))
    }
}
