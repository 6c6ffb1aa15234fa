use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PalaverError, Result};

/// Configuration for the chat engine.
///
/// Loaded from a TOML file by the host application. Each section covers one
/// concern; all fields default so a partial file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub timeline: TimelineConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

impl ChatConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ChatConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// Core engine limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum prior messages the backend is asked to consider per request.
    pub max_context_messages: usize,
    /// Maximum messages kept in memory per conversation before eviction.
    pub max_log_messages: usize,
    /// Maximum user message length in characters.
    pub max_message_length: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_context_messages: 30,
            max_log_messages: 500,
            max_message_length: 4000,
        }
    }
}

/// Pacing of the visible phase timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Minimum visible duration per display phase, in milliseconds.
    pub min_phase_ms: u64,
    /// How long the completed/failed phase lingers before the display
    /// returns to idle, in milliseconds.
    pub completed_linger_ms: u64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            min_phase_ms: 450,
            completed_linger_ms: 600,
        }
    }
}

/// Outbound agent transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Agent backend endpoint URL.
    pub endpoint: String,
    /// Optional bearer token.
    pub api_key: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8787/agent/chat".to_string(),
            api_key: None,
            timeout_secs: 60,
        }
    }
}

// =============================================================================
// Agent preferences
// =============================================================================

/// Per-agent toggles the user controls from the dashboard.
///
/// Passed into the orchestrator at construction time rather than read from
/// ambient global state; persisted through a [`PreferenceStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentPreferences {
    /// Whether extended reasoning is requested from the backend.
    pub reasoning_enabled: bool,
    /// Reasoning effort threshold forwarded to the backend.
    pub reasoning_threshold: f64,
    /// Whether web-search tooling is allowed for this agent.
    pub web_search_enabled: bool,
}

impl Default for AgentPreferences {
    fn default() -> Self {
        Self {
            reasoning_enabled: true,
            reasoning_threshold: 0.5,
            web_search_enabled: true,
        }
    }
}

/// Key-value persistence for per-agent preferences.
pub trait PreferenceStore: Send + Sync {
    /// Load the stored preferences for an agent, if any.
    fn load(&self, agent_id: &str) -> Option<AgentPreferences>;
    /// Persist preferences for an agent.
    fn store(&self, agent_id: &str, prefs: &AgentPreferences) -> Result<()>;
}

/// TOML-file-backed preference store: one table per agent id.
#[derive(Debug)]
pub struct TomlPreferenceStore {
    path: PathBuf,
}

impl TomlPreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_all(&self) -> HashMap<String, AgentPreferences> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => return HashMap::new(),
        };
        match toml::from_str(&content) {
            Ok(map) => map,
            Err(e) => {
                warn!(
                    "Failed to parse preferences from {}: {}. Starting empty.",
                    self.path.display(),
                    e
                );
                HashMap::new()
            }
        }
    }
}

impl PreferenceStore for TomlPreferenceStore {
    fn load(&self, agent_id: &str) -> Option<AgentPreferences> {
        self.read_all().remove(agent_id)
    }

    fn store(&self, agent_id: &str, prefs: &AgentPreferences) -> Result<()> {
        let mut all = self.read_all();
        all.insert(agent_id.to_string(), prefs.clone());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(&all)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

/// In-memory preference store for tests and in-process hosts.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    prefs: Mutex<HashMap<String, AgentPreferences>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn load(&self, agent_id: &str) -> Option<AgentPreferences> {
        self.prefs
            .lock()
            .ok()
            .and_then(|map| map.get(agent_id).cloned())
    }

    fn store(&self, agent_id: &str, prefs: &AgentPreferences) -> Result<()> {
        let mut map = self
            .prefs
            .lock()
            .map_err(|e| PalaverError::Storage(format!("preference lock poisoned: {}", e)))?;
        map.insert(agent_id.to_string(), prefs.clone());
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
