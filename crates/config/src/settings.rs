// Application settings
// Loaded from ~/.config/sheetchat/settings.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// AI provider selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AIProvider {
    /// AI features disabled (default)
    #[default]
    None,
    /// OpenAI-compatible chat completions API
    #[serde(rename = "openai")]
    OpenAI,
}

impl AIProvider {
    /// Returns true if AI features are enabled
    pub fn is_enabled(&self) -> bool {
        !matches!(self, AIProvider::None)
    }

    /// Returns the default model for this provider
    pub fn default_model(&self) -> &'static str {
        match self {
            AIProvider::None => "",
            AIProvider::OpenAI => "gpt-4o-mini",
        }
    }

    /// Lowercase name used for key lookup and display
    pub fn name(&self) -> &'static str {
        match self {
            AIProvider::None => "none",
            AIProvider::OpenAI => "openai",
        }
    }

    pub fn default_endpoint(&self) -> &'static str {
        match self {
            AIProvider::None => "",
            AIProvider::OpenAI => "https://api.openai.com/v1",
        }
    }
}

/// AI-specific settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AISettings {
    /// Selected AI provider
    pub provider: AIProvider,

    /// Model identifier (provider-specific)
    pub model: String,

    /// Base URL of the API, for self-hosted or proxied endpoints
    pub endpoint: Option<String>,

    /// Sampling temperature sent with every request
    pub temperature: f32,

    /// Privacy mode: only the first rows of the table go into prompts
    pub privacy_mode: bool,
}

impl Default for AISettings {
    fn default() -> Self {
        Self {
            provider: AIProvider::None,
            model: String::new(), // Empty = use provider default
            endpoint: None,
            temperature: 0.3,
            privacy_mode: true,
        }
    }
}

impl AISettings {
    /// Get the effective model (user-specified or provider default)
    pub fn effective_model(&self) -> &str {
        if self.model.is_empty() {
            self.provider.default_model()
        } else {
            &self.model
        }
    }

    /// Get the effective API base URL
    pub fn effective_endpoint(&self) -> &str {
        match self.endpoint.as_deref() {
            Some(e) if !e.trim().is_empty() => e,
            _ => self.provider.default_endpoint(),
        }
    }
}

/// Where generated code runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionBackend {
    /// Sandboxed Lua VM on a worker thread
    #[default]
    InProcess,
    /// Same sandbox, inside a child process that is killed on timeout
    ChildProcess,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    pub backend: ExecutionBackend,

    /// Wall-clock limit for one run of generated code
    pub timeout_secs: u64,

    /// Automatic correction rounds after a failed run
    pub max_retries: u32,

    /// Lua VM instruction budget per run
    pub instruction_limit: i64,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            backend: ExecutionBackend::InProcess,
            timeout_secs: 10,
            max_retries: 2,
            instruction_limit: 100_000_000,
        }
    }
}

impl ExecutionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Language of prompts and messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Fr,
}

impl Language {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" | "english" => Some(Language::En),
            "fr" | "french" | "francais" | "français" => Some(Language::Fr),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(rename = "language")]
    pub language: Language,

    // History
    #[serde(rename = "history.undoDepth")]
    pub undo_depth: usize,

    #[serde(rename = "execution")]
    pub execution: ExecutionSettings,

    // AI
    #[serde(rename = "ai")]
    pub ai: AISettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            language: Language::En,
            undo_depth: 100,
            execution: ExecutionSettings::default(),
            ai: AISettings::default(),
        }
    }
}

const DEFAULT_CONFIG: &str = r#"{
    // Prompt and message language: "en" or "fr"
    "language": "en",

    // Number of cell edits that can be undone
    "history.undoDepth": 100,

    // Generated code execution
    // backend: "in_process" (sandboxed VM on a worker thread)
    //          "child_process" (same sandbox in a separate process)
    "execution": {
        "backend": "in_process",
        "timeout_secs": 10,
        "max_retries": 2
    },

    // AI (disabled by default)
    // Provider options: "none", "openai"
    // API keys are stored in system keychain, not in this file
    "ai": {
        "provider": "none",
        "model": "",
        "temperature": 0.3,
        "privacy_mode": true
    }
}
"#;

impl Settings {
    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sheetchat");
        config_dir.join("settings.json")
    }

    /// Load settings from disk, falling back to defaults
    pub fn load() -> Self {
        let path = Self::config_path();

        if !path.exists() {
            let settings = Self::default();
            settings.create_default_file(&path);
            return settings;
        }

        Self::load_from(&path)
    }

    /// Load settings from a specific file, falling back to defaults
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    log::warn!("Error parsing {}: {}", path.display(), e);
                    log::warn!("Using default settings");
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Error reading {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Parse settings JSON. Lines starting with `//` are comments.
    pub fn parse(contents: &str) -> Result<Self, String> {
        let cleaned: String = contents
            .lines()
            .filter(|line| !line.trim().starts_with("//"))
            .collect::<Vec<_>>()
            .join("\n");

        serde_json::from_str(&cleaned).map_err(|e| e.to_string())
    }

    /// Save current settings to disk
    pub fn save(&self) -> Result<(), String> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        // Ensure directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| e.to_string())?;

        fs::write(path, json).map_err(|e| e.to_string())
    }

    /// Create default settings file with comments
    fn create_default_file(&self, path: &Path) {
        // Ensure directory exists
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                log::warn!("Error creating config directory: {}", e);
                return;
            }
        }

        if let Err(e) = fs::write(path, DEFAULT_CONFIG) {
            log::warn!("Error writing default settings.json: {}", e);
        }
    }

    /// Get the config file path for display/opening
    pub fn config_path_display() -> String {
        Self::config_path().to_string_lossy().to_string()
    }
}
