use docket_core::generate::prompt::PromptSet;
use docket_core::ingest::{
    ColumnMap, DEFAULT_DATE_COLUMN, DEFAULT_INCLUDE_COLUMN, DEFAULT_ITEM_COLUMN,
    DEFAULT_NOTES_COLUMN, DEFAULT_SECTION_COLUMN,
};
use docket_core::model::{DEFAULT_OLLAMA_MODEL, DEFAULT_OPENAI_MODEL, ModelSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

const CONFIG_VERSION: u32 = 1;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("home directory not found; set HOME")]
    HomeMissing,
    #[error("config io error: {0}")]
    Io(#[from] io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("config validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub base_dir: PathBuf,
    pub config_path: PathBuf,
    pub reports_dir: PathBuf,
}

impl ConfigPaths {
    pub fn from_home() -> Result<Self, ConfigError> {
        let home = std::env::var("HOME").map_err(|_| ConfigError::HomeMissing)?;
        Ok(Self::from_base(PathBuf::from(home).join(".docket")))
    }

    pub fn from_base(base_dir: PathBuf) -> Self {
        let config_path = base_dir.join("config.toml");
        let reports_dir = base_dir.join("reports");
        Self {
            base_dir,
            config_path,
            reports_dir,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: u32,
    pub model: ModelConfig,
    pub columns: ColumnsConfig,
    pub prompts: PromptsConfig,
    pub output: OutputConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            model: ModelConfig::default(),
            columns: ColumnsConfig::default(),
            prompts: PromptsConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Which profile runs: `local` (ollama) or `server` (OpenAI-compatible).
    pub active: String,
    pub local: ProviderConfig,
    pub server: ProviderConfig,
    pub load_timeout_secs: u64,
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            active: "local".to_string(),
            local: ProviderConfig {
                provider: "ollama".to_string(),
                model: DEFAULT_OLLAMA_MODEL.to_string(),
                base_url: String::new(),
                api_key: String::new(),
            },
            server: ProviderConfig {
                provider: "openai".to_string(),
                model: DEFAULT_OPENAI_MODEL.to_string(),
                base_url: "http://localhost:8080/v1".to_string(),
                api_key: String::new(),
            },
            load_timeout_secs: 120,
            max_tokens: 10_000,
        }
    }
}

impl ModelConfig {
    pub fn profile(&self, mode: &str) -> &ProviderConfig {
        if mode == "server" {
            &self.server
        } else {
            &self.local
        }
    }

    pub fn profile_mut(&mut self, mode: &str) -> &mut ProviderConfig {
        if mode == "server" {
            &mut self.server
        } else {
            &mut self.local
        }
    }

    pub fn active_profile(&self) -> &ProviderConfig {
        self.profile(self.active.as_str())
    }

    pub fn active_profile_mut(&mut self) -> &mut ProviderConfig {
        let active = self.active.clone();
        self.profile_mut(&active)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub api_key: String,
}

impl ProviderConfig {
    pub fn to_spec(&self) -> ModelSpec {
        ModelSpec {
            provider: self.provider.clone(),
            model: non_empty(&self.model),
            base_url: non_empty(&self.base_url),
            api_key: non_empty(&self.api_key),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnsConfig {
    pub date: String,
    pub section: String,
    pub item: String,
    pub notes: String,
    pub include: String,
}

impl Default for ColumnsConfig {
    fn default() -> Self {
        Self {
            date: DEFAULT_DATE_COLUMN.to_string(),
            section: DEFAULT_SECTION_COLUMN.to_string(),
            item: DEFAULT_ITEM_COLUMN.to_string(),
            notes: DEFAULT_NOTES_COLUMN.to_string(),
            include: DEFAULT_INCLUDE_COLUMN.to_string(),
        }
    }
}

impl ColumnsConfig {
    pub fn to_column_map(&self) -> ColumnMap {
        ColumnMap {
            date: self.date.trim().to_string(),
            section: self.section.trim().to_string(),
            item: self.item.trim().to_string(),
            notes: self.notes.trim().to_string(),
            include: self.include.trim().to_string(),
        }
    }

    fn entries(&self) -> [(&'static str, &str); 5] {
        [
            ("columns.date", self.date.as_str()),
            ("columns.section", self.section.as_str()),
            ("columns.item", self.item.as_str()),
            ("columns.notes", self.notes.as_str()),
            ("columns.include", self.include.as_str()),
        ]
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Optional file replacing the built-in summarization template.
    pub summarize_file: String,
    /// Optional file replacing the built-in formatting template.
    pub format_file: String,
    pub ignore_brackets: bool,
}

impl PromptsConfig {
    /// Built-in templates with any configured file overrides applied.
    pub fn load(&self, paths: &ConfigPaths) -> Result<PromptSet, ConfigError> {
        let mut prompts = PromptSet::default();
        if let Some(path) = resolve_path(paths, &self.summarize_file) {
            prompts.summarize = read_template("prompts.summarize_file", &path)?;
        }
        if let Some(path) = resolve_path(paths, &self.format_file) {
            prompts.format = read_template("prompts.format_file", &path)?;
        }
        prompts
            .validate()
            .map_err(|e| ConfigError::Validation(format!("prompt template: {e}")))?;
        Ok(prompts)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for exported documents; relative paths resolve under the config dir.
    pub export_dir: String,
}

impl OutputConfig {
    pub fn export_dir(&self, paths: &ConfigPaths) -> Option<PathBuf> {
        resolve_path(paths, &self.export_dir)
    }
}

impl Config {
    pub fn load_or_create(paths: &ConfigPaths) -> Result<Self, ConfigError> {
        ensure_dirs(paths)?;
        if paths.config_path.exists() {
            let config = Self::load(paths)?;
            return Ok(config);
        }

        let config = Self::default();
        Self::write(paths, &config)?;
        Ok(config)
    }

    pub fn load(paths: &ConfigPaths) -> Result<Self, ConfigError> {
        ensure_dirs(paths)?;
        let content = fs::read_to_string(&paths.config_path)?;
        let raw: toml::Value = toml::from_str(&content)?;
        let file_version = raw
            .get("version")
            .and_then(|value| value.as_integer())
            .unwrap_or(0) as u32;

        let mut config: Config = toml::from_str(&content)?;
        let mut migrated = false;

        if file_version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
            migrated = true;
        } else if file_version > CONFIG_VERSION {
            warn!(file_version, supported = CONFIG_VERSION, "config version is newer than supported; proceeding");
        }

        warn_if_loose_permissions(&paths.config_path)?;

        if migrated {
            Self::write(paths, &config)?;
        }

        Ok(config)
    }

    pub fn write(paths: &ConfigPaths, config: &Config) -> Result<(), ConfigError> {
        ensure_dirs(paths)?;
        let content = toml::to_string_pretty(config)?;
        write_atomic(&paths.config_path, content.as_bytes())?;
        Ok(())
    }

    pub fn redacted(&self) -> Self {
        let mut redacted = self.clone();
        redact_provider(&mut redacted.model.local);
        redact_provider(&mut redacted.model.server);
        redacted
    }

    pub fn validate(&self, paths: &ConfigPaths) -> Result<(), ConfigError> {
        validate_active("model.active", self.model.active.as_str())?;
        validate_model_profile("model.local", &self.model.local)?;
        validate_model_profile("model.server", &self.model.server)?;

        if self.model.load_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "model.load_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.model.max_tokens == 0 {
            return Err(ConfigError::Validation(
                "model.max_tokens must be greater than 0".into(),
            ));
        }

        let mut seen = HashSet::new();
        for (label, column) in self.columns.entries() {
            let column = column.trim();
            if column.is_empty() {
                return Err(ConfigError::Validation(format!("{label} must not be empty")));
            }
            if !seen.insert(column) {
                return Err(ConfigError::Validation(format!(
                    "{label} duplicates another column ({column})"
                )));
            }
        }

        self.prompts.load(paths)?;
        Ok(())
    }
}

fn ensure_dirs(paths: &ConfigPaths) -> Result<(), ConfigError> {
    fs::create_dir_all(&paths.base_dir)?;
    fs::create_dir_all(&paths.reports_dir)?;
    Ok(())
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), ConfigError> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::other("config path missing parent directory"))?;
    let tmp_path = parent.join("config.toml.tmp");
    fs::write(&tmp_path, contents)?;
    set_strict_permissions(&tmp_path)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn set_strict_permissions(path: &Path) -> Result<(), ConfigError> {
    #[cfg(unix)]
    {
        let perm = fs::Permissions::from_mode(0o600);
        fs::set_permissions(path, perm)?;
    }
    Ok(())
}

fn warn_if_loose_permissions(path: &Path) -> Result<(), ConfigError> {
    #[cfg(unix)]
    {
        let metadata = fs::metadata(path)?;
        let mode = metadata.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            warn!(
                path = %path.display(),
                "config file is group/world readable; set permissions to 0600"
            );
        }
    }
    Ok(())
}

fn read_template(label: &str, path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|e| {
        ConfigError::Validation(format!("{label} could not be read ({}): {e}", path.display()))
    })
}

pub fn resolve_path(paths: &ConfigPaths, value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let path = PathBuf::from(trimmed);
    if path.is_absolute() {
        Some(path)
    } else {
        Some(paths.base_dir.join(path))
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn validate_active(field: &str, value: &str) -> Result<(), ConfigError> {
    match value {
        "local" | "server" => Ok(()),
        other => Err(ConfigError::Validation(format!(
            "{field} must be local or server (got {other})"
        ))),
    }
}

fn validate_model_profile(label: &str, profile: &ProviderConfig) -> Result<(), ConfigError> {
    match profile.provider.as_str() {
        "ollama" | "openai" => {}
        other => {
            return Err(ConfigError::Validation(format!(
                "{label}.provider must be ollama or openai (got {other})"
            )));
        }
    }

    if profile.model.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "{label}.model must not be empty"
        )));
    }
    let base_url = profile.base_url.trim();
    if !base_url.is_empty() && !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "{label}.base_url must start with http:// or https://"
        )));
    }
    Ok(())
}

fn redact_provider(profile: &mut ProviderConfig) {
    if !profile.api_key.trim().is_empty() {
        profile.api_key = "<redacted>".to_string();
    }
}
