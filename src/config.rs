//! Configuration read from `.sandforge/sandforge.toml`.
//!
//! Values are layered file → environment → CLI. A missing file means
//! defaults throughout.
//!
//! ```toml
//! [classifier]
//! match_increment = 0.3
//! min_confidence = 0.3
//!
//! [sandbox]
//! lifetime_secs = 1800
//! install_timeout_secs = 180
//! install_command = "npm install --legacy-peer-deps"
//!
//! [generation]
//! command = "sandforge-gen"
//! args = ["--stream"]
//! model = "large"
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 500
//!
//! [history]
//! max_turns = 20
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::intent::ClassifierConfig;
use crate::orchestrator::{HistorySettings, RetryPolicy};
use crate::sandbox::SandboxSettings;

pub const CONFIG_DIR: &str = ".sandforge";
pub const CONFIG_FILE: &str = "sandforge.toml";

const DEFAULT_GENERATOR_CMD: &str = "sandforge-gen";

/// The `[generation]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationSection {
    /// Backend executable (default: "sandforge-gen")
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Opaque model selector passed through to the backend
    #[serde(default)]
    pub model: Option<String>,
}

/// Parsed `sandforge.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandforgeToml {
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub sandbox: SandboxSettings,
    #[serde(default)]
    pub generation: GenerationSection,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub history: HistorySettings,
}

impl SandforgeToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse sandforge.toml")
    }

    /// Load `sandforge.toml` from `config_dir`, or defaults when absent.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize sandforge.toml")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Generator command (file → `SANDFORGE_GENERATOR_CMD` → default).
    pub fn generator_cmd(&self) -> String {
        self.generation
            .command
            .clone()
            .or_else(|| std::env::var("SANDFORGE_GENERATOR_CMD").ok())
            .unwrap_or_else(|| DEFAULT_GENERATOR_CMD.to_string())
    }

    /// Model selector (file → `SANDFORGE_MODEL`).
    pub fn model(&self) -> Option<String> {
        self.generation
            .model
            .clone()
            .or_else(|| std::env::var("SANDFORGE_MODEL").ok())
            .filter(|m| !m.trim().is_empty())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let c = &self.classifier;

        for (name, value) in [
            ("match_increment", c.match_increment),
            ("min_confidence", c.min_confidence),
            ("project_type_bonus", c.project_type_bonus),
            ("fallback_confidence", c.fallback_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                warnings.push(format!(
                    "classifier.{} = {} is outside [0, 1]",
                    name, value
                ));
            }
        }
        if c.max_suggestions == 0 {
            warnings.push("classifier.max_suggestions = 0 disables all suggestions".to_string());
        }

        let s = &self.sandbox;
        if s.lifetime_secs == 0 {
            warnings.push("sandbox.lifetime_secs = 0 expires every session immediately".to_string());
        }
        if s.install_timeout_secs == 0 {
            warnings.push("sandbox.install_timeout_secs = 0 fails every install".to_string());
        }
        if s.install_timeout_secs > s.lifetime_secs {
            warnings.push(format!(
                "sandbox.install_timeout_secs ({}) exceeds lifetime_secs ({})",
                s.install_timeout_secs, s.lifetime_secs
            ));
        }
        if s.install_command.trim().is_empty() {
            warnings.push("sandbox.install_command is empty".to_string());
        }
        if s.read_extensions.is_empty() {
            warnings.push("sandbox.read_extensions is empty; no files will be read".to_string());
        }

        if self.retry.max_attempts == 0 {
            warnings.push("retry.max_attempts = 0 is treated as 1".to_string());
        }
        if self.history.max_turns == 0 {
            warnings.push("history.max_turns = 0 is treated as 1".to_string());
        }
        if self
            .generation
            .command
            .as_deref()
            .is_some_and(|c| c.trim().is_empty())
        {
            warnings.push("generation.command is empty".to_string());
        }

        warnings
    }
}

/// Configuration combined with runtime settings.
#[derive(Debug, Clone)]
pub struct SandforgeConfig {
    pub project_dir: PathBuf,
    /// `<project_dir>/.sandforge`
    pub config_dir: PathBuf,
    pub toml: SandforgeToml,
    pub verbose: bool,
    /// CLI override for the generator command
    pub cli_generator_cmd: Option<String>,
    /// CLI override for the model selector
    pub cli_model: Option<String>,
}

impl SandforgeConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let config_dir = project_dir.join(CONFIG_DIR);
        let toml = SandforgeToml::load_or_default(&config_dir)?;

        Ok(Self {
            project_dir,
            config_dir,
            toml,
            verbose: false,
            cli_generator_cmd: None,
            cli_model: None,
        })
    }

    pub fn with_cli_args(
        project_dir: PathBuf,
        verbose: bool,
        generator_cmd: Option<String>,
        model: Option<String>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        config.cli_generator_cmd = generator_cmd;
        config.cli_model = model;
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// Generator command (CLI → file → env → default).
    pub fn generator_cmd(&self) -> String {
        self.cli_generator_cmd
            .clone()
            .unwrap_or_else(|| self.toml.generator_cmd())
    }

    pub fn generator_args(&self) -> &[String] {
        &self.toml.generation.args
    }

    /// Model selector (CLI → file → env).
    pub fn model(&self) -> Option<String> {
        self.cli_model.clone().or_else(|| self.toml.model())
    }

    /// Directory holding local sandboxes.
    pub fn sandbox_root(&self) -> PathBuf {
        self.toml
            .sandbox
            .root_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("sandforge"))
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_empty_file_gives_defaults() {
        let toml = SandforgeToml::parse("").unwrap();
        assert_eq!(toml.classifier.match_increment, 0.3);
        assert_eq!(toml.classifier.min_confidence, 0.3);
        assert_eq!(toml.classifier.project_type_bonus, 0.2);
        assert_eq!(toml.sandbox.lifetime_secs, 1800);
        assert_eq!(toml.sandbox.install_timeout_secs, 180);
        assert_eq!(toml.sandbox.read_size_limit_bytes, 100 * 1024);
        assert_eq!(toml.retry.max_attempts, 3);
        assert_eq!(toml.retry.base_delay_ms, 500);
        assert_eq!(toml.history.max_turns, 20);
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let content = r#"
[classifier]
min_confidence = 0.5

[sandbox]
install_timeout_secs = 60
read_extensions = ["jsx", "css"]

[generation]
command = "my-gen"
args = ["--fast"]
"#;
        let toml = SandforgeToml::parse(content).unwrap();
        assert_eq!(toml.classifier.min_confidence, 0.5);
        assert_eq!(toml.classifier.match_increment, 0.3);
        assert_eq!(toml.sandbox.install_timeout_secs, 60);
        assert_eq!(toml.sandbox.lifetime_secs, 1800);
        assert_eq!(toml.sandbox.read_extensions, vec!["jsx", "css"]);
        assert_eq!(toml.generation.args, vec!["--fast"]);
        assert_eq!(toml.generator_cmd(), "my-gen");
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(SandforgeToml::parse("[sandbox\nlifetime_secs = ").is_err());
        assert!(SandforgeToml::parse("[retry]\nmax_attempts = \"three\"").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_DIR).join(CONFIG_FILE);

        let mut toml = SandforgeToml::default();
        toml.sandbox.lifetime_secs = 600;
        toml.generation.model = Some("small".into());
        toml.save(&path).unwrap();

        let loaded = SandforgeToml::load_or_default(&dir.path().join(CONFIG_DIR)).unwrap();
        assert_eq!(loaded.sandbox.lifetime_secs, 600);
        assert_eq!(loaded.generation.model.as_deref(), Some("small"));
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let toml = SandforgeToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml.retry, RetryPolicy::default());
    }

    #[test]
    fn test_generator_cmd_priority() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let saved = std::env::var("SANDFORGE_GENERATOR_CMD").ok();
        unsafe { std::env::remove_var("SANDFORGE_GENERATOR_CMD") };

        let toml = SandforgeToml::default();
        assert_eq!(toml.generator_cmd(), "sandforge-gen");

        unsafe { std::env::set_var("SANDFORGE_GENERATOR_CMD", "env-gen") };
        assert_eq!(toml.generator_cmd(), "env-gen");

        let toml = SandforgeToml::parse("[generation]\ncommand = \"file-gen\"").unwrap();
        assert_eq!(toml.generator_cmd(), "file-gen");

        unsafe { std::env::remove_var("SANDFORGE_GENERATOR_CMD") };
        if let Some(val) = saved {
            unsafe { std::env::set_var("SANDFORGE_GENERATOR_CMD", val) };
        }
    }

    #[test]
    fn test_cli_overrides_file_and_env() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let saved = std::env::var("SANDFORGE_MODEL").ok();
        unsafe { std::env::set_var("SANDFORGE_MODEL", "env-model") };

        let dir = tempdir().unwrap();
        let config = SandforgeConfig::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(config.model().as_deref(), Some("env-model"));

        let config = SandforgeConfig::with_cli_args(
            dir.path().to_path_buf(),
            true,
            Some("cli-gen".into()),
            Some("cli-model".into()),
        )
        .unwrap();
        assert!(config.verbose);
        assert_eq!(config.generator_cmd(), "cli-gen");
        assert_eq!(config.model().as_deref(), Some("cli-model"));

        unsafe { std::env::remove_var("SANDFORGE_MODEL") };
        if let Some(val) = saved {
            unsafe { std::env::set_var("SANDFORGE_MODEL", val) };
        }
    }

    #[test]
    fn test_validate_reports_suspicious_values() {
        let content = r#"
[classifier]
match_increment = 1.5

[sandbox]
lifetime_secs = 100
install_timeout_secs = 200

[retry]
max_attempts = 0
"#;
        let warnings = SandforgeToml::parse(content).unwrap().validate();
        assert_eq!(warnings.len(), 3);
        assert!(warnings[0].contains("match_increment"));
        assert!(warnings[1].contains("exceeds lifetime_secs"));
        assert!(warnings[2].contains("max_attempts"));
    }

    #[test]
    fn test_config_dir_layout() {
        let dir = tempdir().unwrap();
        let config = SandforgeConfig::new(dir.path().to_path_buf()).unwrap();
        assert!(config.config_dir.ends_with(".sandforge"));
        assert!(config.config_file().ends_with(".sandforge/sandforge.toml"));
    }
}
