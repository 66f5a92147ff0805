//! Layered TOML configuration.
//!
//! Resolution order, exactly the way the teacher's `Config::load` resolves
//! `.descartes/config.toml` then `~/.descartes/config.toml` then
//! `Config::default()`: a project-local `.phaseloop/config.toml` overlays a
//! hard-coded default; CLI flags are applied afterward by the caller for the
//! run in progress.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

fn default_reviewer_timeout_secs() -> u64 {
    120
}

fn default_author_timeout_secs() -> u64 {
    600
}

fn default_model() -> String {
    "claude/opus".to_string()
}

fn default_binary() -> String {
    "claude".to_string()
}

fn default_quality_gates() -> Vec<String> {
    vec!["cargo build".to_string(), "cargo test".to_string()]
}

fn default_reviews_dir() -> PathBuf {
    PathBuf::from(".phaseloop/reviews")
}

fn default_plans_dir() -> PathBuf {
    PathBuf::from(".phaseloop/plans")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_author_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            timeout_secs: default_author_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewerConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_reviewer_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ReviewerConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            timeout_secs: default_reviewer_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(default = "default_binary")]
    pub binary: String,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self { binary: default_binary() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub author: RoleConfig,
    #[serde(default)]
    pub reviewer: ReviewerConfig,
    #[serde(default)]
    pub adapter: AdapterConfig,

    #[serde(default = "default_quality_gates")]
    pub quality_gates: Vec<String>,

    #[serde(default = "default_max_quality_retries")]
    pub max_quality_retries: u32,
    #[serde(default = "default_max_review_iterations")]
    pub max_review_iterations: u32,
    #[serde(default = "default_max_auto_retries")]
    pub max_auto_retries: u32,

    #[serde(default = "default_plans_dir")]
    pub plans_dir: PathBuf,
    #[serde(default = "default_reviews_dir")]
    pub reviews_dir: PathBuf,

    /// `{phase}`-token review path template; see `plan::resolve_phase_review_path`.
    #[serde(default)]
    pub review_path_template: Option<String>,
}

fn default_max_quality_retries() -> u32 {
    2
}

fn default_max_review_iterations() -> u32 {
    5
}

fn default_max_auto_retries() -> u32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            author: RoleConfig::default(),
            reviewer: ReviewerConfig::default(),
            adapter: AdapterConfig::default(),
            quality_gates: default_quality_gates(),
            max_quality_retries: default_max_quality_retries(),
            max_review_iterations: default_max_review_iterations(),
            max_auto_retries: default_max_auto_retries(),
            plans_dir: default_plans_dir(),
            reviews_dir: default_reviews_dir(),
            review_path_template: None,
        }
    }
}

impl Config {
    /// Loads configuration: `path` if given, else `.phaseloop/config.toml`
    /// in the current directory, else `~/.phaseloop/config.toml`, else the
    /// hard-coded default.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(PathBuf::from).or_else(|| {
            let local = PathBuf::from(".phaseloop/config.toml");
            if local.exists() {
                return Some(local);
            }
            dirs::home_dir().map(|h| h.join(".phaseloop/config.toml"))
        });

        let config = match config_path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(&p)?;
                toml::from_str(&content)?
            }
            _ => Config::default(),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.author.timeout_secs == 0 || self.reviewer.timeout_secs == 0 {
            return Err(Error::Config("role timeouts must be greater than zero".to_string()));
        }
        Ok(())
    }

    pub fn author_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.author.timeout_secs)
    }

    pub fn reviewer_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reviewer.timeout_secs)
    }
}

/// Creates `.phaseloop/` with a default `config.toml`, matching the
/// teacher's `init()` but scoped to this crate's directory layout.
pub fn init(project_root: &Path) -> Result<()> {
    let phaseloop_dir = project_root.join(".phaseloop");
    std::fs::create_dir_all(&phaseloop_dir)?;
    std::fs::create_dir_all(phaseloop_dir.join("logs"))?;
    std::fs::create_dir_all(phaseloop_dir.join("plans"))?;
    std::fs::create_dir_all(phaseloop_dir.join("reviews"))?;

    let config_path = phaseloop_dir.join("config.toml");
    if !config_path.exists() {
        let default_config = Config::default();
        let toml_str = toml::to_string_pretty(&default_config).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(&config_path, toml_str)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reviewer.timeout_secs, 120);
    }

    #[test]
    fn load_falls_back_to_default_when_no_file_present() {
        let config = Config::load(Some(Path::new("/nonexistent/config.toml"))).unwrap();
        assert_eq!(config.max_quality_retries, 2);
    }

    #[test]
    fn loads_overrides_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_auto_retries = 9\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.max_auto_retries, 9);
        assert_eq!(config.max_quality_retries, 2);
    }

    #[test]
    fn init_creates_expected_layout() {
        let dir = tempfile::tempdir().unwrap();
        init(dir.path()).unwrap();
        assert!(dir.path().join(".phaseloop/config.toml").exists());
        assert!(dir.path().join(".phaseloop/logs").is_dir());
    }
}
