//! Typed configuration for docforge.
//!
//! Configuration is read once at startup from a TOML file (default
//! `~/.docforge.toml`, overridable with `DOCFORGE_CFG` or `--config`),
//! validated, and then shared by reference.
//!
//! # Configuration File Format
//!
//! ```toml
//! [default]
//! base_dir = "/var/lib/docforge"
//! log_level = "info"
//! default_branch = "master"
//! unallowed_names = ["admin", "api"]
//!
//! [nginx]
//! domain_suffix = "docs.example.com"
//! exec = "/usr/sbin/nginx"
//! ssl = false
//!
//! [api]
//! host = "127.0.0.1"
//! port = 5000
//!
//! [build]
//! command = ["bash", "/opt/docforge/builder.sh"]
//! max_concurrent = 4
//! log_output = false
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Reserved name that can never be used for a project.
pub const RESERVED_NAME: &str = "www";

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultSection {
    /// Root directory holding the store, built docs, nginx snippets and logs
    pub base_dir: PathBuf,
    /// Fallback log filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Branch used when a project doesn't name its latest branch
    #[serde(default = "default_branch")]
    pub default_branch: String,
    /// Names that cannot be registered (the reserved name is always added)
    #[serde(default)]
    pub unallowed_names: Vec<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_branch() -> String {
    "master".to_string()
}

/// Reverse-proxy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NginxSection {
    /// Suffix of every generated domain: `<project>.<domain_suffix>`
    #[serde(default = "default_domain_suffix")]
    pub domain_suffix: String,
    /// nginx executable (may include leading arguments); reload is skipped when unset
    #[serde(default)]
    pub exec: Option<String>,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub ssl_crt: Option<String>,
    #[serde(default)]
    pub ssl_key: Option<String>,
    #[serde(default)]
    pub ssl_hsts_maxage: u64,
}

fn default_domain_suffix() -> String {
    "localhost".to_string()
}

impl Default for NginxSection {
    fn default() -> Self {
        Self {
            domain_suffix: default_domain_suffix(),
            exec: None,
            ssl: false,
            ssl_crt: None,
            ssl_key: None,
            ssl_hsts_maxage: 0,
        }
    }
}

/// HTTP API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// External build command settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSection {
    /// Program and leading arguments; `-n -u -b -c` are appended per build
    #[serde(default = "default_build_command")]
    pub command: Vec<String>,
    /// Upper bound on builds running at the same time across all projects
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Also log every output line at debug level
    #[serde(default)]
    pub log_output: bool,
}

fn default_build_command() -> Vec<String> {
    vec!["bash".to_string(), "builder.sh".to_string()]
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            command: default_build_command(),
            max_concurrent: default_max_concurrent(),
            log_output: false,
        }
    }
}

/// Parsed `docforge.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub default: DefaultSection,
    #[serde(default)]
    pub nginx: NginxSection,
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub build: BuildSection,
    /// Path the configuration was loaded from; handed to the build command.
    #[serde(skip)]
    pub path: PathBuf,
}

impl Config {
    /// Default configuration rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            default: DefaultSection {
                base_dir: base_dir.into(),
                log_level: default_log_level(),
                default_branch: default_branch(),
                unallowed_names: Vec::new(),
            },
            nginx: NginxSection::default(),
            api: ApiSection::default(),
            build: BuildSection::default(),
            path: PathBuf::new(),
        }
    }

    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let path = expand_home(path);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config = Self::parse(&content)?;
        config.path = path;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content).context("Failed to parse docforge.toml")?;
        config.default.base_dir = expand_home(&config.default.base_dir);
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize docforge.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.default.base_dir.as_os_str().is_empty() {
            anyhow::bail!("default.base_dir must not be empty");
        }
        if self.build.command.is_empty() || self.build.command[0].trim().is_empty() {
            anyhow::bail!("build.command must name a program");
        }
        if self.build.max_concurrent == 0 {
            anyhow::bail!("build.max_concurrent must be at least 1");
        }
        if self.nginx.domain_suffix.trim().is_empty() {
            anyhow::bail!("nginx.domain_suffix must not be empty");
        }
        Ok(())
    }

    /// Denylisted project names, always including the reserved name.
    pub fn unallowed_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .default
            .unallowed_names
            .iter()
            .map(|n| n.trim().to_lowercase())
            .filter(|n| !n.is_empty())
            .collect();
        if !names.iter().any(|n| n == RESERVED_NAME) {
            names.push(RESERVED_NAME.to_string());
        }
        names
    }

    pub fn store_path(&self) -> PathBuf {
        self.default.base_dir.join(".docforge-projects.json")
    }

    pub fn docs_dir(&self) -> PathBuf {
        self.default.base_dir.join("docs")
    }

    pub fn nginx_dir(&self) -> PathBuf {
        self.default.base_dir.join("nginx")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.default.base_dir.join("logs")
    }

    /// Every section, one section, or one key of one section, as JSON.
    ///
    /// Section names match case-insensitively. `Ok(None)` means the section
    /// or key does not exist.
    pub fn query(&self, section: Option<&str>, key: Option<&str>) -> Result<Option<serde_json::Value>> {
        let all = serde_json::to_value(self).context("Failed to serialize configuration")?;
        let Some(section) = section else {
            return Ok(Some(all));
        };
        let Some(values) = all.get(section.trim().to_lowercase()) else {
            return Ok(None);
        };
        Ok(match key {
            Some(key) => values.get(key.trim()).cloned(),
            None => Some(values.clone()),
        })
    }

    /// Generated domain of a project.
    pub fn generated_domain(&self, name: &str) -> String {
        format!("{}.{}", name, self.nginx.domain_suffix)
    }
}

/// Location of the configuration file when none is given explicitly.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".docforge.toml"))
        .unwrap_or_else(|| PathBuf::from(".docforge.toml"))
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}
