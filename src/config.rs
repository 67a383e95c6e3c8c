//! Run configuration.
//!
//! Loaded from a single TOML file (default `pagepress.toml`). Every key is
//! optional and falls back to the stock default; unknown keys are rejected to
//! catch typos early. Settings a backend cannot work without are checked by
//! [`Config::validate`] before any work begins.
//!
//! ## Configuration Options
//!
//! ```toml
//! deploy_dir = "dist"          # Destination root (disk, platform)
//! backend = "disk"             # disk | object-storage | platform
//! url_prefix = ""              # Prepended to request paths, e.g. "/site"
//!
//! [source]
//! base_url = "http://127.0.0.1:8000"
//! timeout_secs = 30
//! user_agent = "pagepress"
//!
//! [processing]
//! parallel = false             # Render paths on a worker pool
//! max_workers = 4              # Omit for auto = CPU cores
//!
//! [object_storage]
//! bucket = "www.example.com"
//! region = "eu-west-1"
//! distribution_id = "E2QWRUHAPOMQZL"
//! error_document = "500.html"
//!
//! [platform]
//! app_id = "my-site"
//! index_depth = 10
//!
//! [[sections]]
//! name = "pages"
//! provider = "list"
//! paths = ["/", "/about/"]
//! ```

use crate::fetch::HttpSource;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default config file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "pagepress.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("unknown backend {name:?} (known: {known})")]
    UnknownBackend { name: String, known: String },
    #[error("section {section:?} uses unknown provider {provider:?} (known: {known})")]
    UnknownProvider {
        section: String,
        provider: String,
        known: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Destination root for the disk and platform backends.
    pub deploy_dir: PathBuf,
    /// Registry name of the backend to publish with.
    pub backend: String,
    /// Prefix applied to request paths before they reach the application.
    pub url_prefix: String,
    pub source: SourceConfig,
    pub processing: ProcessingConfig,
    pub object_storage: ObjectStorageConfig,
    pub platform: PlatformConfig,
    pub sections: Vec<SectionConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            deploy_dir: PathBuf::from("dist"),
            backend: "disk".to_string(),
            url_prefix: String::new(),
            source: SourceConfig::default(),
            processing: ProcessingConfig::default(),
            object_storage: ObjectStorageConfig::default(),
            platform: PlatformConfig::default(),
            sections: Vec::new(),
        }
    }
}

impl Config {
    /// Validate values and the settings the selected backend requires.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = &self.source.base_url;
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "source.base_url must be an http(s) URL, got {base:?}"
            )));
        }
        if self.source.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "source.timeout_secs must be greater than 0".into(),
            ));
        }
        if self.processing.max_workers == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_workers must be greater than 0".into(),
            ));
        }

        let storage = &self.object_storage;
        if storage.access_key_id.is_some() != storage.secret_access_key.is_some() {
            return Err(ConfigError::Validation(
                "object_storage.access_key_id and secret_access_key must be set together".into(),
            ));
        }
        if storage.error_document.trim_matches('/').is_empty() {
            return Err(ConfigError::Validation(
                "object_storage.error_document must name an object key".into(),
            ));
        }
        match self.backend.as_str() {
            "object-storage" if storage.bucket.is_empty() => {
                return Err(ConfigError::Validation(
                    "object_storage.bucket must be set for the object-storage backend".into(),
                ));
            }
            "platform" if self.platform.app_id.is_empty() => {
                return Err(ConfigError::Validation(
                    "platform.app_id must be set for the platform backend".into(),
                ));
            }
            _ => {}
        }
        if self.platform.index_depth == 0 {
            return Err(ConfigError::Validation(
                "platform.index_depth must be at least 1".into(),
            ));
        }

        let mut names = HashSet::new();
        for section in &self.sections {
            if section.name.is_empty() {
                return Err(ConfigError::Validation("section name must not be empty".into()));
            }
            if !names.insert(section.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate section name {:?}",
                    section.name
                )));
            }
        }
        Ok(())
    }

    /// Client settings for the content-producing application.
    pub fn http_source(&self) -> HttpSource {
        HttpSource {
            base_url: self.source.base_url.clone(),
            url_prefix: self.url_prefix.clone(),
            timeout: Duration::from_secs(self.source.timeout_secs),
            user_agent: self.source.user_agent.clone(),
        }
    }
}

/// Where pages are fetched from.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            timeout_secs: 30,
            user_agent: concat!("pagepress/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Parallel rendering settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Render on a worker pool instead of sequentially.
    pub parallel: bool,
    /// Maximum number of workers. When absent, defaults to the number of
    /// CPU cores. Values larger than the core count are clamped down.
    pub max_workers: Option<usize>,
}

/// Resolve the effective worker count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_workers(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_workers.map(|n| n.min(cores)).unwrap_or(cores)
}

/// S3 bucket and optional CloudFront distribution.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObjectStorageConfig {
    pub bucket: String,
    /// Falls back to the AWS environment/profile region.
    pub region: Option<String>,
    /// Static credentials; when absent the AWS default chain is used.
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// CloudFront distribution to invalidate after publishing.
    pub distribution_id: Option<String>,
    /// Key website hosting serves when a request fails.
    pub error_document: String,
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: None,
            access_key_id: None,
            secret_access_key: None,
            distribution_id: None,
            error_document: "500.html".to_string(),
        }
    }
}

/// App Engine deploy directory settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformConfig {
    pub app_id: String,
    /// How many nested directory levels the `index.html` folding handlers cover.
    pub index_depth: usize,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            index_depth: 10,
        }
    }
}

/// One `[[sections]]` entry. Which of the optional keys are required depends
/// on the provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SectionConfig {
    pub name: String,
    pub provider: String,
    /// `list` provider: inline paths.
    #[serde(default)]
    pub paths: Vec<String>,
    /// `file` provider: text or JSON file of paths.
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// `tree` provider: directory whose files become paths.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

/// Load and validate a config file.
///
/// A missing file yields the stock defaults; a present but invalid one is an
/// error.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let config = if path.exists() {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)?
    } else {
        Config::default()
    };
    config.validate()?;
    Ok(config)
}

/// Returns a fully-commented stock `pagepress.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# pagepress configuration
# =======================
# All settings are optional. Values shown are the defaults.
# Unknown keys will cause an error.

# Destination root for the disk and platform backends.
deploy_dir = "dist"

# Where to publish: "disk", "object-storage" or "platform".
backend = "disk"

# Prefix prepended to every request path before it reaches the application,
# e.g. "/site" when the application is mounted below the root. Output file
# names never include it.
url_prefix = ""

# ---------------------------------------------------------------------------
# Content source (the running application)
# ---------------------------------------------------------------------------
[source]
base_url = "http://127.0.0.1:8000"
timeout_secs = 30

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Render paths on a pool of workers instead of one by one.
parallel = false
# Maximum workers. Omit to auto-detect (= number of CPU cores).
# max_workers = 4

# ---------------------------------------------------------------------------
# object-storage backend (S3 + optional CloudFront)
# ---------------------------------------------------------------------------
[object_storage]
# Required for the object-storage backend.
bucket = ""
# region = "us-east-1"
# Static credentials; omit both to use the AWS default credential chain.
# access_key_id = ""
# secret_access_key = ""
# CloudFront distribution to invalidate after publishing.
# distribution_id = ""
# Object served by website hosting when a request fails.
error_document = "500.html"

# ---------------------------------------------------------------------------
# platform backend (App Engine app.yaml)
# ---------------------------------------------------------------------------
[platform]
# Required for the platform backend.
app_id = ""
# Directory depth covered by the index.html folding handlers.
index_depth = 10

# ---------------------------------------------------------------------------
# Sections: where paths come from
# ---------------------------------------------------------------------------
# [[sections]]
# name = "pages"
# provider = "list"
# paths = ["/", "/about/"]
#
# [[sections]]
# name = "archive"
# provider = "file"          # one path per line, or a .json array
# file = "paths.txt"
#
# [[sections]]
# name = "assets"
# provider = "tree"          # every file under root becomes a path
# root = "public"
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.deploy_dir, PathBuf::from("dist"));
        assert_eq!(config.backend, "disk");
        assert_eq!(config.source.base_url, "http://127.0.0.1:8000");
        assert!(!config.processing.parallel);
        assert_eq!(config.platform.index_depth, 10);
        assert_eq!(config.object_storage.error_document, "500.html");
        assert!(config.sections.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn parse_partial_config() {
        let config: Config = toml::from_str(
            r#"
backend = "platform"
[platform]
app_id = "my-site"
"#,
        )
        .unwrap();
        assert_eq!(config.backend, "platform");
        assert_eq!(config.platform.app_id, "my-site");
        assert_eq!(config.platform.index_depth, 10);
        assert_eq!(config.source.timeout_secs, 30);
    }

    #[test]
    fn parse_sections() {
        let config: Config = toml::from_str(
            r#"
[[sections]]
name = "pages"
provider = "list"
paths = ["/", "/about/"]

[[sections]]
name = "archive"
provider = "file"
file = "paths.txt"
"#,
        )
        .unwrap();
        assert_eq!(config.sections.len(), 2);
        assert_eq!(config.sections[0].paths, vec!["/", "/about/"]);
        assert_eq!(config.sections[1].file, Some(PathBuf::from("paths.txt")));
        config.validate().unwrap();
    }

    #[test]
    fn unknown_key_rejected() {
        let result: Result<Config, _> = toml::from_str("deploy_directory = \"x\"");
        assert!(result.is_err());
    }

    #[test]
    fn unknown_nested_key_rejected() {
        let result: Result<Config, _> = toml::from_str("[source]\nhost = \"x\"");
        assert!(result.is_err());
    }

    #[test]
    fn object_storage_requires_bucket() {
        let config = Config {
            backend: "object-storage".into(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn error_document_override_and_validation() {
        let config: Config =
            toml::from_str("[object_storage]\nerror_document = \"404.html\"").unwrap();
        assert_eq!(config.object_storage.error_document, "404.html");
        config.validate().unwrap();

        let mut config = Config::default();
        config.object_storage.error_document = "/".into();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn platform_requires_app_id() {
        let config = Config {
            backend: "platform".into(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn credentials_must_come_in_pairs() {
        let mut config = Config::default();
        config.object_storage.access_key_id = Some("AKIA".into());
        assert!(config.validate().is_err());
        config.object_storage.secret_access_key = Some("secret".into());
        config.validate().unwrap();
    }

    #[test]
    fn duplicate_section_names_rejected() {
        let config: Config = toml::from_str(
            r#"
[[sections]]
name = "a"
provider = "list"
[[sections]]
name = "a"
provider = "list"
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn base_url_must_be_http() {
        let mut config = Config::default();
        config.source.base_url = "localhost:8000".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_values_rejected() {
        let mut config = Config::default();
        config.processing.max_workers = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.platform.index_depth = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.source.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn effective_workers_clamped_to_cores() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let auto = ProcessingConfig::default();
        assert_eq!(effective_workers(&auto), cores);

        let huge = ProcessingConfig {
            parallel: true,
            max_workers: Some(100_000),
        };
        assert_eq!(effective_workers(&huge), cores);

        let one = ProcessingConfig {
            parallel: true,
            max_workers: Some(1),
        };
        assert_eq!(effective_workers(&one), 1);
    }

    #[test]
    fn http_source_carries_prefix_and_timeout() {
        let config = Config {
            url_prefix: "/site".into(),
            ..Config::default()
        };
        let source = config.http_source();
        assert_eq!(source.url_prefix, "/site");
        assert_eq!(source.timeout, Duration::from_secs(30));
        assert_eq!(source.url_for("/a/"), "http://127.0.0.1:8000/site/a/");
    }

    #[test]
    fn load_config_missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join("nope.toml")).unwrap();
        assert_eq!(config.backend, "disk");
    }

    #[test]
    fn load_config_reads_and_validates() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pagepress.toml");
        fs::write(&path, "backend = \"object-storage\"\n").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Validation(_))));

        fs::write(&path, "backend = \"disk\"\ndeploy_dir = \"out\"\n").unwrap();
        assert_eq!(load_config(&path).unwrap().deploy_dir, PathBuf::from("out"));
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("pagepress.toml");
        fs::write(&path, "backend = ").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn stock_config_toml_parses_to_defaults() {
        let config: Config = toml::from_str(stock_config_toml()).unwrap();
        let defaults = Config::default();
        assert_eq!(config.deploy_dir, defaults.deploy_dir);
        assert_eq!(config.backend, defaults.backend);
        assert_eq!(config.source.base_url, defaults.source.base_url);
        assert_eq!(config.platform.index_depth, defaults.platform.index_depth);
        assert_eq!(
            config.object_storage.error_document,
            defaults.object_storage.error_document
        );
        assert_eq!(config.processing.max_workers, None);
        config.validate().unwrap();
    }
}
