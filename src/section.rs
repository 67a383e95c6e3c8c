//! Sections: named sources of request paths.
//!
//! A section pairs a name with a [`PathProvider`]. The provider is asked for
//! its paths at most once per run; [`Section::resolve`] memoizes the cleaned
//! result, since providers may be slow or have side effects.
//!
//! ## Cleaning
//!
//! Provider output is normalized before anyone sees it:
//!
//! - paths not starting with `/` are logged and dropped
//! - repeats within one section collapse to their first occurrence
//! - a provider failure is logged and the section contributes no paths
//!
//! Repeats *across* sections are left alone; each section publishes its own
//! list.
//!
//! ## Providers
//!
//! | Name | Config keys | Paths |
//! |------|-------------|-------|
//! | `list` | `paths` | inline list |
//! | `file` | `file` | one per line (`#` comments), or a `.json` array |
//! | `tree` | `root` | every file under `root`; `index.html` → its directory |

use crate::config::{ConfigError, SectionConfig};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse {path} as a JSON array of paths: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Source of request paths for one section.
pub trait PathProvider: Send {
    fn paths(&self) -> Result<Vec<String>, ProviderError>;
}

/// Inline list of paths.
#[derive(Debug, Clone)]
pub struct ListProvider {
    paths: Vec<String>,
}

impl ListProvider {
    pub fn new(paths: Vec<String>) -> Self {
        Self { paths }
    }
}

impl PathProvider for ListProvider {
    fn paths(&self) -> Result<Vec<String>, ProviderError> {
        Ok(self.paths.clone())
    }
}

/// Paths read from a file: plain text, or a JSON array when the file name
/// ends in `.json`.
#[derive(Debug, Clone)]
pub struct FileProvider {
    path: PathBuf,
}

impl FileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PathProvider for FileProvider {
    fn paths(&self) -> Result<Vec<String>, ProviderError> {
        let content = fs::read_to_string(&self.path).map_err(|source| ProviderError::Io {
            path: self.path.clone(),
            source,
        })?;
        let is_json = self
            .path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            return serde_json::from_str(&content).map_err(|source| ProviderError::Json {
                path: self.path.clone(),
                source,
            });
        }
        Ok(parse_path_lines(&content))
    }
}

/// One path per line; blank lines and `#` comments are skipped.
fn parse_path_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

/// Every file under a directory, as a site path.
#[derive(Debug, Clone)]
pub struct TreeProvider {
    root: PathBuf,
}

impl TreeProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl PathProvider for TreeProvider {
    fn paths(&self) -> Result<Vec<String>, ProviderError> {
        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(|source| ProviderError::Walk {
                path: self.root.clone(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&self.root) {
                paths.push(site_path(relative));
            }
        }
        Ok(paths)
    }
}

/// `a/b.css` → `/a/b.css`, `a/index.html` → `/a/`, `index.html` → `/`.
fn site_path(relative: &Path) -> String {
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    match parts.split_last() {
        Some((last, dirs)) if last == "index.html" => {
            if dirs.is_empty() {
                "/".to_string()
            } else {
                format!("/{}/", dirs.join("/"))
            }
        }
        _ => format!("/{}", parts.join("/")),
    }
}

/// A named provider plus its memoized, cleaned path list.
pub struct Section {
    name: String,
    provider: Box<dyn PathProvider>,
    resolved: Option<Vec<String>>,
}

impl Section {
    pub fn new(name: impl Into<String>, provider: Box<dyn PathProvider>) -> Self {
        Self {
            name: name.into(),
            provider,
            resolved: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The section's paths. The provider runs on the first call only.
    pub fn resolve(&mut self) -> &[String] {
        let name = &self.name;
        let provider = &self.provider;
        self.resolved.get_or_insert_with(|| {
            let raw = match provider.paths() {
                Ok(paths) => paths,
                Err(e) => {
                    warn!(
                        section = %name,
                        error = %e,
                        "Could not list paths; skipping section {name}"
                    );
                    Vec::new()
                }
            };
            let paths = clean_paths(name, raw);
            info!(section = %name, count = paths.len(), "Resolved paths for section {name}");
            paths
        })
    }
}

fn clean_paths(section: &str, raw: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut paths = Vec::with_capacity(raw.len());
    for path in raw {
        if !path.starts_with('/') {
            warn!(section, path = %path, "Skipping path that does not start with '/'");
            continue;
        }
        if seen.insert(path.clone()) {
            paths.push(path);
        }
    }
    paths
}

/// Builds a provider from its `[[sections]]` entry.
pub type ProviderConstructor = fn(&SectionConfig) -> Result<Box<dyn PathProvider>, ConfigError>;

/// Explicit provider name → constructor map.
#[derive(Clone)]
pub struct SectionRegistry {
    constructors: BTreeMap<String, ProviderConstructor>,
}

impl SectionRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// The `list`, `file` and `tree` providers.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("list", build_list);
        registry.register("file", build_file);
        registry.register("tree", build_tree);
        registry
    }

    pub fn register(&mut self, provider: &str, constructor: ProviderConstructor) {
        self.constructors.insert(provider.to_string(), constructor);
    }

    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    pub fn build(&self, config: &SectionConfig) -> Result<Section, ConfigError> {
        let constructor =
            self.constructors
                .get(&config.provider)
                .ok_or_else(|| ConfigError::UnknownProvider {
                    section: config.name.clone(),
                    provider: config.provider.clone(),
                    known: self.names().join(", "),
                })?;
        Ok(Section::new(config.name.clone(), constructor(config)?))
    }

    /// Build every configured section, in config order.
    pub fn build_all(&self, configs: &[SectionConfig]) -> Result<Vec<Section>, ConfigError> {
        configs.iter().map(|c| self.build(c)).collect()
    }
}

fn build_list(config: &SectionConfig) -> Result<Box<dyn PathProvider>, ConfigError> {
    Ok(Box::new(ListProvider::new(config.paths.clone())))
}

fn build_file(config: &SectionConfig) -> Result<Box<dyn PathProvider>, ConfigError> {
    let file = config.file.clone().ok_or_else(|| {
        ConfigError::Validation(format!(
            "section {:?}: the file provider needs `file`",
            config.name
        ))
    })?;
    Ok(Box::new(FileProvider::new(file)))
}

fn build_tree(config: &SectionConfig) -> Result<Box<dyn PathProvider>, ConfigError> {
    let root = config.root.clone().ok_or_else(|| {
        ConfigError::Validation(format!(
            "section {:?}: the tree provider needs `root`",
            config.name
        ))
    })?;
    Ok(Box::new(TreeProvider::new(root)))
}
