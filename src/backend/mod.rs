//! Publishing backends.
//!
//! A backend takes one request path, fetches it, and durably stores the result
//! somewhere. Three backends ship with the crate:
//!
//! | Name | Type | Destination |
//! |------|------|-------------|
//! | `disk` | [`DiskBackend`] | files under `deploy_dir` |
//! | `object-storage` | [`ObjectStorageBackend`] | S3 objects, optional CloudFront invalidation |
//! | `platform` | [`PlatformBackend`] | App Engine `app.yaml` + `deploy/` tree |
//!
//! # Lifecycle
//!
//! ```text
//! initialize_output()            once, before any page
//! publish(path)                  once per path, possibly from many threads
//! finish_section(name, results)  once per section, after its pool run
//! finalize_output()              once, after every section
//! ```
//!
//! One backend instance serves every section of a run. State that must
//! survive across sections (the S3 backend's list of published paths) lives
//! in a [`PublishedPaths`] accumulator owned by the session and handed to the
//! backend when it is built.
//!
//! # Registry
//!
//! Backends are selected by name from a [`BackendRegistry`]. The built-in
//! registry knows the three names above; embedders can register more.

pub mod disk;
pub mod object_storage;
pub mod platform;

pub use disk::DiskBackend;
pub use object_storage::{ObjectStorageBackend, StoreError};
pub use platform::PlatformBackend;

use crate::config::{Config, ConfigError};
use crate::fetch::{FetchError, PageFetcher};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Failure while publishing a single path. Always recovered by the pool.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("could not write {location}")]
    Write {
        location: String,
        #[source]
        source: std::io::Error,
    },
    #[error("output path {0:?} escapes the destination root")]
    UnsafePath(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure in a once-per-run lifecycle hook.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a backend did with a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishAction {
    /// Written to a file (unconditional overwrite).
    Written,
    /// Uploaded to a key that did not exist yet.
    Created,
    /// Re-uploaded because the stored checksum differed.
    Updated,
    /// Stored checksum matched; nothing was sent.
    Unchanged,
}

/// Outcome of one successful [`Backend::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub path: String,
    /// Backend-specific location: file path or object key.
    pub location: String,
    pub content_type: String,
    pub action: PublishAction,
}

pub trait Backend: Send + Sync {
    /// Registry name, used in logs and the run report.
    fn name(&self) -> &'static str;

    /// Prepare the destination. Must tolerate an existing destination.
    fn initialize_output(&self) -> Result<(), BackendError>;

    /// Fetch `path` through `fetcher` and store it.
    fn publish(&self, fetcher: &mut PageFetcher, path: &str) -> Result<Published, PublishError>;

    /// Called after all paths of one section were attempted. `published`
    /// holds the successful outcomes only.
    fn finish_section(&self, _section: &str, _published: &[Published]) -> Result<(), BackendError> {
        Ok(())
    }

    /// Complete the destination after every section.
    fn finalize_output(&self) -> Result<(), BackendError>;
}

/// Session-scoped list of every URL path published during a run.
///
/// Shared by reference between the session and the backend; appends from
/// concurrent workers are serialized by the inner mutex.
#[derive(Debug, Default)]
pub struct PublishedPaths {
    paths: Mutex<Vec<String>>,
}

impl PublishedPaths {
    pub fn record(&self, path: impl Into<String>) {
        self.paths
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(path.into());
    }

    /// All recorded paths, first occurrence order, duplicates removed.
    pub fn snapshot(&self) -> Vec<String> {
        let paths = self.paths.lock().unwrap_or_else(|e| e.into_inner());
        let mut seen = std::collections::HashSet::new();
        paths
            .iter()
            .filter(|p| seen.insert(p.as_str()))
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }
}

/// Builds a backend from the run configuration.
pub type BackendConstructor =
    fn(&Config, Arc<PublishedPaths>) -> Result<Box<dyn Backend>, ConfigError>;

/// Explicit name → constructor map for backends.
#[derive(Clone)]
pub struct BackendRegistry {
    constructors: BTreeMap<String, BackendConstructor>,
}

impl BackendRegistry {
    /// A registry with no backends.
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// The `disk`, `object-storage` and `platform` backends.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(disk::NAME, disk::build);
        registry.register(object_storage::NAME, object_storage::build);
        registry.register(platform::NAME, platform::build);
        registry
    }

    pub fn register(&mut self, name: &str, constructor: BackendConstructor) {
        self.constructors.insert(name.to_string(), constructor);
    }

    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    pub fn build(
        &self,
        name: &str,
        config: &Config,
        published: Arc<PublishedPaths>,
    ) -> Result<Box<dyn Backend>, ConfigError> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| ConfigError::UnknownBackend {
                name: name.to_string(),
                known: self.names().join(", "),
            })?;
        constructor(config, published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_names() {
        assert_eq!(
            BackendRegistry::builtin().names(),
            vec!["disk", "object-storage", "platform"]
        );
    }

    #[test]
    fn unknown_backend_is_config_error() {
        let registry = BackendRegistry::builtin();
        let result = registry.build(
            "ftp",
            &Config::default(),
            Arc::new(PublishedPaths::default()),
        );
        match result {
            Err(ConfigError::UnknownBackend { name, known }) => {
                assert_eq!(name, "ftp");
                assert!(known.contains("disk"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("ftp backend should not exist"),
        }
    }

    #[test]
    fn registry_builds_disk_backend() {
        let backend = BackendRegistry::builtin()
            .build(
                "disk",
                &Config::default(),
                Arc::new(PublishedPaths::default()),
            )
            .unwrap();
        assert_eq!(backend.name(), "disk");
    }

    #[test]
    fn custom_backend_can_be_registered() {
        fn build(_: &Config, _: Arc<PublishedPaths>) -> Result<Box<dyn Backend>, ConfigError> {
            Ok(Box::new(crate::test_helpers::RecordingBackend::default()))
        }
        let mut registry = BackendRegistry::empty();
        registry.register("recording", build);
        let backend = registry
            .build(
                "recording",
                &Config::default(),
                Arc::new(PublishedPaths::default()),
            )
            .unwrap();
        assert_eq!(backend.name(), "recording");
    }

    #[test]
    fn published_paths_snapshot_dedups_in_order() {
        let paths = PublishedPaths::default();
        assert!(paths.is_empty());
        paths.record("/b/");
        paths.record("/a/");
        paths.record("/b/");
        assert_eq!(paths.snapshot(), vec!["/b/", "/a/"]);
    }

    #[test]
    fn published_paths_accept_concurrent_records() {
        let paths = Arc::new(PublishedPaths::default());
        std::thread::scope(|scope| {
            for t in 0..4 {
                let paths = Arc::clone(&paths);
                scope.spawn(move || {
                    for i in 0..50 {
                        paths.record(format!("/{t}/{i}/"));
                    }
                });
            }
        });
        assert_eq!(paths.snapshot().len(), 200);
    }
}
