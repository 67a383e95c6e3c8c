//! Local filesystem backend.
//!
//! Every page is written to `deploy_dir/<resolved output path>`, replacing
//! whatever was there. There is no diffing.
//!
//! Writes go through a temporary file in the destination directory which is
//! then renamed over the target, so a reader never observes a half-written
//! page and two workers writing the same path cannot interleave bytes.

use super::{Backend, BackendError, PublishAction, Published, PublishError, PublishedPaths};
use crate::config::{Config, ConfigError};
use crate::fetch::PageFetcher;
use crate::output_path;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub const NAME: &str = "disk";

pub(super) fn build(
    config: &Config,
    _published: Arc<PublishedPaths>,
) -> Result<Box<dyn Backend>, ConfigError> {
    Ok(Box::new(DiskBackend::new(&config.deploy_dir)))
}

pub struct DiskBackend {
    root: PathBuf,
}

impl DiskBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Backend for DiskBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn initialize_output(&self) -> Result<(), BackendError> {
        std::fs::create_dir_all(&self.root)?;
        info!("Writing pages to {}", self.root.display());
        Ok(())
    }

    fn publish(&self, fetcher: &mut PageFetcher, path: &str) -> Result<Published, PublishError> {
        let page = fetcher.fetch(path)?;
        let relative = output_path::resolve(path, &page.content_type);
        let written = write_output(&self.root, &relative, &page.body)?;
        Ok(Published {
            path: page.path,
            location: written.display().to_string(),
            content_type: page.content_type,
            action: PublishAction::Written,
        })
    }

    fn finalize_output(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Reject output paths that would land outside the destination root.
fn checked_relative(relative: &str) -> Result<&Path, PublishError> {
    let path = Path::new(relative);
    let safe = path.components().next().is_some()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if safe {
        Ok(path)
    } else {
        Err(PublishError::UnsafePath(relative.to_string()))
    }
}

/// Atomically write `body` to `root/relative`, creating parent directories.
///
/// Returns the absolute-or-root-relative path that was written. Existing
/// directories are not an error; concurrent workers routinely race to create
/// the same parent.
pub(crate) fn write_output(
    root: &Path,
    relative: &str,
    body: &[u8],
) -> Result<PathBuf, PublishError> {
    let target = root.join(checked_relative(relative)?);
    let location = target.display().to_string();
    let write_err = |source: std::io::Error| PublishError::Write {
        location: location.clone(),
        source,
    };

    let parent = target.parent().unwrap_or(root);
    std::fs::create_dir_all(parent).map_err(write_err)?;

    info!("Saving file to {}", target.display());
    let mut staged = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
    staged.write_all(body).map_err(write_err)?;
    // Temp files are created owner-only; published pages must be world-readable.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        staged
            .as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))
            .map_err(write_err)?;
    }
    staged.persist(&target).map_err(|e| write_err(e.error))?;
    Ok(target)
}
