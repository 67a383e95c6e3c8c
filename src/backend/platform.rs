//! Google App Engine deploy-directory backend.
//!
//! Produces a directory that `appcfg.py update` can deploy as-is:
//!
//! ```text
//! deploy_dir/
//! ├── app.yaml            # manifest: header, handlers, folding block, catch-all
//! └── deploy/             # every page, always as .../index.html for directories
//!     ├── index.html
//!     └── blog/index.html
//! ```
//!
//! ## Manifest entries
//!
//! App Engine cannot infer a MIME type for a URL without an extension, and
//! caps the number of handlers in `app.yaml`. So:
//!
//! - HTML pages, and pages whose URL ends in a known static extension, get no
//!   entry of their own.
//! - Any other page (e.g. a JSON feed served at `/feed/`) gets one explicit
//!   handler with its real MIME type. These are collected during the section
//!   and appended, sorted by URL, when the section finishes.
//! - At finalize a fixed block maps `index.html` files nested `0..depth`
//!   directories deep back to their directory URL, followed by a catch-all
//!   `static_dir` handler. Arbitrarily many generated directories are covered
//!   by `depth + 1` handlers.
//!
//! Manifest appends are serialized through a mutex; the file is opened in
//! append mode for each write.

use super::disk::write_output;
use super::{Backend, BackendError, PublishAction, Published, PublishError, PublishedPaths};
use crate::config::{Config, ConfigError};
use crate::fetch::PageFetcher;
use crate::output_path;
use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;

pub const NAME: &str = "platform";

/// Sub-directory of `deploy_dir` holding the static files.
pub const STATIC_DIR: &str = "deploy";

pub const MANIFEST_FILE: &str = "app.yaml";

/// URL extensions App Engine maps to a MIME type on its own.
pub const STANDARD_EXTENSIONS: &[&str] =
    &["htm", "html", "css", "xml", "json", "js", "yaml", "txt"];

pub(super) fn build(
    config: &Config,
    _published: Arc<PublishedPaths>,
) -> Result<Box<dyn Backend>, ConfigError> {
    Ok(Box::new(PlatformBackend::new(
        &config.deploy_dir,
        &config.platform.app_id,
        config.platform.index_depth,
    )))
}

/// An explicit `app.yaml` handler for an extensionless, non-HTML URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerEntry {
    pub url: String,
    /// File path relative to the deploy dir (`deploy/...`).
    pub file: String,
    pub mime_type: String,
}

impl HandlerEntry {
    pub fn render(&self) -> String {
        format!(
            "# req since this url does not end in an extension and also\n\
             # has non-html mime: {mime}\n\
             - url: {url}\n  \
             static_files: {file}\n  \
             upload: {file}\n  \
             mime_type: {mime}\n\n",
            mime = self.mime_type,
            url = self.url,
            file = self.file,
        )
    }
}

pub struct PlatformBackend {
    root: PathBuf,
    app_id: String,
    index_depth: usize,
    manifest: Mutex<PathBuf>,
    pending: Mutex<Vec<HandlerEntry>>,
}

impl PlatformBackend {
    pub fn new(root: impl Into<PathBuf>, app_id: &str, index_depth: usize) -> Self {
        let root = root.into();
        Self {
            manifest: Mutex::new(root.join(MANIFEST_FILE)),
            root,
            app_id: app_id.to_string(),
            index_depth,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Append `text` to the manifest while holding the manifest lock.
    fn append(&self, text: &str) -> std::io::Result<()> {
        let path = self.manifest.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new().append(true).create(true).open(&*path)?;
        file.write_all(text.as_bytes())
    }
}

/// Manifest header: application identity and an open `handlers:` list.
pub fn manifest_header(app_id: &str) -> String {
    format!(
        "application: {app_id}\n\
         version: 1\n\
         runtime: python\n\
         api_version: 1\n\
         threadsafe: true\n\
         \n\
         handlers:\n\n"
    )
}

/// Handlers mapping `index.html` files up to `depth` directories deep back to
/// their directory URL, then the catch-all static handler.
pub fn folding_block(depth: usize) -> String {
    let mut out = format!(
        "####################\n\
         # map index.html files to their root (up to {depth} deep)\n\
         ####################\n\n"
    );
    for level in 0..depth {
        let parts = "(.*)/".repeat(level);
        let captures: String = (1..=level).map(|n| format!("\\{n}/")).collect();
        let _ = write!(
            out,
            "- url: /{parts}\n  \
             static_files: {STATIC_DIR}/{captures}index.html\n  \
             upload: {STATIC_DIR}/{parts}index.html\n\n"
        );
    }
    let _ = write!(
        out,
        "####################\n\
         # everything else\n\
         ####################\n\n\
         - url: /\n  \
         static_dir: {STATIC_DIR}\n"
    );
    out
}

fn has_standard_extension(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| STANDARD_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Whether a page needs its own handler to be served with the right type.
pub fn needs_handler(path: &str, mime: &str) -> bool {
    let is_html = mime == "text/html";
    let typed_by_extension = !path.ends_with('/') && has_standard_extension(path);
    !is_html && !typed_by_extension
}

impl Backend for PlatformBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn initialize_output(&self) -> Result<(), BackendError> {
        if self.app_id.is_empty() {
            return Err(BackendError::Configuration(
                "platform.app_id must be set".into(),
            ));
        }
        info!("Initializing output directory with `{MANIFEST_FILE}`");
        std::fs::create_dir_all(self.root.join(STATIC_DIR))?;
        let path = self.manifest.lock().unwrap_or_else(|e| e.into_inner());
        std::fs::write(&*path, manifest_header(&self.app_id))?;
        Ok(())
    }

    fn publish(&self, fetcher: &mut PageFetcher, path: &str) -> Result<Published, PublishError> {
        let page = fetcher.fetch(path)?;
        // Directory URLs always become index.html here, whatever the real
        // type; the folding block relies on that name.
        let relative = format!(
            "{STATIC_DIR}/{}",
            output_path::resolve(path, "text/html")
        );
        write_output(&self.root, &relative, &page.body)?;

        let mime = output_path::mime_essence(&page.content_type);
        if needs_handler(path, &mime) {
            self.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(HandlerEntry {
                    url: path.to_string(),
                    file: relative.clone(),
                    mime_type: mime,
                });
        }

        Ok(Published {
            path: page.path,
            location: relative,
            content_type: page.content_type,
            action: PublishAction::Written,
        })
    }

    /// Entries stay queued until the append succeeds, so a failed section's
    /// handlers go out with the next one.
    fn finish_section(
        &self,
        section: &str,
        _published: &[Published],
    ) -> Result<(), BackendError> {
        let mut entries = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if entries.is_empty() {
            return Ok(());
        }
        entries.sort_by(|a, b| a.url.cmp(&b.url));
        entries.dedup_by(|a, b| a.url == b.url);
        info!(
            section,
            handlers = entries.len(),
            "Appending typed handlers to {MANIFEST_FILE}"
        );
        let text: String = entries.iter().map(HandlerEntry::render).collect();
        self.append(&text)?;
        entries.clear();
        Ok(())
    }

    fn finalize_output(&self) -> Result<(), BackendError> {
        info!("Finalizing {MANIFEST_FILE}");
        self.append(&folding_block(self.index_depth))?;
        info!(
            "You should now be able to deploy this to Google App Engine \
             by performing the following command:\nappcfg.py update {}",
            self.root.display()
        );
        Ok(())
    }
}
