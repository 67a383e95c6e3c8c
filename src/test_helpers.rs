//! Shared test doubles for the pagepress test suite.
//!
//! - [`StaticSite`]: an in-memory content-producing application. It is a
//!   [`ClientFactory`], so it plugs straight into [`PageFetcher`] and the
//!   session. Unknown paths answer 404.
//! - [`RecordingBackend`]: a backend that stores nothing and records every
//!   lifecycle call it receives.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let site = StaticSite::new()
//!     .page("/", "text/html", "<h1>home</h1>")
//!     .status("/gone/", 410)
//!     .broken("/flaky/");
//!
//! let mut fetcher = PageFetcher::from_factory(&site);
//! assert!(fetcher.fetch("/gone/").is_err());
//! assert_eq!(site.requests_for("/gone/"), 1);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::backend::{Backend, BackendError, PublishAction, Published, PublishError};
use crate::fetch::{Client, ClientFactory, FetchError, PageFetcher, Response};

// =========================================================================
// StaticSite
// =========================================================================

#[derive(Debug, Clone)]
enum Canned {
    Page(Response),
    Broken,
    Panic,
}

#[derive(Debug, Default)]
struct SiteState {
    routes: HashMap<String, Canned>,
    requests: Vec<String>,
    clients_built: usize,
}

/// In-memory application. Clones share the same routes and request log.
#[derive(Debug, Clone, Default)]
pub struct StaticSite {
    state: Arc<Mutex<SiteState>>,
}

impl StaticSite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` with status 200.
    pub fn page(self, path: &str, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        self.set_page(path, content_type, body);
        self
    }

    /// Answer `path` with an empty body and `status`.
    pub fn status(self, path: &str, status: u16) -> Self {
        let response = Response {
            status,
            content_type: "text/html".to_string(),
            body: Vec::new(),
        };
        self.route(path, Canned::Page(response));
        self
    }

    /// Fail `path` with a transport error.
    pub fn broken(self, path: &str) -> Self {
        self.route(path, Canned::Broken);
        self
    }

    /// Panic inside the client when `path` is requested.
    pub fn panicking(self, path: &str) -> Self {
        self.route(path, Canned::Panic);
        self
    }

    /// Replace the page served at `path`.
    pub fn set_page(&self, path: &str, content_type: &str, body: impl Into<Vec<u8>>) {
        self.route(path, Canned::Page(Response::ok(content_type, body)));
    }

    /// Number of GETs issued for `path` across every client.
    pub fn requests_for(&self, path: &str) -> usize {
        self.lock().requests.iter().filter(|p| *p == path).count()
    }

    /// Every path requested, in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    /// Number of clients handed out by the factory.
    pub fn clients_built(&self) -> usize {
        self.lock().clients_built
    }

    fn route(&self, path: &str, canned: Canned) {
        self.lock().routes.insert(path.to_string(), canned);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SiteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ClientFactory for StaticSite {
    fn client(&self) -> Box<dyn Client> {
        self.lock().clients_built += 1;
        Box::new(StaticClient { site: self.clone() })
    }
}

struct StaticClient {
    site: StaticSite,
}

impl Client for StaticClient {
    fn get(&mut self, path: &str) -> Result<Response, FetchError> {
        let canned = {
            let mut state = self.site.lock();
            state.requests.push(path.to_string());
            state.routes.get(path).cloned()
        };
        match canned {
            Some(Canned::Page(response)) => Ok(response),
            Some(Canned::Broken) => Err(FetchError::Transport {
                path: path.to_string(),
                source: "connection reset".into(),
            }),
            Some(Canned::Panic) => panic!("renderer crashed on {path}"),
            None => Ok(Response {
                status: 404,
                content_type: "text/html".to_string(),
                body: b"not found".to_vec(),
            }),
        }
    }
}

// =========================================================================
// RecordingBackend
// =========================================================================

/// Backend that fetches each page and records lifecycle calls as strings:
/// `initialize`, `publish /path/`, `finish <section> <n>`, `finalize`.
#[derive(Debug, Clone, Default)]
pub struct RecordingBackend {
    events: Arc<Mutex<Vec<String>>>,
}

impl RecordingBackend {
    /// Handle to the event log that stays valid after the backend is boxed.
    pub fn events_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.events)
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn push(&self, event: String) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

impl Backend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn initialize_output(&self) -> Result<(), BackendError> {
        self.push("initialize".to_string());
        Ok(())
    }

    fn publish(&self, fetcher: &mut PageFetcher, path: &str) -> Result<Published, PublishError> {
        let page = fetcher.fetch(path)?;
        self.push(format!("publish {path}"));
        Ok(Published {
            path: page.path,
            location: path.to_string(),
            content_type: page.content_type,
            action: PublishAction::Written,
        })
    }

    fn finish_section(&self, section: &str, published: &[Published]) -> Result<(), BackendError> {
        self.push(format!("finish {section} {}", published.len()));
        Ok(())
    }

    fn finalize_output(&self) -> Result<(), BackendError> {
        self.push("finalize".to_string());
        Ok(())
    }
}
