//! Fetching rendered pages from the content-producing application.
//!
//! The application itself is an external collaborator: all the pipeline needs
//! is "GET this path, give me status, content type and body". That contract is
//! the [`Client`] trait. [`HttpClient`] implements it against a running
//! server over blocking HTTP; tests implement it with canned responses.
//!
//! [`PageFetcher`] wraps one client and turns its raw responses into
//! [`RenderedPage`]s, rejecting anything that is not a `200`. It never retries.
//!
//! ## Client ownership
//!
//! A client may hold connection pools or other mutable state, so it is never
//! shared between concurrent workers. Instead a [`ClientFactory`] is shared and
//! every worker builds its own client (and thus its own fetcher) from it.

use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Content type assumed when the application does not send one.
pub const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=utf-8";

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("path {path} did not return status 200 (got {status})")]
    Status { path: String, status: u16 },
    #[error("request for {path} failed")]
    Transport {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Raw response from the content-producing application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Response {
    pub fn ok(content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: content_type.to_string(),
            body: body.into(),
        }
    }
}

/// A page fetched successfully. Lives only for the duration of one publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub path: String,
    pub content_type: String,
    pub status: u16,
    pub body: Vec<u8>,
}

/// One connection to the content-producing application.
pub trait Client: Send {
    /// Issue a GET for `path`. Non-200 statuses are returned, not raised.
    fn get(&mut self, path: &str) -> Result<Response, FetchError>;
}

/// Builds independent clients, one per worker.
pub trait ClientFactory: Send + Sync {
    fn client(&self) -> Box<dyn Client>;
}

/// Fetches and validates pages through a single owned [`Client`].
pub struct PageFetcher {
    client: Box<dyn Client>,
}

impl PageFetcher {
    pub fn new(client: Box<dyn Client>) -> Self {
        Self { client }
    }

    pub fn from_factory(factory: &dyn ClientFactory) -> Self {
        Self::new(factory.client())
    }

    /// Fetch `path`. Anything but a 200 is a [`FetchError::Status`].
    pub fn fetch(&mut self, path: &str) -> Result<RenderedPage, FetchError> {
        let response = self.client.get(path)?;
        if response.status != 200 {
            return Err(FetchError::Status {
                path: path.to_string(),
                status: response.status,
            });
        }
        debug!(path, content_type = %response.content_type, bytes = response.body.len(), "fetched");
        Ok(RenderedPage {
            path: path.to_string(),
            content_type: response.content_type,
            status: response.status,
            body: response.body,
        })
    }
}

/// Settings shared by every [`HttpClient`] a factory builds.
#[derive(Debug, Clone)]
pub struct HttpSource {
    /// Scheme + host of the running application, e.g. `http://127.0.0.1:8000`.
    pub base_url: String,
    /// Prepended to every request path; never part of the output location.
    pub url_prefix: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl HttpSource {
    /// Full request URL for a site path.
    pub fn url_for(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let prefix = self.url_prefix.trim_end_matches('/');
        let prefix = match prefix {
            "" => String::new(),
            p if p.starts_with('/') => p.to_string(),
            p => format!("/{p}"),
        };
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        format!("{base}{prefix}{path}")
    }
}

impl ClientFactory for HttpSource {
    fn client(&self) -> Box<dyn Client> {
        Box::new(HttpClient::new(self.clone()))
    }
}

/// Blocking HTTP client against the running application.
pub struct HttpClient {
    source: HttpSource,
    inner: Option<reqwest::blocking::Client>,
}

impl HttpClient {
    pub fn new(source: HttpSource) -> Self {
        Self {
            source,
            inner: None,
        }
    }

    /// The underlying client is built lazily so construction cannot fail and
    /// happens on the worker thread that uses it. Redirects are not followed:
    /// a 3xx is returned as-is and rejected by [`PageFetcher`].
    fn inner(&mut self, path: &str) -> Result<&reqwest::blocking::Client, FetchError> {
        let client = match self.inner.take() {
            Some(client) => client,
            None => reqwest::blocking::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .timeout(self.source.timeout)
                .user_agent(self.source.user_agent.clone())
                .build()
                .map_err(|e| FetchError::Transport {
                    path: path.to_string(),
                    source: Box::new(e),
                })?,
        };
        Ok(&*self.inner.insert(client))
    }
}

impl Client for HttpClient {
    fn get(&mut self, path: &str) -> Result<Response, FetchError> {
        let url = self.source.url_for(path);
        let transport = |e: reqwest::Error| FetchError::Transport {
            path: path.to_string(),
            source: Box::new(e),
        };
        let response = self.inner(path)?.get(&url).send().map_err(transport)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let body = response.bytes().map_err(transport)?.to_vec();
        Ok(Response {
            status,
            content_type,
            body,
        })
    }
}
