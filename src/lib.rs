//! # pagepress
//!
//! Publishes a dynamic web application as a static site. Every configured
//! request path is fetched from the running application and the rendered
//! response is stored on a backend: a local directory, an S3 bucket (with
//! CloudFront invalidation), or an App Engine deploy directory.
//!
//! # Architecture: One Session, Three Phases
//!
//! ```text
//! initialize   backend prepares the destination (once)
//! publish      per section: resolve paths, fetch + store each on the pool
//! finalize     backend completes the destination (once)
//! ```
//!
//! A path that fails to fetch or store is logged and skipped; it never stops
//! its siblings or the finalize phase. Only configuration and setup errors
//! abort a run.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`session`] | The run state machine and its report |
//! | [`section`] | Named path providers (`list`, `file`, `tree`) and their registry |
//! | [`pool`] | Sequential or parallel execution with per-path failure isolation |
//! | [`fetch`] | Client contract for the content-producing application, HTTP implementation |
//! | [`backend`] | Backend contract and registry; `disk`, `object-storage`, `platform` |
//! | [`output_path`] | Request path + content type → output file name |
//! | [`config`] | `pagepress.toml` loading and validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Explicit Registries
//!
//! Backends and path providers are looked up by name in registries that are
//! filled explicitly ([`backend::BackendRegistry::builtin`],
//! [`section::SectionRegistry::builtin`]). Embedders add their own with
//! `register`; nothing is discovered at runtime.
//!
//! ## One Client Per Worker
//!
//! The session shares a [`fetch::ClientFactory`], never a client. Each pool
//! worker builds its own client, so connection state is never touched by two
//! threads. Backend state that *is* shared (the S3 published-path list, the
//! App Engine manifest) sits behind a mutex.
//!
//! ## Run-Scoped Accumulation
//!
//! The list of paths to invalidate on the CDN is a
//! [`backend::PublishedPaths`] owned by the session and handed to the backend
//! when it is built, so two sessions in one process never see each other's
//! paths.

pub mod backend;
pub mod config;
pub mod fetch;
pub mod output;
pub mod output_path;
pub mod pool;
pub mod section;
pub mod session;

#[cfg(test)]
pub(crate) mod test_helpers;
