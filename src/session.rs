//! One publishing run, as an explicit state machine.
//!
//! ```text
//! NotStarted ──initialize──▶ Initialized ──publish_sections──▶ Publishing
//!            ──finalize──▶ Finalized
//! ```
//!
//! Each transition happens exactly once and in that order; calling one out of
//! order is a [`SessionError::OutOfOrder`] and changes nothing. Sections are
//! published one after another; paths within a section may run on the worker
//! pool. Per-path failures never surface here: the pool logs them and the
//! section report counts them. Once `initialize` succeeded, `finalize` always
//! runs.

use crate::backend::{
    Backend, BackendError, BackendRegistry, PublishAction, Published, PublishedPaths,
};
use crate::config::{Config, ConfigError};
use crate::fetch::{ClientFactory, PageFetcher};
use crate::pool::{WorkerPool, error_chain};
use crate::section::{Section, SectionRegistry};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Initialized,
    Publishing,
    Finalized,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("cannot {operation} while the session is {state:?}")]
    OutOfOrder {
        operation: &'static str,
        state: SessionState,
    },
}

/// Outcome counts for one section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionReport {
    pub name: String,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub written: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl SectionReport {
    fn from_results(name: &str, results: &[Option<Published>]) -> Self {
        let mut report = Self {
            name: name.to_string(),
            attempted: results.len(),
            ..Self::default()
        };
        for result in results {
            let Some(published) = result else {
                report.failed += 1;
                continue;
            };
            report.succeeded += 1;
            match published.action {
                PublishAction::Written => report.written += 1,
                PublishAction::Created => report.created += 1,
                PublishAction::Updated => report.updated += 1,
                PublishAction::Unchanged => report.unchanged += 1,
            }
        }
        report
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub backend: String,
    pub sections: Vec<SectionReport>,
}

impl SessionReport {
    pub fn attempted(&self) -> usize {
        self.sections.iter().map(|s| s.attempted).sum()
    }

    pub fn failed(&self) -> usize {
        self.sections.iter().map(|s| s.failed).sum()
    }
}

pub struct PublishSession {
    backend: Box<dyn Backend>,
    sections: Vec<Section>,
    pool: WorkerPool,
    clients: Box<dyn ClientFactory>,
    published: Arc<PublishedPaths>,
    state: SessionState,
    reports: Vec<SectionReport>,
}

impl PublishSession {
    /// `published` must be the accumulator the backend was built with.
    pub fn new(
        backend: Box<dyn Backend>,
        sections: Vec<Section>,
        pool: WorkerPool,
        clients: Box<dyn ClientFactory>,
        published: Arc<PublishedPaths>,
    ) -> Self {
        Self {
            backend,
            sections,
            pool,
            clients,
            published,
            state: SessionState::NotStarted,
            reports: Vec::new(),
        }
    }

    /// Wire up backend, sections, pool and HTTP source from configuration.
    pub fn from_config(
        config: &Config,
        backends: &BackendRegistry,
        providers: &SectionRegistry,
    ) -> Result<Self, ConfigError> {
        let published = Arc::new(PublishedPaths::default());
        let backend = backends.build(&config.backend, config, Arc::clone(&published))?;
        let sections = providers.build_all(&config.sections)?;
        Ok(Self::new(
            backend,
            sections,
            WorkerPool::from_config(&config.processing),
            Box::new(config.http_source()),
            published,
        ))
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every path published so far in this run.
    pub fn published_paths(&self) -> Vec<String> {
        self.published.snapshot()
    }

    fn expect_state(
        &self,
        expected: SessionState,
        operation: &'static str,
    ) -> Result<(), SessionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::OutOfOrder {
                operation,
                state: self.state,
            })
        }
    }

    /// Prepare the destination. A failure here aborts the run.
    pub fn initialize(&mut self) -> Result<(), SessionError> {
        self.expect_state(SessionState::NotStarted, "initialize")?;
        info!(backend = self.backend.name(), "Initializing output");
        self.backend.initialize_output()?;
        self.state = SessionState::Initialized;
        Ok(())
    }

    /// Resolve every section, then publish them one at a time.
    pub fn publish_sections(&mut self) -> Result<(), SessionError> {
        self.expect_state(SessionState::Initialized, "publish sections")?;
        self.state = SessionState::Publishing;

        for section in &mut self.sections {
            section.resolve();
        }

        let clients: &dyn ClientFactory = self.clients.as_ref();
        let backend: &dyn Backend = self.backend.as_ref();
        for section in &mut self.sections {
            let name = section.name().to_string();
            let paths = section.resolve().to_vec();
            info!(section = %name, "Publishing section {name} ({} paths)", paths.len());

            let results = self.pool.run(
                &paths,
                || PageFetcher::from_factory(clients),
                |fetcher, path| backend.publish(fetcher, path),
            );

            let report = SectionReport::from_results(&name, &results);
            let published: Vec<Published> = results.into_iter().flatten().collect();
            if let Err(e) = backend.finish_section(&name, &published) {
                error!(
                    section = %name,
                    error = %error_chain(&e),
                    "Could not finish section {name}"
                );
            }
            info!(
                section = %name,
                succeeded = report.succeeded,
                failed = report.failed,
                "Finished section {name}"
            );
            self.reports.push(report);
        }
        Ok(())
    }

    /// Complete the destination and return the run report.
    pub fn finalize(&mut self) -> Result<SessionReport, SessionError> {
        self.expect_state(SessionState::Publishing, "finalize")?;
        self.state = SessionState::Finalized;
        info!(backend = self.backend.name(), "Finalizing output");
        self.backend.finalize_output()?;
        Ok(SessionReport {
            backend: self.backend.name().to_string(),
            sections: std::mem::take(&mut self.reports),
        })
    }

    /// All three transitions in order.
    pub fn run(mut self) -> Result<SessionReport, SessionError> {
        self.initialize()?;
        self.publish_sections()?;
        self.finalize()
    }
}
