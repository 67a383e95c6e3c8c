//! Running one unit of work per path, sequentially or on a worker pool.
//!
//! The pool's one promise is **partial-failure isolation**: every path is
//! attempted, a failure (error *or* panic) is logged with the path and the
//! full error chain, and that path's result becomes `None`. Nothing a single
//! path does can abort its siblings, and [`WorkerPool::run`] itself never
//! fails.
//!
//! ## Modes
//!
//! - **Sequential**: one worker state, paths in input order, on the calling
//!   thread.
//! - **Parallel**: a dedicated [rayon](https://docs.rs/rayon) pool of N
//!   threads. Work is split one path per task so a slow page never holds a
//!   batch of fast ones hostage. Every pool thread owns one state slot, filled
//!   from the `init` closure on its first task and reused afterwards, so at
//!   most N states are built and no state (such as an HTTP client) is ever
//!   used by two threads at once.
//!
//! Results are returned in input order in both modes; completion order in
//! parallel mode is unspecified.

use crate::config::{ProcessingConfig, effective_workers};
use rayon::prelude::*;
use std::any::Any;
use std::error::Error;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, TryLockError};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Sequential,
    Parallel { workers: usize },
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    mode: Mode,
}

impl WorkerPool {
    pub fn sequential() -> Self {
        Self {
            mode: Mode::Sequential,
        }
    }

    pub fn parallel(workers: usize) -> Self {
        Self {
            mode: Mode::Parallel {
                workers: workers.max(1),
            },
        }
    }

    /// Parallel with the effective worker count when `parallel` is on.
    pub fn from_config(config: &ProcessingConfig) -> Self {
        if config.parallel {
            Self::parallel(effective_workers(config))
        } else {
            Self::sequential()
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Apply `work` to every path. `init` builds per-worker state.
    ///
    /// The returned vector is aligned with `paths`: `Some` for paths that
    /// succeeded, `None` for paths whose failure was logged.
    pub fn run<S, T, E, I, F>(&self, paths: &[String], init: I, work: F) -> Vec<Option<T>>
    where
        I: Fn() -> S + Send + Sync,
        F: Fn(&mut S, &str) -> Result<T, E> + Send + Sync,
        S: Send,
        T: Send,
        E: Error + 'static,
    {
        match self.mode {
            Mode::Sequential => {
                let mut state = init();
                paths
                    .iter()
                    .map(|path| run_unit(&mut state, path, &work))
                    .collect()
            }
            Mode::Parallel { workers } => {
                let pool = match rayon::ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|i| format!("pagepress-worker-{i}"))
                    .build()
                {
                    Ok(pool) => pool,
                    Err(e) => {
                        warn!(error = %e, "Could not start worker pool; generating sequentially");
                        return Self::sequential().run(paths, init, work);
                    }
                };
                info!("Generating with up to {workers} workers...");
                let slots: Vec<Mutex<Option<S>>> = (0..workers).map(|_| Mutex::new(None)).collect();
                pool.install(|| {
                    paths
                        .par_iter()
                        .with_max_len(1)
                        .map(|path| {
                            let index = rayon::current_thread_index().unwrap_or(0) % workers;
                            run_in_slot(&slots[index], path, &init, &work)
                        })
                        .collect()
                })
            }
        }
    }
}

/// Run one path with the state held in `slot`, building it on first use.
///
/// A slot is only ever locked by the pool thread it belongs to. If that thread
/// re-enters while already holding it (nested rayon work), the path gets a
/// fresh state instead of deadlocking.
fn run_in_slot<S, T, E, I, F>(slot: &Mutex<Option<S>>, path: &str, init: &I, work: &F) -> Option<T>
where
    I: Fn() -> S,
    F: Fn(&mut S, &str) -> Result<T, E>,
    E: Error + 'static,
{
    let mut guard = match slot.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
        Err(TryLockError::WouldBlock) => None,
    };
    match guard.as_deref_mut() {
        Some(state) => run_unit(state.get_or_insert_with(init), path, work),
        None => run_unit(&mut init(), path, work),
    }
}

/// Run one path, converting any failure into a logged `None`.
fn run_unit<S, T, E, F>(state: &mut S, path: &str, work: &F) -> Option<T>
where
    F: Fn(&mut S, &str) -> Result<T, E>,
    E: Error + 'static,
{
    info!("Generating {path}...");
    match catch_unwind(AssertUnwindSafe(|| work(state, path))) {
        Ok(Ok(value)) => {
            info!("Generated {path} successfully");
            Some(value)
        }
        Ok(Err(err)) => {
            error!(path, error = %error_chain(&err), "Could not generate {path}");
            None
        }
        Err(panic) => {
            error!(path, panic = %panic_message(panic.as_ref()), "Could not generate {path}");
            None
        }
    }
}

/// `outer: inner: root cause`
pub fn error_chain(err: &(dyn Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
