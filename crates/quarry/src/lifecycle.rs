//! End-of-life handlers for the system and its sessions.
//!
//! Handlers run exactly once, in reverse registration order; every handler
//! runs even when earlier ones fail, and all failures surface as one
//! aggregated error.

use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::debug;

use quarry_types::Session;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

type Handler = Box<dyn FnOnce() -> Result<(), BoxError> + Send>;

struct NamedHandler {
    name: String,
    run: Handler,
}

/// One or more end-of-life handlers failed.
#[derive(Debug)]
pub struct LifecycleError {
    pub failures: Vec<(String, BoxError)>,
}

impl Display for LifecycleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} end-of-life handler(s) failed:", self.failures.len())?;
        for (name, error) in &self.failures {
            write!(f, " {name}: {error};")?;
        }
        Ok(())
    }
}

impl std::error::Error for LifecycleError {}

#[derive(Default)]
struct HandlerChain {
    ended: AtomicBool,
    handlers: Mutex<Vec<NamedHandler>>,
}

impl HandlerChain {
    fn add(&self, name: impl Into<String>, run: Handler) {
        if self.ended.load(Ordering::SeqCst) {
            tracing::warn!("ignoring end handler registered after shutdown");
            return;
        }
        self.handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(NamedHandler {
                name: name.into(),
                run,
            });
    }

    fn run(&self) -> Result<(), LifecycleError> {
        if self.ended.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut handlers = std::mem::take(
            &mut *self
                .handlers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        let mut failures = Vec::new();
        // Reverse registration order: later handlers may depend on earlier
        // ones still being functional.
        while let Some(handler) = handlers.pop() {
            debug!("running end handler {}", handler.name);
            if let Err(error) = (handler.run)() {
                failures.push((handler.name, error));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(LifecycleError { failures })
        }
    }
}

const SESSION_CHAIN_KEY: &str = "quarry.lifecycle.sessionEndHandlers";

/// Registers and runs per-session and per-system end-of-life handlers.
#[derive(Default)]
pub struct RepositorySystemLifecycle {
    system: HandlerChain,
}

impl RepositorySystemLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler to run when the system shuts down.
    pub fn on_system_end(
        &self,
        name: impl Into<String>,
        handler: impl FnOnce() -> Result<(), BoxError> + Send + 'static,
    ) {
        self.system.add(name, Box::new(handler));
    }

    /// Runs all system-end handlers once; subsequent calls are no-ops.
    pub fn system_end(&self) -> Result<(), LifecycleError> {
        self.system.run()
    }

    /// Registers a handler to run when `session` is closed.
    pub fn on_session_end(
        &self,
        session: &Session,
        name: impl Into<String>,
        handler: impl FnOnce() -> Result<(), BoxError> + Send + 'static,
    ) {
        let chain = session
            .data()
            .compute_if_absent(SESSION_CHAIN_KEY, HandlerChain::default);
        chain.add(name, Box::new(handler));
    }

    /// Runs the session's end handlers once; subsequent calls are no-ops.
    pub fn session_end(&self, session: &Session) -> Result<(), LifecycleError> {
        let chain = session
            .data()
            .compute_if_absent(SESSION_CHAIN_KEY, HandlerChain::default);
        chain.run()
    }
}
