// SPDX-License-Identifier: Apache-2.0 OR MIT
// Process-global manager: lifecycle FSM, registry, defaults

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};

use crate::cow::CowList;
use crate::dispatch::{default_worker_count, DispatchPool};
use crate::error::{Error, Result};
use crate::format::Format;
use crate::hazard::HazardDomain;
use crate::level::Level;
use crate::logger::Logger;
use crate::pool::RecordPool;
use crate::registry::Registry;
use crate::sink::{ConsoleSink, Sink};
use crate::storage::AtomicName;

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Manager lifecycle states.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Uninitialized = 0,
    Initializing = 1,
    Running = 2,
    ShuttingDown = 3,
    ShutDown = 4,
}

impl ManagerState {
    const fn as_u8(self) -> u8 {
        self as u8
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => ManagerState::Initializing,
            2 => ManagerState::Running,
            3 => ManagerState::ShuttingDown,
            4 => ManagerState::ShutDown,
            _ => ManagerState::Uninitialized,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ManagerState::Uninitialized => "Uninitialized",
            ManagerState::Initializing => "Initializing",
            ManagerState::Running => "Running",
            ManagerState::ShuttingDown => "ShuttingDown",
            ManagerState::ShutDown => "ShutDown",
        }
    }
}

/// Process-wide owner of the pipeline: record pool, registry, dispatch
/// pool, and the configuration defaults new loggers inherit.
///
/// Lifecycle is explicit: `initialize` once, `shutdown` once;
/// re-initialization after shutdown requires `reset_all`. The state CAS in
/// `initialize` makes it race-safe and one-shot.
pub struct Manager {
    state: AtomicU8,
    hazard: Arc<HazardDomain>,
    pool: Arc<RecordPool>,
    registry: Registry,
    global_sinks: CowList<Arc<dyn Sink>>,
    dispatch: ArcSwapOption<DispatchPool>,
    default_level: AtomicU8,
    default_format: ArcSwap<Format>,
    default_logger_name: AtomicName,
    config_version: AtomicU64,
}

impl Manager {
    /// The process-wide singleton
    pub fn instance() -> &'static Manager {
        static INSTANCE: OnceLock<Manager> = OnceLock::new();
        INSTANCE.get_or_init(Manager::new)
    }

    fn new() -> Self {
        let hazard = HazardDomain::new();
        Self {
            state: AtomicU8::new(ManagerState::Uninitialized.as_u8()),
            pool: RecordPool::new(),
            registry: Registry::new(Arc::clone(&hazard)),
            global_sinks: CowList::with_domain(Arc::clone(&hazard)),
            hazard,
            dispatch: ArcSwapOption::from(None),
            default_level: AtomicU8::new(Level::Info.as_u8()),
            default_format: ArcSwap::from_pointee(Format::default()),
            default_logger_name: AtomicName::with("main"),
            config_version: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ManagerState {
        ManagerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: ManagerState, to: ManagerState) -> bool {
        self.state
            .compare_exchange(
                from.as_u8(),
                to.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn require_running(&self, operation: &str) -> Result<()> {
        let state = self.state();
        if state != ManagerState::Running {
            return Err(Error::InvalidState(format!(
                "cannot {operation} while {}",
                state.name()
            )));
        }
        Ok(())
    }

    /// Build the dispatch pool and the default logger. One-shot: a second
    /// call (from any thread, in any later state) returns `InvalidState`.
    pub fn initialize(&self) -> Result<()> {
        if !self.transition(ManagerState::Uninitialized, ManagerState::Initializing) {
            return Err(Error::InvalidState(format!(
                "cannot initialize while {}",
                self.state().name()
            )));
        }

        self.dispatch
            .store(Some(DispatchPool::new(default_worker_count())));
        self.state
            .store(ManagerState::Running.as_u8(), Ordering::Release);

        self.create_default_logger()?;
        Ok(())
    }

    /// Stop the pipeline. With `wait_for_completion`, pending records are
    /// flushed (bounded by `timeout`) before the workers exit.
    pub fn shutdown(&self, wait_for_completion: bool, timeout: Duration) -> Result<()> {
        if !self.transition(ManagerState::Running, ManagerState::ShuttingDown) {
            return Err(Error::InvalidState(format!(
                "cannot shut down while {}",
                self.state().name()
            )));
        }

        let result = match self.dispatch.swap(None) {
            Some(dispatch) => dispatch.shutdown(wait_for_completion, timeout),
            None => Ok(()),
        };

        self.registry.clear();
        self.global_sinks.clear();
        self.state
            .store(ManagerState::ShutDown.as_u8(), Ordering::Release);

        result
    }

    /// Unconditional teardown; used by `reset_all` and safe to call from
    /// any state, any number of times.
    pub fn shutdown_all(&self) {
        if self.state() == ManagerState::ShutDown {
            return;
        }
        self.transition(ManagerState::Running, ManagerState::ShuttingDown);

        if let Some(dispatch) = self.dispatch.swap(None) {
            let _ = dispatch.shutdown(true, DEFAULT_SHUTDOWN_TIMEOUT);
        }
        self.registry.clear();
        self.global_sinks.clear();
        self.state
            .store(ManagerState::ShutDown.as_u8(), Ordering::Release);
    }

    /// Tear everything down and initialize again. Only legal while Running.
    pub fn reset_all(&self) -> Result<()> {
        self.require_running("reset")?;
        self.shutdown_all();
        self.state
            .store(ManagerState::Uninitialized.as_u8(), Ordering::Release);
        self.initialize()
    }

    /// Create (or return the existing) logger named `name`, wired with the
    /// current defaults and a copy of the global sink list.
    pub fn register_logger(&self, name: &str) -> Result<Arc<Logger>> {
        self.require_running("register a logger")?;
        if name.is_empty() {
            return Err(Error::InvalidArgument(
                "logger name cannot be empty".to_string(),
            ));
        }

        if let Some(existing) = self.registry.find(name)? {
            return Ok(existing);
        }

        let Some(dispatch) = self.dispatch.load_full() else {
            return Err(Error::InvalidState(
                "dispatch pool is not available".to_string(),
            ));
        };

        let logger = Logger::new(
            name,
            self.default_level(),
            Arc::clone(&self.pool),
            dispatch,
            Arc::clone(&self.hazard),
        );
        logger.set_format((*self.default_format.load_full()).clone());

        let globals = self.global_sinks.read_handle()?;
        if !globals.is_empty() {
            logger.register_sinks(globals.items())?;
        }

        Ok(self.registry.insert(name, logger))
    }

    /// Find-or-register
    pub fn get_logger(&self, name: &str) -> Result<Arc<Logger>> {
        if self.state() == ManagerState::Running {
            if let Some(logger) = self.registry.find(name)? {
                return Ok(logger);
            }
        }
        self.register_logger(name)
    }

    pub fn get_default_logger(&self) -> Result<Arc<Logger>> {
        let name = self.default_logger_name.load();
        self.get_logger(&name)
    }

    pub fn has_logger(&self, name: &str) -> bool {
        self.state() == ManagerState::Running && !name.is_empty() && self.registry.contains(name)
    }

    /// Remove a logger. Removing the current default logger is a no-op.
    pub fn remove_logger(&self, name: &str) {
        if self.state() != ManagerState::Running || self.default_logger_name.matches(name) {
            return;
        }
        let _ = self.registry.remove(name);
    }

    /// Append to the global sink list. Only loggers registered afterwards
    /// inherit it; existing loggers are not retroactively updated.
    pub fn register_sink(&self, sink: Arc<dyn Sink>) -> Result<()> {
        self.require_running("register a global sink")?;
        self.global_sinks.add(sink)
    }

    pub fn set_default_level(&self, level: Level) {
        if self.state() != ManagerState::Running {
            return;
        }
        self.default_level.store(level.as_u8(), Ordering::Release);
        self.config_version.fetch_add(1, Ordering::Release);
    }

    pub fn default_level(&self) -> Level {
        Level::from_u8(self.default_level.load(Ordering::Acquire)).unwrap_or(Level::Info)
    }

    pub fn set_default_format(&self, format: Format) {
        if self.state() != ManagerState::Running {
            return;
        }
        self.default_format.store(Arc::new(format));
        self.config_version.fetch_add(1, Ordering::Release);
    }

    pub fn default_format(&self) -> Arc<Format> {
        self.default_format.load_full()
    }

    /// Resize the dispatch pool, creating it if shutdown raced it away
    pub fn set_thread_pool_size(&self, size: usize) {
        if self.state() != ManagerState::Running {
            return;
        }
        match self.dispatch.load_full() {
            Some(dispatch) => {
                let _ = dispatch.resize(size);
            }
            None => {
                self.dispatch.store(Some(DispatchPool::new(size)));
            }
        }
    }

    pub fn thread_pool_size(&self) -> usize {
        self.dispatch
            .load_full()
            .map(|dispatch| dispatch.worker_count())
            .unwrap_or(0)
    }

    pub fn resize_thread_pool(&self, size: usize) -> Result<()> {
        self.require_running("resize the thread pool")?;
        match self.dispatch.load_full() {
            Some(dispatch) => dispatch.resize(size),
            None => {
                self.dispatch.store(Some(DispatchPool::new(size)));
                Ok(())
            }
        }
    }

    /// Rename the default logger; creates it if no logger has the new name
    pub fn set_default_logger_name(&self, name: &str) {
        if self.state() != ManagerState::Running || name.is_empty() {
            return;
        }
        self.default_logger_name.store(name);
        if !self.has_logger(name) {
            let _ = self.create_default_logger();
        }
    }

    pub fn default_logger_name(&self) -> String {
        self.default_logger_name.load()
    }

    /// Monotonic counter bumped on every default-config change
    pub fn config_version(&self) -> u64 {
        self.config_version.load(Ordering::Acquire)
    }

    pub fn record_pool(&self) -> &Arc<RecordPool> {
        &self.pool
    }

    fn create_default_logger(&self) -> Result<Arc<Logger>> {
        let name = self.default_logger_name.load();
        let logger = self.register_logger(&name)?;
        if logger.sink_count() == 0 {
            logger.register_sink(Arc::new(ConsoleSink::stdout()))?;
        }
        Ok(logger)
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("state", &self.state().name())
            .field("default_level", &self.default_level())
            .field("workers", &self.thread_pool_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Singleton behavior is exercised in the integration binaries
    // (tests/manager_api.rs, tests/manager_lifecycle.rs), which each own a
    // process. Unit tests here stay off the singleton.

    #[test]
    fn test_state_names() {
        assert_eq!(ManagerState::Uninitialized.name(), "Uninitialized");
        assert_eq!(ManagerState::Running.name(), "Running");
        assert_eq!(ManagerState::from_u8(9), ManagerState::Uninitialized);
    }

    #[test]
    fn test_fresh_manager_rejects_non_lifecycle_calls() {
        let manager = Manager::new();
        assert_eq!(manager.state(), ManagerState::Uninitialized);
        assert!(manager.register_logger("x").is_err());
        assert!(!manager.has_logger("x"));
        assert_eq!(manager.thread_pool_size(), 0);
    }

    #[test]
    fn test_non_singleton_lifecycle() {
        // Manager::new is private to the crate, so a scratch instance keeps
        // these checks off the process singleton.
        let manager = Manager::new();
        manager.initialize().unwrap();
        assert_eq!(manager.state(), ManagerState::Running);
        assert!(manager.initialize().is_err());

        let logger = manager.get_logger("scratch").unwrap();
        assert!(logger.info("hello"));

        manager.shutdown(true, Duration::from_secs(2)).unwrap();
        assert_eq!(manager.state(), ManagerState::ShutDown);
        assert!(manager.shutdown(true, Duration::from_secs(1)).is_err());
    }
}
