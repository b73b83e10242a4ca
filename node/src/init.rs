//! This module is responsible of the initialization of the application: a
//! single composition root builds the stores, the event bus, the catalog,
//! the services and the dispatcher context from the configuration, then
//! hands them out as one `AppContext`.
//!
//! There is no runtime container and no module level mutable state; every
//! component receives its collaborators through its constructor.
//!

use std::sync::Arc;
use std::time::Duration;

use grading::{CaseRunner, Sandbox};

use crate::catalog::{ProblemCatalog, YamlCatalog};
use crate::config::AppConfig;
use crate::db::SqliteConnection;
use crate::dispatch::{DispatchContext, WorkerPool};
use crate::events::EventBus;
use crate::maintenance::{self, MaintenanceOptions};
use crate::storage::AppStorage;
use crate::submit::{ExecutionService, SubmissionService};

error_chain::error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    links {
        ConfigError(crate::config::Error, crate::config::ErrorKind);
        DbError(crate::db::Error, crate::db::ErrorKind);
        DispatchError(crate::dispatch::Error, crate::dispatch::ErrorKind);
        StorageError(crate::storage::Error, crate::storage::ErrorKind);
    }

    errors {
        Incomplete(what: &'static str) {
            description("the application context builder is incomplete")
            display("the application context builder is incomplete: {} is missing", what)
        }
    }
}

/// The assembled application: every long-lived component of the judge node,
/// wired and ready to start.
pub struct AppContext {
    /// The application wide configuration.
    pub config: Arc<AppConfig>,

    /// The storage facade.
    pub storage: Arc<AppStorage>,

    /// The domain event bus, with the event log already attached.
    pub bus: Arc<EventBus>,

    /// The problem catalog read model.
    pub catalog: Arc<dyn ProblemCatalog>,

    /// The submission service.
    pub submissions: Arc<SubmissionService>,

    /// The ad-hoc execution service.
    pub executions: Arc<ExecutionService>,

    /// The shared dispatcher context.
    dispatch: Arc<DispatchContext>,
}

impl AppContext {
    /// Spawn the worker pool configured for this context.
    pub fn start_workers(&self) -> Result<WorkerPool> {
        Ok(WorkerPool::start(self.dispatch.clone(), self.config.node.workers)?)
    }

    /// Start the maintenance daemon configured for this context.
    pub fn start_maintenance(&self) {
        let m = &self.config.maintenance;
        maintenance::start_daemon(MaintenanceOptions {
            submissions: self.storage.submissions(),
            queue: self.storage.queue(),
            executions: self.storage.executions(),
            bus: self.bus.clone(),
            sweep_interval: Duration::from_millis(m.sweep_interval_ms),
            stale_threshold: Duration::from_millis(m.stale_threshold_ms),
            queue_retention: Duration::from_millis(m.queue_retention_ms),
            execution_retention: Duration::from_millis(m.execution_retention_ms),
        });
    }

    /// Get the shutdown grace period configured for this context.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.config.node.shutdown_grace_ms)
    }
}

/// Provide a builder for `AppContext` values.
pub struct AppContextBuilder {
    /// The application wide configuration.
    config: Option<Arc<AppConfig>>,

    /// The storage facade.
    storage: Option<Arc<AppStorage>>,

    /// The problem catalog read model.
    catalog: Option<Arc<dyn ProblemCatalog>>,

    /// The sandbox executor adapter.
    sandbox: Option<Arc<dyn Sandbox>>,
}

impl AppContextBuilder {
    /// Create a new `AppContextBuilder` instance.
    pub fn new() -> Self {
        AppContextBuilder {
            config: None,
            storage: None,
            catalog: None,
            sandbox: None,
        }
    }

    /// Populate the configuration.
    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Some(Arc::new(config));
        self
    }

    /// Populate the catalog. When not called, a `YamlCatalog` over the
    /// configured problem directory is used.
    pub fn with_catalog(mut self, catalog: Arc<dyn ProblemCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Populate the sandbox adapter.
    pub fn with_sandbox(mut self, sandbox: Arc<dyn Sandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    /// Get a reference to the configuration, failing when it has not been
    /// populated yet.
    fn config(&self) -> Result<&Arc<AppConfig>> {
        self.config.as_ref().ok_or_else(|| Error::from(ErrorKind::Incomplete("config")))
    }

    /// Initialize the database connection and the stores on top of it.
    fn init_storage(&mut self) -> Result<()> {
        let config = self.config()?;
        log::info!("Opening sqlite database at {}", config.storage.db_file.display());
        let db = Arc::new(SqliteConnection::new(&config.storage.db_file)?);
        self.storage = Some(Arc::new(AppStorage::new(db)?));
        Ok(())
    }

    /// Initialize the default catalog unless one was injected.
    fn init_catalog(&mut self) -> Result<()> {
        if self.catalog.is_none() {
            let config = self.config()?;
            log::info!("Reading problem manifests from {}", config.catalog.problem_dir.display());
            self.catalog = Some(Arc::new(YamlCatalog::new(&config.catalog.problem_dir)));
        }
        Ok(())
    }

    /// Assemble the final `AppContext`.
    pub fn build(mut self) -> Result<AppContext> {
        self.init_storage()?;
        self.init_catalog()?;

        let config = self.config.ok_or_else(|| Error::from(ErrorKind::Incomplete("config")))?;
        let storage = self.storage.expect("storage was just initialized");
        let catalog = self.catalog.expect("catalog was just initialized");
        let sandbox = self.sandbox
            .ok_or_else(|| Error::from(ErrorKind::Incomplete("sandbox")))?;

        let bus = Arc::new(EventBus::new());
        crate::storage::SqliteEventLog::attach(storage.event_log(), &bus);

        let submissions = Arc::new(SubmissionService::new(
            storage.submissions(),
            storage.queue(),
            catalog.clone(),
            bus.clone(),
            config.limits.clone()));
        let executions = Arc::new(ExecutionService::new(
            storage.executions(),
            sandbox.clone(),
            bus.clone(),
            config.limits.clone()));

        let dispatch = Arc::new(DispatchContext {
            submissions: storage.submissions(),
            queue: storage.queue(),
            catalog: catalog.clone(),
            runner: CaseRunner::new(sandbox),
            bus: bus.clone(),
            poll_interval: Duration::from_millis(config.node.poll_interval_ms),
        });

        Ok(AppContext {
            config,
            storage,
            bus,
            catalog,
            submissions,
            executions,
            dispatch,
        })
    }
}
