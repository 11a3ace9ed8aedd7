//! Build the process-wide scheduler context from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::config::SchedulerConfig;
use crate::core::{
    AuditSink, InMemoryAuditSink, MemoryMonitor, MemorySource, PlanDirectory, PriorityScheduler,
    QueueManager, RateLimiter, SchedulerError, Spawn, TenantLedger, UnitOfWork,
};
use crate::infra::{InMemoryPlanDirectory, ProcessMemorySource};
use crate::runtime::TokioSpawner;

/// Every scheduler component, wired once at start-up and shared by
/// reference. Independent contexts never share state.
#[derive(Clone)]
pub struct SchedulerContext {
    /// Configuration the context was built from.
    pub config: Arc<SchedulerConfig>,
    /// Queue owner.
    pub queues: QueueManager,
    /// Admission facade.
    pub scheduler: PriorityScheduler,
    /// Tenant usage ledger.
    pub ledger: Arc<TenantLedger>,
    /// Request rate limiter.
    pub limiter: Arc<RateLimiter>,
    /// Memory monitor.
    pub memory: Arc<MemoryMonitor>,
    /// Control-action audit trail.
    pub audit: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for SchedulerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerContext")
            .field("queues", &self.queues)
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

impl SchedulerContext {
    /// Start building a context from `config`.
    #[must_use]
    pub fn builder(config: SchedulerConfig) -> SchedulerContextBuilder {
        SchedulerContextBuilder::new(config)
    }

    /// Start the rate-limit sweep and memory sampling loops.
    pub fn start_background_tasks(&self) {
        self.limiter.start_sweeper();
        self.memory
            .start_memory_monitoring(self.config.memory.sample_interval_ms);
    }

    /// Stop the background loops started by
    /// [`SchedulerContext::start_background_tasks`].
    pub fn stop_background_tasks(&self) {
        self.limiter.stop_sweeper();
        self.memory.stop_memory_monitoring();
    }
}

/// Builder for [`SchedulerContext`] with injectable collaborators.
pub struct SchedulerContextBuilder {
    config: SchedulerConfig,
    executors: HashMap<String, Arc<dyn UnitOfWork>>,
    default_executor: Option<Arc<dyn UnitOfWork>>,
    directory: Option<Arc<dyn PlanDirectory>>,
    audit: Option<Arc<dyn AuditSink>>,
    memory_source: Option<Arc<dyn MemorySource>>,
    spawner: Option<Arc<dyn Spawn>>,
}

impl SchedulerContextBuilder {
    /// Builder with default collaborators.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            executors: HashMap::new(),
            default_executor: None,
            directory: None,
            audit: None,
            memory_source: None,
            spawner: None,
        }
    }

    /// Executor for one queue.
    #[must_use]
    pub fn executor(mut self, queue: impl Into<String>, executor: Arc<dyn UnitOfWork>) -> Self {
        self.executors.insert(queue.into(), executor);
        self
    }

    /// Executor for queues without their own.
    #[must_use]
    pub fn default_executor(mut self, executor: Arc<dyn UnitOfWork>) -> Self {
        self.default_executor = Some(executor);
        self
    }

    /// Tenant plan lookup. Defaults to the configured plans with every tenant
    /// on the default plan.
    #[must_use]
    pub fn plan_directory(mut self, directory: Arc<dyn PlanDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Audit sink. Defaults to a bounded in-memory sink.
    #[must_use]
    pub fn audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Memory source. Defaults to procfs.
    #[must_use]
    pub fn memory_source(mut self, source: Arc<dyn MemorySource>) -> Self {
        self.memory_source = Some(source);
        self
    }

    /// Spawner for job execution. Defaults to the current tokio runtime.
    #[must_use]
    pub fn spawner(mut self, spawner: Arc<dyn Spawn>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Validate the configuration and wire every component.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for an invalid configuration or a queue without an
    /// executor; `Backend` when no spawner was given outside a tokio runtime.
    pub fn build(self) -> Result<SchedulerContext, SchedulerError> {
        let Self {
            config,
            executors,
            default_executor,
            directory,
            audit,
            memory_source,
            spawner,
        } = self;
        config.validate().map_err(SchedulerError::InvalidConfig)?;

        let spawner = match spawner {
            Some(spawner) => spawner,
            None => {
                let handle = tokio::runtime::Handle::try_current().map_err(|e| {
                    SchedulerError::Backend(format!("no spawner given and no tokio runtime: {e}"))
                })?;
                Arc::new(TokioSpawner::new(handle))
            }
        };

        let queues = QueueManager::new(
            config.queues.clone(),
            config.scheduling.clone(),
            &executors,
            default_executor,
            spawner,
        )?;

        let directory =
            directory.unwrap_or_else(|| Arc::new(InMemoryPlanDirectory::from_config(&config)));
        let ledger = Arc::new(TenantLedger::new(directory));
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let source = memory_source
            .unwrap_or_else(|| Arc::new(ProcessMemorySource::new(config.memory.limit_bytes)));
        let memory = Arc::new(MemoryMonitor::new(
            config.memory.clone(),
            source,
            queues.clone(),
        ));
        let scheduler = PriorityScheduler::new(
            queues.clone(),
            Arc::clone(&ledger),
            Arc::clone(&limiter),
            config.queue_counters.clone(),
        );
        let audit = audit.unwrap_or_else(|| Arc::new(InMemoryAuditSink::default()));

        info!(queues = ?queues.queue_names(), "scheduler context built");
        Ok(SchedulerContext {
            config: Arc::new(config),
            queues,
            scheduler,
            ledger,
            limiter,
            memory,
            audit,
        })
    }
}
