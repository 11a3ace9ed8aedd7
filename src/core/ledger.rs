//! Per-tenant usage counters checked against plan ceilings.
//!
//! Each tenant has its own entry lock, so limit checks for unrelated tenants
//! never contend. Plans are resolved through a [`PlanDirectory`] and cached
//! until [`TenantLedger::refresh_tenant`] is called.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::{AdmissionReason, SchedulerError};
use crate::util::serde::{Priority, TenantId};

/// Limits and tier that follow from a tenant's subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantPlan {
    /// Plan name, e.g. `free`.
    pub name: String,
    /// Tier attached to every job the tenant submits.
    pub priority: Priority,
    /// Ceiling per counter. Counters without an entry are unlimited.
    pub limits: HashMap<String, u64>,
}

/// Persistence read: tenant → plan.
#[async_trait]
pub trait PlanDirectory: Send + Sync {
    /// Resolve the current plan of `tenant`.
    async fn plan_for(&self, tenant: &str) -> Result<TenantPlan, SchedulerError>;
}

/// Outcome of a limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitCheck {
    /// Whether `current + delta` stays within the ceiling.
    pub allowed: bool,
    /// Current counter value.
    pub current: u64,
    /// Ceiling, if the plan sets one.
    pub ceiling: Option<u64>,
    /// Why the check failed.
    pub reason: Option<String>,
}

/// One counter in a usage snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterUsage {
    /// Current value.
    pub current: u64,
    /// Plan ceiling, if any.
    pub ceiling: Option<u64>,
}

/// Usage snapshot of one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantUsage {
    /// Tenant identifier.
    pub tenant: TenantId,
    /// Cached plan name.
    pub plan: Option<String>,
    /// Counter values keyed by name.
    pub counters: BTreeMap<String, CounterUsage>,
}

#[derive(Debug, Default)]
struct TenantEntry {
    plan: Option<TenantPlan>,
    counters: HashMap<String, u64>,
}

impl TenantEntry {
    fn check(&self, tenant: &str, counter: &str, delta: u64) -> LimitCheck {
        let current = self.counters.get(counter).copied().unwrap_or(0);
        let ceiling = self
            .plan
            .as_ref()
            .and_then(|plan| plan.limits.get(counter).copied());
        let allowed = ceiling.map_or(true, |max| current.saturating_add(delta) <= max);
        let reason = (!allowed).then(|| {
            format!(
                "{counter} for tenant {tenant} would reach {} of {} allowed on plan {}",
                current.saturating_add(delta),
                ceiling.unwrap_or_default(),
                self.plan.as_ref().map_or("unknown", |p| p.name.as_str()),
            )
        });
        LimitCheck {
            allowed,
            current,
            ceiling,
            reason,
        }
    }
}

/// Tracks per-tenant usage and enforces plan ceilings.
pub struct TenantLedger {
    directory: Arc<dyn PlanDirectory>,
    tenants: RwLock<HashMap<TenantId, Arc<Mutex<TenantEntry>>>>,
}

impl std::fmt::Debug for TenantLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantLedger")
            .field("tenants", &self.tenants.read().len())
            .finish_non_exhaustive()
    }
}

impl TenantLedger {
    /// Ledger resolving plans through `directory`.
    #[must_use]
    pub fn new(directory: Arc<dyn PlanDirectory>) -> Self {
        Self {
            directory,
            tenants: RwLock::new(HashMap::new()),
        }
    }

    fn entry(&self, tenant: &str) -> Arc<Mutex<TenantEntry>> {
        if let Some(entry) = self.tenants.read().get(tenant) {
            return Arc::clone(entry);
        }
        Arc::clone(self.tenants.write().entry(tenant.to_string()).or_default())
    }

    /// Cached plan of `tenant`, fetched from the directory on first use.
    ///
    /// # Errors
    ///
    /// Propagates directory failures.
    pub async fn plan_for(&self, tenant: &str) -> Result<TenantPlan, SchedulerError> {
        let entry = self.entry(tenant);
        let cached = entry.lock().plan.clone();
        if let Some(plan) = cached {
            return Ok(plan);
        }
        let plan = self.directory.plan_for(tenant).await?;
        debug!(tenant, plan = %plan.name, priority = %plan.priority, "tenant plan resolved");
        let mut guard = entry.lock();
        if guard.plan.is_none() {
            guard.plan = Some(plan.clone());
        }
        Ok(plan)
    }

    /// Re-read the tenant's plan, e.g. after a subscription change.
    ///
    /// # Errors
    ///
    /// Propagates directory failures; the cached plan is kept on error.
    pub async fn refresh_tenant(&self, tenant: &str) -> Result<TenantPlan, SchedulerError> {
        let plan = self.directory.plan_for(tenant).await?;
        self.entry(tenant).lock().plan = Some(plan.clone());
        debug!(tenant, plan = %plan.name, "tenant plan refreshed");
        Ok(plan)
    }

    /// Whether `current + delta` on `counter` stays within the plan ceiling.
    ///
    /// # Errors
    ///
    /// Propagates directory failures.
    pub async fn check_tenant_limits(
        &self,
        tenant: &str,
        counter: &str,
        delta: u64,
    ) -> Result<LimitCheck, SchedulerError> {
        self.plan_for(tenant).await?;
        Ok(self.entry(tenant).lock().check(tenant, counter, delta))
    }

    /// Add `delta` to `counter`, re-checking the ceiling under the tenant's
    /// lock. Returns the new value.
    ///
    /// # Errors
    ///
    /// `AdmissionDenied(TenantLimitExceeded)` if the ceiling would be
    /// exceeded; nothing is incremented in that case.
    pub async fn increment_usage(
        &self,
        tenant: &str,
        counter: &str,
        delta: u64,
    ) -> Result<u64, SchedulerError> {
        self.plan_for(tenant).await?;
        let entry = self.entry(tenant);
        let mut entry = entry.lock();
        let check = entry.check(tenant, counter, delta);
        if !check.allowed {
            let detail = check.reason.unwrap_or_default();
            warn!(tenant, counter, %detail, "tenant limit exceeded");
            return Err(SchedulerError::AdmissionDenied(
                AdmissionReason::TenantLimitExceeded {
                    tenant: tenant.to_string(),
                    counter: counter.to_string(),
                    detail,
                },
            ));
        }
        let value = entry.counters.entry(counter.to_string()).or_insert(0);
        *value += delta;
        Ok(*value)
    }

    /// Hold `delta` units of `counter` for a submission in progress.
    ///
    /// # Errors
    ///
    /// Same as [`TenantLedger::increment_usage`].
    pub async fn reserve(&self, tenant: &str, counter: &str, delta: u64) -> Result<(), SchedulerError> {
        self.increment_usage(tenant, counter, delta).await.map(|_| ())
    }

    /// Release `delta` units of `counter`. Saturates at zero.
    pub fn decrement_usage(&self, tenant: &str, counter: &str, delta: u64) {
        let Some(entry) = self.tenants.read().get(tenant).cloned() else {
            return;
        };
        let mut entry = entry.lock();
        if let Some(value) = entry.counters.get_mut(counter) {
            *value = value.saturating_sub(delta);
        }
    }

    /// Usage snapshot of `tenant`, if it was ever seen.
    #[must_use]
    pub fn usage(&self, tenant: &str) -> Option<TenantUsage> {
        let entry = self.tenants.read().get(tenant).cloned()?;
        let entry = entry.lock();
        let mut names: Vec<&String> = entry.counters.keys().collect();
        if let Some(plan) = &entry.plan {
            names.extend(plan.limits.keys());
        }
        let counters = names
            .into_iter()
            .map(|name| {
                (
                    name.clone(),
                    CounterUsage {
                        current: entry.counters.get(name).copied().unwrap_or(0),
                        ceiling: entry.plan.as_ref().and_then(|p| p.limits.get(name).copied()),
                    },
                )
            })
            .collect();
        Some(TenantUsage {
            tenant: tenant.to_string(),
            plan: entry.plan.as_ref().map(|p| p.name.clone()),
            counters,
        })
    }
}
