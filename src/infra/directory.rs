//! In-memory tenant → plan directory.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

pub use crate::core::ledger::{PlanDirectory, TenantPlan};
use crate::config::{PlanConfig, SchedulerConfig};
use crate::core::SchedulerError;
use crate::util::serde::TenantId;

/// Plan directory backed by configured plans and an assignment table.
///
/// Tenants without an assignment resolve to the default plan.
#[derive(Debug)]
pub struct InMemoryPlanDirectory {
    plans: HashMap<String, PlanConfig>,
    default_plan: String,
    assignments: RwLock<HashMap<TenantId, String>>,
}

impl InMemoryPlanDirectory {
    /// Directory over the plans of `config`.
    #[must_use]
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            plans: config.plans.clone(),
            default_plan: config.default_plan.clone(),
            assignments: RwLock::new(HashMap::new()),
        }
    }

    /// Put `tenant` on `plan`.
    pub fn assign(&self, tenant: impl Into<TenantId>, plan: impl Into<String>) {
        self.assignments.write().insert(tenant.into(), plan.into());
    }

    /// Names of the configured plans, sorted.
    #[must_use]
    pub fn plan_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plans.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl PlanDirectory for InMemoryPlanDirectory {
    async fn plan_for(&self, tenant: &str) -> Result<TenantPlan, SchedulerError> {
        let name = self
            .assignments
            .read()
            .get(tenant)
            .cloned()
            .unwrap_or_else(|| self.default_plan.clone());
        let plan = self
            .plans
            .get(&name)
            .ok_or_else(|| SchedulerError::Backend(format!("tenant {tenant} is on unknown plan {name}")))?;
        Ok(TenantPlan {
            name,
            priority: plan.priority,
            limits: plan.limits.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::serde::Priority;

    #[tokio::test]
    async fn test_assignment_and_default() {
        let directory = InMemoryPlanDirectory::from_config(&SchedulerConfig::default());
        directory.assign("acme", "agency");
        assert_eq!(directory.plan_for("acme").await.unwrap().priority, Priority::Top);
        assert_eq!(directory.plan_for("nobody").await.unwrap().name, "free");

        directory.assign("acme", "enterprise");
        assert!(matches!(
            directory.plan_for("acme").await,
            Err(SchedulerError::Backend(_))
        ));
        assert_eq!(directory.plan_names(), vec!["agency", "free", "pro"]);
    }
}
