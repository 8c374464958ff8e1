//! Config-backed tenant directory and capability check.
//!
//! Deployments without a dedicated tenant service declare tenants in
//! `reporthub.toml`; both collaborators read the same `[tenants.*]`
//! sections. Unknown tenants fail closed in both directions.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use reporthub_core::config::TenantConfig;
use reporthub_core::external::{CapabilityCheck, DirectoryError, TenantDirectory};

pub struct ConfigTenantDirectory {
    tenants: HashMap<String, TenantConfig>,
}

impl ConfigTenantDirectory {
    pub fn new(tenants: HashMap<String, TenantConfig>) -> Self {
        Self { tenants }
    }
}

#[async_trait]
impl TenantDirectory for ConfigTenantDirectory {
    async fn allowed_domains(&self, tenant_id: &str) -> Result<HashSet<String>, DirectoryError> {
        let tenant = self
            .tenants
            .get(tenant_id)
            .ok_or_else(|| DirectoryError(format!("unknown tenant: {tenant_id}")))?;
        Ok(tenant
            .allowed_domains
            .iter()
            .map(|d| d.to_lowercase())
            .collect())
    }
}

pub struct ConfigCapabilities {
    tenants: HashMap<String, TenantConfig>,
}

impl ConfigCapabilities {
    pub fn new(tenants: HashMap<String, TenantConfig>) -> Self {
        Self { tenants }
    }
}

impl CapabilityCheck for ConfigCapabilities {
    /// An empty `schedulers` list means the tenant placed no restriction;
    /// an unknown tenant always denies.
    fn can_schedule_reports(&self, user_id: &str, tenant_id: &str) -> bool {
        match self.tenants.get(tenant_id) {
            Some(t) => t.schedulers.is_empty() || t.schedulers.iter().any(|u| u == user_id),
            None => false,
        }
    }
}
