//! In-memory tenant store. One instance per owner; no process-wide state.

use crate::error::{ResolveError, TenancyError};
use crate::model::{Tenant, TenantStatus};
use crate::store::TenantStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Tenant store backed by a locked map. Uniqueness and version checks run
/// under the write lock, so they are atomic with the write.
#[derive(Default)]
pub struct MemoryTenantStore {
    by_id: RwLock<HashMap<Uuid, Tenant>>,
}

impl MemoryTenantStore {
    pub fn new() -> Self {
        MemoryTenantStore::default()
    }

    /// Number of records including soft-deleted ones.
    pub fn len(&self) -> usize {
        self.by_id.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<Uuid, Tenant>>, TenancyError> {
        self.by_id
            .read()
            .map_err(|_| TenancyError::Corrupt("tenant store lock poisoned".into()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Tenant>>, TenancyError> {
        self.by_id
            .write()
            .map_err(|_| TenancyError::Corrupt("tenant store lock poisoned".into()))
    }

    fn find_live<F>(&self, pred: F) -> Result<Option<Tenant>, TenancyError>
    where
        F: Fn(&Tenant) -> bool,
    {
        let guard = self.read()?;
        Ok(guard
            .values()
            .find(|t| t.deleted_at.is_none() && pred(t))
            .cloned())
    }
}

/// Uniqueness among live records other than `candidate` itself.
fn check_unique(existing: &HashMap<Uuid, Tenant>, candidate: &Tenant) -> Result<(), TenancyError> {
    for other in existing.values() {
        if other.id == candidate.id || other.deleted_at.is_some() {
            continue;
        }
        if other.slug == candidate.slug {
            return Err(TenancyError::DuplicateSlug(candidate.slug.clone()));
        }
        if let (Some(a), Some(b)) = (&other.domain, &candidate.domain) {
            if a.eq_ignore_ascii_case(b) {
                return Err(TenancyError::DuplicateDomain(b.clone()));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl TenantStore for MemoryTenantStore {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Tenant>, TenancyError> {
        self.find_live(|t| t.id == id)
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Tenant>, TenancyError> {
        self.find_live(|t| t.slug == slug)
    }

    async fn get_by_domain(&self, domain: &str) -> Result<Option<Tenant>, TenancyError> {
        self.find_live(|t| t.domain.as_deref().map(|d| d.eq_ignore_ascii_case(domain)).unwrap_or(false))
    }

    async fn create(&self, tenant: &Tenant) -> Result<Tenant, TenancyError> {
        let mut guard = self.write()?;
        if guard.contains_key(&tenant.id) {
            return Err(TenancyError::Validation(format!("tenant id already exists: {}", tenant.id)));
        }
        check_unique(&guard, tenant)?;
        let mut stored = tenant.clone();
        stored.version = 1;
        stored.deleted_at = None;
        guard.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update(&self, tenant: &Tenant) -> Result<Tenant, TenancyError> {
        let mut guard = self.write()?;
        let current = guard
            .get(&tenant.id)
            .filter(|t| t.deleted_at.is_none())
            .ok_or(TenancyError::Resolve(ResolveError::NotFound))?;
        if current.version != tenant.version {
            return Err(TenancyError::ConcurrentUpdateConflict { tenant_id: tenant.id });
        }
        check_unique(&guard, tenant)?;
        let mut stored = tenant.clone();
        stored.version = tenant.version + 1;
        stored.updated_at = Utc::now();
        guard.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool, TenancyError> {
        let mut guard = self.write()?;
        match guard.get_mut(&id).filter(|t| t.deleted_at.is_none()) {
            Some(t) => {
                let now = Utc::now();
                t.deleted_at = Some(now);
                t.updated_at = now;
                t.version += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_expired_trials(&self, now: DateTime<Utc>) -> Result<Vec<Tenant>, TenancyError> {
        let guard = self.read()?;
        let mut out: Vec<Tenant> = guard
            .values()
            .filter(|t| {
                t.deleted_at.is_none()
                    && t.status == TenantStatus::Trial
                    && t.trial_ends_at.map(|end| end <= now).unwrap_or(true)
            })
            .cloned()
            .collect();
        out.sort_by_key(|t| t.created_at);
        Ok(out)
    }
}
