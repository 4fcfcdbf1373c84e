//! Facility code -> internal id resolution with auto-provisioning.
//!
//! The registry is constructed per run and passed into the pipeline. Its cache
//! is a `std::sync::Mutex<HashMap>`; the lock is only taken for map access and
//! is never held across an `.await`, so concurrent date-units can share one
//! registry behind an `Arc`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Context, Result};

use crate::renewable::FacilityClassification;
use crate::store::{CreateFacility, FacilityStore};
use crate::FacilityIdentity;

pub struct FacilityRegistry {
    store: Arc<dyn FacilityStore>,
    cache: Mutex<HashMap<String, FacilityIdentity>>,
    placeholders_created: AtomicU64,
}

impl FacilityRegistry {
    /// Warm the cache from every active facility. Failure here aborts the run.
    pub async fn load(store: Arc<dyn FacilityStore>) -> Result<Self> {
        let active = store
            .list_active()
            .await
            .context("facility registry warm-up failed")?;

        let map: HashMap<String, FacilityIdentity> = active
            .into_iter()
            .map(|f| (f.external_code.clone(), f))
            .collect();
        tracing::info!(facilities = map.len(), "facility registry loaded");

        Ok(Self {
            store,
            cache: Mutex::new(map),
            placeholders_created: AtomicU64::new(0),
        })
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, FacilityIdentity>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remember(&self, identity: FacilityIdentity) -> i64 {
        let id = identity.internal_id;
        self.cache().insert(identity.external_code.clone(), identity);
        id
    }

    /// Resolve a facility code, creating a placeholder facility when the store
    /// has never seen it. Repeated calls for one unknown code create one facility.
    pub async fn resolve(&self, code: &str) -> Result<i64> {
        let cached = self.cache().get(code).map(|f| f.internal_id);
        if let Some(id) = cached {
            return Ok(id);
        }

        // Another process may have created it since warm-up.
        if let Some(found) = self
            .store
            .find_by_code(code)
            .await
            .with_context(|| format!("facility lookup failed code={code}"))?
        {
            return Ok(self.remember(found));
        }

        match self
            .store
            .create_with_defaults(code)
            .await
            .with_context(|| format!("facility create failed code={code}"))?
        {
            CreateFacility::Created(identity) => {
                self.placeholders_created.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    code = %code,
                    facility_id = identity.internal_id,
                    "auto-created placeholder facility"
                );
                Ok(self.remember(identity))
            }
            CreateFacility::AlreadyExists => {
                let winner = self
                    .store
                    .find_by_code(code)
                    .await
                    .with_context(|| format!("facility re-fetch failed code={code}"))?
                    .ok_or_else(|| {
                        anyhow!("facility {code} reported as existing but could not be fetched")
                    })?;
                Ok(self.remember(winner))
            }
        }
    }

    pub fn get(&self, code: &str) -> Option<FacilityIdentity> {
        self.cache().get(code).cloned()
    }

    pub fn len(&self) -> usize {
        self.cache().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache().is_empty()
    }

    /// Placeholders created by this registry instance.
    pub fn placeholders_created(&self) -> u64 {
        self.placeholders_created.load(Ordering::Relaxed)
    }

    /// Renewable classification of every cached facility, as of now.
    pub fn classification(&self) -> FacilityClassification {
        FacilityClassification::from_identities(self.cache().values())
    }
}
