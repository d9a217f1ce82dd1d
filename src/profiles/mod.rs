//! Profile registry: enforces uniqueness of `(machine_id, material_id)`
//! and resolves the machine-specific-then-material-default lookup (spec
//! §4.E).

use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::storage::{Store, StorageError};
use crate::types::Profile;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("a profile already exists for machine={machine:?} material={material}")]
    AlreadyExists {
        machine: Option<String>,
        material: String,
    },
    #[error("no profile with id {0}")]
    NotFound(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Maps `(machine, material)` to a `Profile`, persisted through `Store`.
/// Shared read-mostly across pollers and the baseline learner; every
/// mutation round-trips through the storage layer so it is immediately
/// visible to other holders of the same `Arc<ProfileRegistry>` (spec §5
/// "Profile registry and baseline store: shared, per-profile
/// serialization").
pub struct ProfileRegistry {
    store: Arc<Store>,
}

impl ProfileRegistry {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Creates a fresh profile for `(machine_id, material_id)`, rejecting
    /// the call if one already exists for that exact pair — including the
    /// material-default case where `machine_id` is `None` (spec §4.E).
    /// A new profile starts in learning mode so samples accumulate as
    /// soon as production is observed.
    pub fn create(
        &self,
        machine_id: Option<String>,
        material_id: impl Into<String>,
    ) -> Result<Profile, ProfileError> {
        let material_id = material_id.into();
        if self.lookup_exact(machine_id.as_deref(), &material_id)?.is_some() {
            return Err(ProfileError::AlreadyExists {
                machine: machine_id,
                material: material_id,
            });
        }
        let profile = Profile::new(Uuid::new_v4().to_string(), machine_id, material_id);
        self.store.put_profile(&profile)?;
        Ok(profile)
    }

    pub fn get(&self, profile_id: &str) -> Result<Profile, ProfileError> {
        self.store
            .get_profile(profile_id)?
            .ok_or_else(|| ProfileError::NotFound(profile_id.to_string()))
    }

    pub fn delete(&self, profile_id: &str) -> Result<(), ProfileError> {
        self.store.delete_profile(profile_id)?;
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<Profile>, ProfileError> {
        Ok(self.store.list_profiles()?)
    }

    /// All finalized per-metric stats for `profile_id`, for the evaluator
    /// and ML client to consult (spec §4.G, §6).
    pub fn baseline_stats(
        &self,
        profile_id: &str,
    ) -> Result<std::collections::HashMap<String, crate::types::BaselineStats>, ProfileError> {
        Ok(self.store.all_stats(profile_id)?)
    }

    /// Exact match for `(machine_id, material_id)`, no fallback.
    fn lookup_exact(
        &self,
        machine_id: Option<&str>,
        material_id: &str,
    ) -> Result<Option<Profile>, ProfileError> {
        let profiles = self.store.list_profiles()?;
        Ok(profiles
            .into_iter()
            .find(|p| p.machine_id.as_deref() == machine_id && p.material_id == material_id))
    }

    /// Resolves the profile for a runtime `(machine, material)` pair:
    /// machine-specific profile if present, else the material-default
    /// profile (`machine_id = None`), else `None` (spec §4.E; the
    /// material-default fallback is optional per SPEC_FULL's Open
    /// Question resolution — callers treat an absent profile as "no
    /// baseline available", never as an error).
    pub fn resolve(
        &self,
        machine_id: &str,
        material_id: &str,
    ) -> Result<Option<Profile>, ProfileError> {
        Ok(self.store.find_profile(Some(machine_id), material_id)?)
    }
}
