//! Persisted state: profiles, baseline samples/stats, the archive, and the
//! state-transition / material-change logs (spec §6, §9).
//!
//! One sled tree per logical table, with every field read and written by
//! explicit name — spec §9 flags "ORM columns that do not exist in the
//! schema" as a pattern to avoid, so there is no derive-based column
//! inference here, just JSON blobs under keys this module controls.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    ArchivedBaseline, BaselineSample, BaselineStats, MaterialChangeEvent, Profile,
    StateTransitionEvent,
};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),
    #[error("(de)serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("transaction aborted: {0}")]
    Transaction(String),
}

impl From<sled::transaction::TransactionError<StorageError>> for StorageError {
    fn from(err: sled::transaction::TransactionError<StorageError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(e) => e,
            sled::transaction::TransactionError::Storage(e) => StorageError::Backend(e),
        }
    }
}

/// Sled-backed store for everything the baseline learner and profile
/// registry need durable (spec §6 "Persisted state").
pub struct Store {
    profiles: sled::Tree,
    baseline_samples: sled::Tree,
    baseline_stats: sled::Tree,
    archive: sled::Tree,
    transitions: sled::Tree,
    material_changes: sled::Tree,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self {
            profiles: db.open_tree("profiles")?,
            baseline_samples: db.open_tree("baseline_samples")?,
            baseline_stats: db.open_tree("baseline_stats")?,
            archive: db.open_tree("archived_baselines")?,
            transitions: db.open_tree("state_transitions")?,
            material_changes: db.open_tree("material_changes")?,
        })
    }

    /// An ephemeral, non-durable store for tests that don't need a
    /// filesystem fixture.
    pub fn open_temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self {
            profiles: db.open_tree("profiles")?,
            baseline_samples: db.open_tree("baseline_samples")?,
            baseline_stats: db.open_tree("baseline_stats")?,
            archive: db.open_tree("archived_baselines")?,
            transitions: db.open_tree("state_transitions")?,
            material_changes: db.open_tree("material_changes")?,
        })
    }

    // -- profiles table (spec §3, §4.E) --------------------------------

    pub fn put_profile(&self, profile: &Profile) -> Result<(), StorageError> {
        let value = serde_json::to_vec(profile)?;
        self.profiles.insert(profile.profile_id.as_bytes(), value)?;
        Ok(())
    }

    pub fn get_profile(&self, profile_id: &str) -> Result<Option<Profile>, StorageError> {
        match self.profiles.get(profile_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn delete_profile(&self, profile_id: &str) -> Result<(), StorageError> {
        self.profiles.remove(profile_id.as_bytes())?;
        Ok(())
    }

    pub fn list_profiles(&self) -> Result<Vec<Profile>, StorageError> {
        let mut out = Vec::new();
        for item in self.profiles.iter() {
            let (_key, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    /// Resolves a profile for `(machine_id, material_id)`: the
    /// machine-specific profile if one exists, else the material-default
    /// profile (`machine_id = None`), else `None` (spec §4.E).
    pub fn find_profile(
        &self,
        machine_id: Option<&str>,
        material_id: &str,
    ) -> Result<Option<Profile>, StorageError> {
        let profiles = self.list_profiles()?;
        if let Some(machine_id) = machine_id {
            if let Some(specific) = profiles
                .iter()
                .find(|p| p.machine_id.as_deref() == Some(machine_id) && p.material_id == material_id)
            {
                return Ok(Some(specific.clone()));
            }
        }
        Ok(profiles
            .into_iter()
            .find(|p| p.machine_id.is_none() && p.material_id == material_id))
    }

    // -- baseline samples table (spec §3, §4.F) --------------------------

    /// Records one sample, keyed by `(profile_id, metric_name, timestamp)`.
    /// Returns `false` without writing if that exact key already exists
    /// (spec §4.F: "Duplicate (profile, metric, timestamp) combinations
    /// are ignored").
    pub fn insert_sample(&self, sample: &BaselineSample) -> Result<bool, StorageError> {
        let key = sample_key(&sample.profile_id, &sample.metric_name, sample.timestamp);
        if self.baseline_samples.contains_key(&key)? {
            return Ok(false);
        }
        let value = serde_json::to_vec(sample)?;
        self.baseline_samples.insert(key, value)?;
        Ok(true)
    }

    /// All samples for `profile_id` and `metric_name`, ascending by time.
    pub fn samples_for_metric(
        &self,
        profile_id: &str,
        metric_name: &str,
    ) -> Result<Vec<BaselineSample>, StorageError> {
        let prefix = metric_prefix(profile_id, metric_name);
        let mut out = Vec::new();
        for item in self.baseline_samples.scan_prefix(&prefix) {
            let (_key, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    /// Count of distinct metric names with at least one sample recorded
    /// for `profile_id`.
    pub fn sample_counts_by_metric(
        &self,
        profile_id: &str,
    ) -> Result<std::collections::HashMap<String, usize>, StorageError> {
        let prefix = profile_prefix(profile_id);
        let mut counts = std::collections::HashMap::new();
        for item in self.baseline_samples.scan_prefix(&prefix) {
            let (_key, value) = item?;
            let sample: BaselineSample = serde_json::from_slice(&value)?;
            *counts.entry(sample.metric_name).or_insert(0usize) += 1;
        }
        Ok(counts)
    }

    fn delete_all_samples(
        tree: &sled::transaction::TransactionalTree,
        prefix: &[u8],
        scan: &sled::Tree,
    ) -> Result<(), sled::transaction::ConflictableTransactionError<StorageError>> {
        for item in scan.scan_prefix(prefix) {
            let (key, _) = item.map_err(|e| {
                sled::transaction::ConflictableTransactionError::Abort(StorageError::Backend(e))
            })?;
            tree.remove(key.to_vec())?;
        }
        Ok(())
    }

    // -- baseline stats table (spec §3, §4.F) -----------------------------

    pub fn get_stats(
        &self,
        profile_id: &str,
        metric_name: &str,
    ) -> Result<Option<BaselineStats>, StorageError> {
        match self.baseline_stats.get(stats_key(profile_id, metric_name))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All `(metric_name, stats)` pairs for `profile_id`.
    pub fn all_stats(
        &self,
        profile_id: &str,
    ) -> Result<std::collections::HashMap<String, BaselineStats>, StorageError> {
        let prefix = profile_prefix(profile_id);
        let mut out = std::collections::HashMap::new();
        for item in self.baseline_stats.scan_prefix(&prefix) {
            let (key, value) = item?;
            let metric_name = metric_name_from_stats_key(&key, profile_id);
            out.insert(metric_name, serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    /// Atomically writes every `(metric_name, stats)` pair, deletes all
    /// samples for `profile_id`, and updates the profile's flags — the
    /// whole operation is one sled transaction so a crash midway leaves
    /// either the old state or the new state, never a mix (spec §4.F
    /// finalize atomicity, spec §9 "async cascade deletion").
    pub fn finalize_baseline(
        &self,
        profile: &Profile,
        stats: &std::collections::HashMap<String, BaselineStats>,
    ) -> Result<(), StorageError> {
        let sample_scan = self.baseline_samples.clone();
        let prefix = profile_prefix(&profile.profile_id);

        (&self.baseline_stats, &self.baseline_samples, &self.profiles)
            .transaction(|(stats_tree, samples_tree, profiles_tree)| {
                for (metric_name, s) in stats {
                    let key = stats_key(&profile.profile_id, metric_name);
                    let value = serde_json::to_vec(s).map_err(|e| {
                        sled::transaction::ConflictableTransactionError::Abort(
                            StorageError::Serialization(e),
                        )
                    })?;
                    stats_tree.insert(key, value)?;
                }
                Self::delete_all_samples(samples_tree, &prefix, &sample_scan)?;
                let value = serde_json::to_vec(profile).map_err(|e| {
                    sled::transaction::ConflictableTransactionError::Abort(
                        StorageError::Serialization(e),
                    )
                })?;
                profiles_tree.insert(profile.profile_id.as_bytes(), value)?;
                Ok(())
            })
            .map_err(StorageError::from)
    }

    /// Atomically clears stats and samples for `profile_id` and writes the
    /// reset profile flags, optionally archiving the stats first (spec
    /// §4.F reset, §9 "async cascade deletion").
    pub fn reset_baseline(
        &self,
        profile: &Profile,
        archive_at: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        let sample_scan = self.baseline_samples.clone();
        let stats_scan = self.baseline_stats.clone();
        let prefix = profile_prefix(&profile.profile_id);

        (
            &self.baseline_stats,
            &self.baseline_samples,
            &self.profiles,
            &self.archive,
        )
            .transaction(|(stats_tree, samples_tree, profiles_tree, archive_tree)| {
                if let Some(at) = archive_at {
                    for item in stats_scan.scan_prefix(&prefix) {
                        let (key, value) = item.map_err(|e| {
                            sled::transaction::ConflictableTransactionError::Abort(
                                StorageError::Backend(e),
                            )
                        })?;
                        let stats: BaselineStats = serde_json::from_slice(&value).map_err(|e| {
                            sled::transaction::ConflictableTransactionError::Abort(
                                StorageError::Serialization(e),
                            )
                        })?;
                        let metric_name = metric_name_from_stats_key(&key, &profile.profile_id);
                        let archived = ArchivedBaseline {
                            profile_id: profile.profile_id.clone(),
                            metric_name: metric_name.clone(),
                            stats,
                            archived_at: at,
                        };
                        let akey = archive_key(&profile.profile_id, &metric_name, at);
                        let avalue = serde_json::to_vec(&archived).map_err(|e| {
                            sled::transaction::ConflictableTransactionError::Abort(
                                StorageError::Serialization(e),
                            )
                        })?;
                        archive_tree.insert(akey, avalue)?;
                    }
                }
                for item in stats_scan.scan_prefix(&prefix) {
                    let (key, _) = item.map_err(|e| {
                        sled::transaction::ConflictableTransactionError::Abort(
                            StorageError::Backend(e),
                        )
                    })?;
                    stats_tree.remove(key.to_vec())?;
                }
                Self::delete_all_samples(samples_tree, &prefix, &sample_scan)?;
                let value = serde_json::to_vec(profile).map_err(|e| {
                    sled::transaction::ConflictableTransactionError::Abort(
                        StorageError::Serialization(e),
                    )
                })?;
                profiles_tree.insert(profile.profile_id.as_bytes(), value)?;
                Ok(())
            })
            .map_err(StorageError::from)
    }

    /// Archived baselines for `profile_id`, most recently archived first
    /// (spec SPEC_FULL §6 "Archive retrieval").
    pub fn get_archived(
        &self,
        profile_id: &str,
    ) -> Result<Vec<ArchivedBaseline>, StorageError> {
        let prefix = profile_prefix(profile_id);
        let mut out = Vec::new();
        for item in self.archive.scan_prefix(&prefix) {
            let (_key, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        out.sort_by(|a, b| b.archived_at.cmp(&a.archived_at));
        Ok(out)
    }

    // -- state-transition log (spec §6) -----------------------------------

    pub fn append_transition(&self, event: &StateTransitionEvent) -> Result<(), StorageError> {
        let key = log_key(&event.machine_id, event.at);
        let value = serde_json::to_vec(event)?;
        self.transitions.insert(key, value)?;
        Ok(())
    }

    pub fn transitions_for_machine(
        &self,
        machine_id: &str,
    ) -> Result<Vec<StateTransitionEvent>, StorageError> {
        let prefix = format!("{machine_id}\0").into_bytes();
        let mut out = Vec::new();
        for item in self.transitions.scan_prefix(&prefix) {
            let (_key, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    // -- material-change log (spec §6) ------------------------------------

    pub fn append_material_change(
        &self,
        event: &MaterialChangeEvent,
    ) -> Result<(), StorageError> {
        let key = log_key(&event.machine_id, event.at);
        let value = serde_json::to_vec(event)?;
        self.material_changes.insert(key, value)?;
        Ok(())
    }

    pub fn material_changes_for_machine(
        &self,
        machine_id: &str,
    ) -> Result<Vec<MaterialChangeEvent>, StorageError> {
        let prefix = format!("{machine_id}\0").into_bytes();
        let mut out = Vec::new();
        for item in self.material_changes.scan_prefix(&prefix) {
            let (_key, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }
}

fn sample_key(profile_id: &str, metric_name: &str, at: DateTime<Utc>) -> Vec<u8> {
    let mut key = metric_prefix(profile_id, metric_name);
    key.extend_from_slice(&at.timestamp_nanos_opt().unwrap_or_default().to_be_bytes());
    key
}

fn profile_prefix(profile_id: &str) -> Vec<u8> {
    format!("{profile_id}\0").into_bytes()
}

fn metric_prefix(profile_id: &str, metric_name: &str) -> Vec<u8> {
    format!("{profile_id}\0{metric_name}\0").into_bytes()
}

fn stats_key(profile_id: &str, metric_name: &str) -> Vec<u8> {
    format!("{profile_id}\0{metric_name}").into_bytes()
}

fn metric_name_from_stats_key(key: &[u8], profile_id: &str) -> String {
    let raw = String::from_utf8_lossy(key);
    raw.trim_start_matches(&format!("{profile_id}\0")).to_string()
}

fn archive_key(profile_id: &str, metric_name: &str, at: DateTime<Utc>) -> Vec<u8> {
    let mut key = metric_prefix(profile_id, metric_name);
    key.extend_from_slice(&at.timestamp_nanos_opt().unwrap_or_default().to_be_bytes());
    key
}

fn log_key(machine_id: &str, at: DateTime<Utc>) -> Vec<u8> {
    let mut key = format!("{machine_id}\0").into_bytes();
    key.extend_from_slice(&at.timestamp_nanos_opt().unwrap_or_default().to_be_bytes());
    key
}

use sled::transaction::Transactional;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Profile;
    use chrono::Duration;

    fn sample(profile_id: &str, metric: &str, value: f64, at: DateTime<Utc>) -> BaselineSample {
        BaselineSample {
            profile_id: profile_id.to_string(),
            metric_name: metric.to_string(),
            value,
            timestamp: at,
        }
    }

    #[test]
    fn duplicate_sample_is_rejected() {
        let store = Store::open_temporary().unwrap();
        let now = Utc::now();
        assert!(store.insert_sample(&sample("P1", "pressure", 1.0, now)).unwrap());
        assert!(!store.insert_sample(&sample("P1", "pressure", 2.0, now)).unwrap());
        assert_eq!(store.samples_for_metric("P1", "pressure").unwrap().len(), 1);
    }

    #[test]
    fn finalize_writes_stats_and_clears_samples() {
        let store = Store::open_temporary().unwrap();
        let profile = Profile::new("P1", Some("M1".to_string()), "PP-H");
        let now = Utc::now();
        for i in 0..5 {
            store
                .insert_sample(&sample("P1", "pressure", 370.0, now + Duration::seconds(i)))
                .unwrap();
        }
        let mut stats = std::collections::HashMap::new();
        stats.insert(
            "pressure".to_string(),
            BaselineStats { mean: 370.0, std: 1.2, p05: 368.0, p95: 372.0, sample_count: 5 },
        );
        let mut finalized = profile.clone();
        finalized.baseline_learning = false;
        finalized.baseline_ready = true;
        store.finalize_baseline(&finalized, &stats).unwrap();

        assert!(store.samples_for_metric("P1", "pressure").unwrap().is_empty());
        assert_eq!(store.get_stats("P1", "pressure").unwrap().unwrap().sample_count, 5);
        assert!(store.get_profile("P1").unwrap().unwrap().baseline_ready);
    }

    #[test]
    fn reset_with_archive_retains_a_copy() {
        let store = Store::open_temporary().unwrap();
        let profile = Profile::new("P1", None, "PP-H");
        let mut stats = std::collections::HashMap::new();
        stats.insert(
            "pressure".to_string(),
            BaselineStats { mean: 370.0, std: 1.2, p05: 368.0, p95: 372.0, sample_count: 120 },
        );
        let mut ready = profile.clone();
        ready.baseline_learning = false;
        ready.baseline_ready = true;
        store.finalize_baseline(&ready, &stats).unwrap();

        let mut reset = ready.clone();
        reset.baseline_learning = false;
        reset.baseline_ready = false;
        store.reset_baseline(&reset, Some(Utc::now())).unwrap();

        assert!(store.get_stats("P1", "pressure").unwrap().is_none());
        let archived = store.get_archived("P1").unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].stats.sample_count, 120);
    }
}
