//! Baseline learner: per-profile sample collection gated by PRODUCTION,
//! finalize into frozen statistics, and reset (spec §4.F).
//!
//! Start/ingest/finalize/reset are serialized per profile — cross-profile
//! operations are independent (spec §5) — via a lazily-created mutex per
//! `profile_id`. Storage itself is sled, so the actual reads/writes are
//! synchronous; the mutex only protects the read-modify-write sequence
//! each operation performs against the profile's flags.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::profiles::{ProfileError, ProfileRegistry};
use crate::statistics;
use crate::storage::{Store, StorageError};
use crate::types::metric_names::EXPECTED_BASELINE_METRICS;
use crate::types::{BaselineStats, MachineState};

#[derive(Debug, Error)]
pub enum BaselineError {
    #[error("profile {profile_id} is not in learning mode")]
    NotLearning { profile_id: String },
    #[error("cannot ingest: profile {0}'s baseline is ready (frozen)")]
    ReadyProfileIngest(String),
    #[error("insufficient samples for profile {profile_id}: {deficient:?} below the minimum")]
    InsufficientSamples {
        profile_id: String,
        deficient: Vec<String>,
    },
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct BaselineLearner {
    store: Arc<Store>,
    profiles: Arc<ProfileRegistry>,
    min_samples_per_metric: usize,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl BaselineLearner {
    pub fn new(
        store: Arc<Store>,
        profiles: Arc<ProfileRegistry>,
        min_samples_per_metric: usize,
    ) -> Self {
        Self {
            store,
            profiles,
            min_samples_per_metric,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, profile_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(profile_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Sets `baseline_learning = true`, `baseline_ready = false`, and
    /// deletes any existing stats/samples. Idempotent on a profile already
    /// in learning mode (spec §4.F).
    pub fn start_learning(&self, profile_id: &str) -> Result<(), BaselineError> {
        let lock = self.lock_for(profile_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut profile = self.profiles.get(profile_id)?;
        if profile.baseline_learning {
            return Ok(());
        }
        profile.baseline_learning = true;
        profile.baseline_ready = false;
        self.store.reset_baseline(&profile, None)?;
        Ok(())
    }

    /// Persists a sample only if the profile is in learning mode and
    /// `state_at_sample` is PRODUCTION. Null values and samples offered
    /// while the profile is neither learning nor ready are dropped
    /// silently — only writing against an already-`ready` (frozen)
    /// profile is surfaced as an error, since that would violate
    /// invariant 3 (spec §3, §7 "invariant breach").
    ///
    /// Returns `true` if the sample was actually persisted.
    pub fn ingest(
        &self,
        profile_id: &str,
        metric_name: &str,
        value: Option<f64>,
        state_at_sample: MachineState,
        timestamp: DateTime<Utc>,
    ) -> Result<bool, BaselineError> {
        let Some(value) = value else {
            return Ok(false);
        };
        if state_at_sample != MachineState::Production {
            return Ok(false);
        }

        let lock = self.lock_for(profile_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let profile = self.profiles.get(profile_id)?;
        if profile.baseline_ready {
            return Err(BaselineError::ReadyProfileIngest(profile_id.to_string()));
        }
        if !profile.baseline_learning {
            return Ok(false);
        }

        let sample = crate::types::BaselineSample {
            profile_id: profile_id.to_string(),
            metric_name: metric_name.to_string(),
            value,
            timestamp,
        };
        Ok(self.store.insert_sample(&sample)?)
    }

    /// Requires at least `min_samples_per_metric` samples for every metric
    /// in `EXPECTED_BASELINE_METRICS`. On success, writes mean/std/p05/p95
    /// per metric, deletes all samples, and flips the profile's flags, all
    /// in one storage transaction (spec §4.F finalize atomicity).
    pub fn finalize(&self, profile_id: &str) -> Result<(), BaselineError> {
        let lock = self.lock_for(profile_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut profile = self.profiles.get(profile_id)?;
        if !profile.baseline_learning {
            return Err(BaselineError::NotLearning {
                profile_id: profile_id.to_string(),
            });
        }

        let counts = self.store.sample_counts_by_metric(profile_id)?;
        let deficient: Vec<String> = EXPECTED_BASELINE_METRICS
            .iter()
            .filter(|m| counts.get(**m).copied().unwrap_or(0) < self.min_samples_per_metric)
            .map(|m| m.to_string())
            .collect();
        if !deficient.is_empty() {
            return Err(BaselineError::InsufficientSamples {
                profile_id: profile_id.to_string(),
                deficient,
            });
        }

        let mut stats = HashMap::with_capacity(EXPECTED_BASELINE_METRICS.len());
        for metric_name in EXPECTED_BASELINE_METRICS {
            let samples = self.store.samples_for_metric(profile_id, metric_name)?;
            let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
            let mean = statistics::mean(&values).unwrap_or(0.0);
            let std = statistics::sample_std(&values).unwrap_or(0.0);
            let p05 = statistics::percentile(&values, 5.0).unwrap_or(mean);
            let p95 = statistics::percentile(&values, 95.0).unwrap_or(mean);
            stats.insert(
                metric_name.to_string(),
                BaselineStats {
                    mean,
                    std,
                    p05,
                    p95,
                    sample_count: values.len(),
                },
            );
        }

        profile.baseline_learning = false;
        profile.baseline_ready = true;
        self.store.finalize_baseline(&profile, &stats)?;
        Ok(())
    }

    /// Clears flags and drops stats/samples. When `archive` is true, a
    /// timestamped copy of the stats is retained for audit (spec §4.F).
    pub fn reset(&self, profile_id: &str, archive: bool) -> Result<(), BaselineError> {
        let lock = self.lock_for(profile_id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut profile = self.profiles.get(profile_id)?;
        profile.baseline_learning = false;
        profile.baseline_ready = false;
        let archive_at = archive.then(Utc::now);
        self.store.reset_baseline(&profile, archive_at)?;
        Ok(())
    }

    /// Background predicate consulted by the ingestion pipeline and the
    /// alarm subsystem: alarm generation is suppressed for machines whose
    /// resolved profile is in learning mode (spec §4.F, a pure predicate
    /// with no cross-module mutation per spec §9).
    pub fn is_learning(&self, profile_id: &str) -> Result<bool, BaselineError> {
        Ok(self.profiles.get(profile_id)?.baseline_learning)
    }

    /// Read accessor for archived baselines retained by `reset(..., true)`
    /// (SPEC_FULL §6 "Archive retrieval").
    pub fn get_archived(
        &self,
        profile_id: &str,
    ) -> Result<Vec<crate::types::ArchivedBaseline>, BaselineError> {
        Ok(self.store.get_archived(profile_id)?)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn learner() -> (BaselineLearner, Arc<ProfileRegistry>) {
        let store = Arc::new(Store::open_temporary().unwrap());
        let profiles = Arc::new(ProfileRegistry::new(store.clone()));
        (BaselineLearner::new(store, profiles.clone(), 100), profiles)
    }

    fn non_production_state(idx: usize) -> MachineState {
        let states = [
            MachineState::Off,
            MachineState::Idle,
            MachineState::Heating,
            MachineState::Cooling,
            MachineState::SensorFault,
            MachineState::Unknown,
        ];
        states[idx % states.len()]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Ingest never persists a sample unless the machine was in
        /// PRODUCTION at the moment of the reading, no matter the value
        /// (invariant: learning gate, spec §8).
        #[test]
        fn ingest_never_persists_outside_production(value in -500.0..500.0f64, state_idx in 0..6usize) {
            let (learner, profiles) = learner();
            let profile = profiles.create(Some("M1".to_string()), "PP-H").unwrap();
            let persisted = learner
                .ingest(
                    &profile.profile_id,
                    "pressure",
                    Some(value),
                    non_production_state(state_idx),
                    Utc::now(),
                )
                .unwrap();
            prop_assert!(!persisted);
        }

        /// A finalize call that fails for insufficient samples never
        /// mutates the profile's flags (atomicity, spec §4.F).
        #[test]
        fn failed_finalize_leaves_profile_untouched(sample_count in 0..99usize) {
            let (learner, profiles) = learner();
            let profile = profiles.create(Some("M1".to_string()), "PP-H").unwrap();
            let now = Utc::now();
            for i in 0..sample_count {
                learner
                    .ingest(
                        &profile.profile_id,
                        "pressure",
                        Some(370.0),
                        MachineState::Production,
                        now + chrono::Duration::seconds(i as i64),
                    )
                    .unwrap();
            }
            let before = profiles.get(&profile.profile_id).unwrap();
            let result = learner.finalize(&profile.profile_id);
            prop_assert!(result.is_err());
            let after = profiles.get(&profile.profile_id).unwrap();
            prop_assert_eq!(before.baseline_learning, after.baseline_learning);
            prop_assert_eq!(before.baseline_ready, after.baseline_ready);
        }
    }
}
