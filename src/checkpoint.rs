use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{Geoid, ResolvedEntity};
use crate::error::HarvestError;
use crate::storage::{ObjectStore, join_key};

pub const CHECKPOINT_NAME: &str = "search_results.json";

/// Which geoids have been resolved or confirmed absent. Only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointState {
    resolved: IndexMap<Geoid, ResolvedEntity>,
    not_found: IndexSet<Geoid>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    geo_infos: Vec<ResolvedEntity>,
    not_found: Vec<Geoid>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub resolved_added: usize,
    pub not_found_added: usize,
    pub conflicts_ignored: usize,
}

impl CheckpointState {
    pub fn resolved(&self) -> &IndexMap<Geoid, ResolvedEntity> {
        &self.resolved
    }

    pub fn not_found(&self) -> &IndexSet<Geoid> {
        &self.not_found
    }

    pub fn is_resolved(&self, geoid: &Geoid) -> bool {
        self.resolved.contains_key(geoid)
    }

    pub fn is_not_found(&self, geoid: &Geoid) -> bool {
        self.not_found.contains(geoid)
    }

    pub fn len(&self) -> usize {
        self.resolved.len() + self.not_found.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn resolved_entities(&self) -> Vec<ResolvedEntity> {
        self.resolved.values().cloned().collect()
    }

    /// Adds new classifications while keeping `resolved` and `not_found` disjoint:
    /// a geoid already in one set is never moved into the other.
    pub fn merge<R, N>(&mut self, resolved: R, not_found: N) -> MergeOutcome
    where
        R: IntoIterator<Item = ResolvedEntity>,
        N: IntoIterator<Item = Geoid>,
    {
        let mut outcome = MergeOutcome::default();
        for entity in resolved {
            if self.not_found.contains(&entity.geoid) {
                outcome.conflicts_ignored += 1;
                continue;
            }
            if self.resolved.insert(entity.geoid.clone(), entity).is_none() {
                outcome.resolved_added += 1;
            }
        }
        for geoid in not_found {
            if self.resolved.contains_key(&geoid) {
                outcome.conflicts_ignored += 1;
                continue;
            }
            if self.not_found.insert(geoid) {
                outcome.not_found_added += 1;
            }
        }
        outcome
    }

    fn from_file(file: CheckpointFile) -> Self {
        let mut state = Self::default();
        state.merge(file.geo_infos, file.not_found);
        state
    }

    fn to_file(&self) -> CheckpointFile {
        CheckpointFile {
            geo_infos: self.resolved.values().cloned().collect(),
            not_found: self.not_found.iter().cloned().collect(),
        }
    }
}

pub struct CheckpointStore<'a, S: ObjectStore> {
    store: &'a S,
    key: String,
}

impl<'a, S: ObjectStore> CheckpointStore<'a, S> {
    pub fn new(store: &'a S, prefix: &str) -> Self {
        Self {
            store,
            key: join_key(prefix, CHECKPOINT_NAME),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Never fails: anything unreadable is treated as a cold start.
    pub fn load(&self) -> CheckpointState {
        match self.try_load() {
            Ok(state) => {
                info!(
                    key = %self.key,
                    resolved = state.resolved.len(),
                    not_found = state.not_found.len(),
                    "loaded checkpoint"
                );
                state
            }
            Err(err) => {
                warn!(key = %self.key, error = %err, "no usable checkpoint, starting fresh");
                CheckpointState::default()
            }
        }
    }

    fn try_load(&self) -> Result<CheckpointState, HarvestError> {
        let bytes = self.store.get(&self.key)?;
        let file: CheckpointFile = serde_json::from_slice(&bytes)
            .map_err(|err| HarvestError::Storage(format!("parse {}: {err}", self.key)))?;
        Ok(CheckpointState::from_file(file))
    }

    pub fn save(&self, state: &CheckpointState) -> Result<(), HarvestError> {
        let content = serde_json::to_vec_pretty(&state.to_file())
            .map_err(|err| HarvestError::Storage(err.to_string()))?;
        self.store.put(&self.key, &content)?;
        info!(
            key = %self.key,
            resolved = state.resolved.len(),
            not_found = state.not_found.len(),
            "saved checkpoint"
        );
        Ok(())
    }
}
