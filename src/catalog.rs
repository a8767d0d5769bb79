use std::collections::{HashMap, HashSet};

use tracing::info;

use crate::checkpoint::CheckpointState;
use crate::domain::{Entity, GeoLevel, Geoid, ResolvedEntity, SearchTask};
use crate::error::HarvestError;

/// Reference entities split by what the checkpoint already knows about them.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub resolved: Vec<ResolvedEntity>,
    pub not_found: Vec<Geoid>,
    pub pending: Vec<SearchTask>,
}

impl Catalog {
    pub fn total(&self) -> usize {
        self.resolved.len() + self.not_found.len() + self.pending.len()
    }
}

pub fn build_catalog(
    entities: &[Entity],
    checkpoint: &CheckpointState,
) -> Result<Catalog, HarvestError> {
    let state_names: HashMap<&str, &str> = entities
        .iter()
        .filter(|entity| entity.level == GeoLevel::State)
        .map(|entity| (entity.geoid.as_str(), entity.name.as_str()))
        .collect();

    let mut seen = HashSet::with_capacity(entities.len());
    let mut catalog = Catalog::default();

    for entity in entities {
        if !seen.insert(&entity.geoid) {
            return Err(HarvestError::DuplicateEntity(entity.geoid.to_string()));
        }
        if let Some(resolved) = checkpoint.resolved().get(&entity.geoid) {
            catalog.resolved.push(resolved.clone());
            continue;
        }
        if checkpoint.is_not_found(&entity.geoid) {
            catalog.not_found.push(entity.geoid.clone());
            continue;
        }
        catalog.pending.push(task_for(entity, &state_names)?);
    }

    info!(
        previously_resolved = catalog.resolved.len(),
        previously_not_found = catalog.not_found.len(),
        pending = catalog.pending.len(),
        "built search catalog"
    );
    Ok(catalog)
}

fn task_for(entity: &Entity, state_names: &HashMap<&str, &str>) -> Result<SearchTask, HarvestError> {
    let geoid = entity.geoid.clone();
    let name = entity.name.clone();
    if entity.level == GeoLevel::State {
        return Ok(SearchTask::State { geoid, name });
    }

    let state = entity
        .parent_name
        .as_deref()
        .map(str::trim)
        .filter(|parent| !parent.is_empty())
        .or_else(|| state_names.get(entity.geoid.state_fips()).copied())
        .ok_or_else(|| HarvestError::MissingParentState {
            geoid: entity.geoid.to_string(),
            level: entity.level.to_string(),
        })?
        .to_string();

    Ok(match entity.level {
        GeoLevel::County => SearchTask::County { geoid, name, state },
        _ => SearchTask::Place { geoid, name, state },
    })
}
