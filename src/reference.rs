use serde::Deserialize;
use tracing::info;

use crate::domain::{Entity, GeoLevel, Geoid};
use crate::error::HarvestError;
use crate::storage::ObjectStore;

/// Supplies the full list of geographies to resolve, states first.
pub trait EntitySource {
    fn load(&self) -> Result<Vec<Entity>, HarvestError>;
}

#[derive(Debug, Default, Deserialize)]
pub struct ReferenceFile {
    #[serde(default)]
    pub states: Vec<ReferenceRecord>,
    #[serde(default)]
    pub counties: Vec<ReferenceRecord>,
    #[serde(default)]
    pub places: Vec<ReferenceRecord>,
}

#[derive(Debug, Deserialize)]
pub struct ReferenceRecord {
    pub geoid: String,
    pub name: String,
    #[serde(default, alias = "parentName")]
    pub parent_name: Option<String>,
}

impl ReferenceFile {
    pub fn into_entities(self) -> Result<Vec<Entity>, HarvestError> {
        let mut entities =
            Vec::with_capacity(self.states.len() + self.counties.len() + self.places.len());
        for (level, records) in [
            (GeoLevel::State, self.states),
            (GeoLevel::County, self.counties),
            (GeoLevel::Place, self.places),
        ] {
            for record in records {
                let geoid: Geoid = record.geoid.parse()?;
                let entity = match level {
                    GeoLevel::State => Entity::state(geoid, record.name.trim()),
                    _ => Entity::within_state(geoid, record.name.trim(), level, record.parent_name),
                };
                entities.push(entity);
            }
        }
        Ok(entities)
    }
}

/// Reads a [`ReferenceFile`] JSON document from object storage.
pub struct JsonEntitySource<'a, S: ObjectStore> {
    store: &'a S,
    key: String,
}

impl<'a, S: ObjectStore> JsonEntitySource<'a, S> {
    pub fn new(store: &'a S, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }
}

impl<S: ObjectStore> EntitySource for JsonEntitySource<'_, S> {
    fn load(&self) -> Result<Vec<Entity>, HarvestError> {
        let bytes = self
            .store
            .get(&self.key)
            .map_err(|err| HarvestError::Reference(format!("{}: {err}", self.key)))?;
        let file: ReferenceFile = serde_json::from_slice(&bytes)
            .map_err(|err| HarvestError::Reference(format!("{}: {err}", self.key)))?;
        let entities = file.into_entities()?;
        info!(key = %self.key, entities = entities.len(), "loaded reference entities");
        Ok(entities)
    }
}

impl EntitySource for Vec<Entity> {
    fn load(&self) -> Result<Vec<Entity>, HarvestError> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn levels_follow_sections() {
        let file: ReferenceFile = serde_json::from_str(
            r#"{
                "states": [{"geoid": "15", "name": "Hawaii"}],
                "counties": [{"geoid": "15003", "name": "Honolulu County", "parentName": "Hawaii"}],
                "places": [{"geoid": "1571550", "name": "Kailua CDP"}]
            }"#,
        )
        .unwrap();
        let entities = file.into_entities().unwrap();
        let levels: Vec<GeoLevel> = entities.iter().map(|entity| entity.level).collect();
        assert_eq!(levels, vec![GeoLevel::State, GeoLevel::County, GeoLevel::Place]);
        assert_eq!(entities[1].parent_name.as_deref(), Some("Hawaii"));
        assert_eq!(entities[2].parent_name, None);
    }

    #[test]
    fn invalid_geoid_is_rejected() {
        let file: ReferenceFile =
            serde_json::from_str(r#"{"states": [{"geoid": "X1", "name": "Nowhere"}]}"#).unwrap();
        assert_matches!(file.into_entities(), Err(HarvestError::InvalidGeoid(_)));
    }
}
