use serde::Serialize;
use tracing::warn;

use crate::batch::Batch;
use crate::domain::{Geoid, ResolvedEntity};
use crate::facts::{FactsTable, clean_rows, parse_csv};

/// Geographies of a batch that the downloaded fact table does not cover.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub key: String,
    pub missing_entities: Vec<ResolvedEntity>,
    pub missing_codes: Vec<Geoid>,
}

impl ValidationReport {
    pub fn is_complete(&self) -> bool {
        self.missing_entities.is_empty() && self.missing_codes.is_empty()
    }

    pub fn log(&self) {
        if !self.missing_entities.is_empty() {
            let labels: Vec<&str> = self
                .missing_entities
                .iter()
                .map(|entity| entity.label.as_str())
                .collect();
            warn!(key = %self.key, missing = %labels.join(", "), "geographies missing from fact table");
        }
        if !self.missing_codes.is_empty() {
            let codes: Vec<&str> = self.missing_codes.iter().map(Geoid::as_str).collect();
            warn!(key = %self.key, missing = %codes.join(", "), "FIPS codes missing from fact table");
        }
    }
}

pub fn validate_table(key: &str, table: &FactsTable, batch: &Batch) -> ValidationReport {
    let mut report = ValidationReport {
        key: key.to_string(),
        ..ValidationReport::default()
    };
    for entity in batch.members() {
        if !table.has_label(&entity.label) {
            report.missing_entities.push(entity.clone());
        }
        if !table.has_code(entity.geoid.as_str()) {
            report.missing_codes.push(entity.geoid.clone());
        }
    }
    report
}

/// Validates raw artifact bytes. Content that is not a usable fact table
/// reports every member as missing.
pub fn validate_artifact(key: &str, content: &[u8], batch: &Batch) -> ValidationReport {
    let text = String::from_utf8_lossy(content);
    let table = FactsTable::from_clean_rows(&clean_rows(&parse_csv(&text))).unwrap_or_else(|| {
        warn!(key, "artifact is not a QuickFacts table");
        FactsTable::default()
    });
    validate_table(key, &table, batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GeoLevel;

    fn entity(geoid: &str, label: &str) -> ResolvedEntity {
        ResolvedEntity {
            geoid: geoid.parse().unwrap(),
            id: label.to_lowercase(),
            label: label.to_string(),
            level: GeoLevel::State,
        }
    }

    #[test]
    fn reports_missing_code_only() {
        let batch = Batch::new(vec![entity("15", "Hawaii"), entity("02", "Alaska")]).unwrap();
        let csv = b"Fact,Hawaii,Alaska\nPopulation,1,2\nFIPS Code,\"\"\"15\"\"\",\n";
        let report = validate_artifact("run/02-15.csv", csv, &batch);
        assert!(report.missing_entities.is_empty());
        assert_eq!(report.missing_codes, vec!["02".parse::<Geoid>().unwrap()]);
        assert!(!report.is_complete());
    }

    #[test]
    fn garbage_reports_everything_missing() {
        let batch = Batch::new(vec![entity("15", "Hawaii")]).unwrap();
        let report = validate_artifact("run/15.csv", b"<html>blocked</html>", &batch);
        assert_eq!(report.missing_entities.len(), 1);
        assert_eq!(report.missing_codes.len(), 1);
    }
}
