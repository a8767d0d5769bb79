use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

static GEOID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+$").expect("geoid pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GeoLevel {
    State,
    County,
    Place,
}

impl GeoLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeoLevel::State => "state",
            GeoLevel::County => "county",
            GeoLevel::Place => "place",
        }
    }
}

impl fmt::Display for GeoLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GeoLevel {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "state" => Ok(GeoLevel::State),
            "county" => Ok(GeoLevel::County),
            "place" => Ok(GeoLevel::Place),
            _ => Err(HarvestError::InvalidLevel(value.to_string())),
        }
    }
}

/// Census GEOID, all ASCII digits. States use 2, counties 5 and places 7, with
/// the state FIPS code as the first two digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Geoid(String);

impl Geoid {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn state_fips(&self) -> &str {
        self.0.get(..2).unwrap_or(&self.0)
    }
}

impl fmt::Display for Geoid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Geoid {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if !GEOID_RE.is_match(normalized) {
            return Err(HarvestError::InvalidGeoid(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

impl TryFrom<String> for Geoid {
    type Error = HarvestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Geoid> for String {
    fn from(value: Geoid) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub geoid: Geoid,
    pub name: String,
    pub level: GeoLevel,
    pub parent_name: Option<String>,
}

impl Entity {
    pub fn state(geoid: Geoid, name: impl Into<String>) -> Self {
        Self {
            geoid,
            name: name.into(),
            level: GeoLevel::State,
            parent_name: None,
        }
    }

    pub fn within_state(
        geoid: Geoid,
        name: impl Into<String>,
        level: GeoLevel,
        parent_name: Option<String>,
    ) -> Self {
        Self {
            geoid,
            name: name.into(),
            level,
            parent_name,
        }
    }
}

/// A geography as known to QuickFacts. `id` is the key used in fact table URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEntity {
    pub geoid: Geoid,
    pub id: String,
    pub label: String,
    pub level: GeoLevel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchTask {
    State { geoid: Geoid, name: String },
    County { geoid: Geoid, name: String, state: String },
    Place { geoid: Geoid, name: String, state: String },
}

impl SearchTask {
    pub fn geoid(&self) -> &Geoid {
        match self {
            SearchTask::State { geoid, .. }
            | SearchTask::County { geoid, .. }
            | SearchTask::Place { geoid, .. } => geoid,
        }
    }

    pub fn level(&self) -> GeoLevel {
        match self {
            SearchTask::State { .. } => GeoLevel::State,
            SearchTask::County { .. } => GeoLevel::County,
            SearchTask::Place { .. } => GeoLevel::Place,
        }
    }

    pub fn query(&self) -> String {
        match self {
            SearchTask::State { name, .. } => name.clone(),
            SearchTask::County { name, state, .. } | SearchTask::Place { name, state, .. } => {
                format!("{name}, {state}")
            }
        }
    }
}
