use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::domain::{GeoLevel, Geoid, ResolvedEntity, SearchTask};
use crate::error::HarvestError;
use crate::fetch::{RetryingFetcher, Transport};

pub const DEFAULT_SEARCH_URL: &str = "https://www.census.gov/quickfacts/search/json";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Option<Vec<SearchRecord>>,
}

#[derive(Debug, Deserialize)]
struct SearchRecord {
    geoid: Option<String>,
    id: Option<String>,
    label: Option<String>,
    level: Option<String>,
}

pub fn search_url(base: &Url, query: &str) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut()
        .append_pair("type", "geo")
        .append_pair("search", query);
    url
}

/// Parses a search payload into candidates. A lone record with a null geoid
/// means "no match". Any other record missing a field, or carrying a
/// non-numeric geoid or empty id, makes the whole response malformed. Records
/// at levels other than state, county or place are dropped with a warning.
pub fn parse_search_response(body: &[u8]) -> Result<Vec<ResolvedEntity>, HarvestError> {
    let response: SearchResponse = serde_json::from_slice(body)
        .map_err(|err| HarvestError::MalformedResponse(err.to_string()))?;
    let records = match response.data {
        Some(records) if !records.is_empty() => records,
        _ => {
            return Err(HarvestError::MalformedResponse(
                "response has no data array".to_string(),
            ));
        }
    };
    if records.len() == 1 && records[0].geoid.is_none() {
        return Ok(Vec::new());
    }

    let mut candidates = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        if let Some(candidate) = candidate_from_record(index, record)? {
            candidates.push(candidate);
        }
    }
    Ok(candidates)
}

fn candidate_from_record(
    index: usize,
    record: &SearchRecord,
) -> Result<Option<ResolvedEntity>, HarvestError> {
    let malformed = |reason: &str| {
        HarvestError::MalformedResponse(format!("search record {index}: {reason}"))
    };
    let (Some(geoid), Some(id), Some(label), Some(level)) = (
        record.geoid.as_deref(),
        record.id.as_deref(),
        record.label.as_deref(),
        record.level.as_deref(),
    ) else {
        return Err(malformed("missing field"));
    };
    let geoid: Geoid = geoid
        .parse()
        .map_err(|_| malformed(&format!("invalid geoid {geoid:?}")))?;
    let id = id.trim();
    if id.is_empty() {
        return Err(malformed("empty id"));
    }
    let Ok(level) = level.parse::<GeoLevel>() else {
        warn!(%geoid, level, "skipping search record at unsupported level");
        return Ok(None);
    };
    Ok(Some(ResolvedEntity {
        geoid,
        id: id.to_string(),
        label: label.trim().to_string(),
        level,
    }))
}

pub struct SearchClient<'a, T: Transport> {
    fetcher: &'a RetryingFetcher<T>,
    base: Url,
}

impl<'a, T: Transport> SearchClient<'a, T> {
    pub fn new(fetcher: &'a RetryingFetcher<T>, base: Url) -> Self {
        Self { fetcher, base }
    }

    pub fn search(&self, task: &SearchTask) -> Result<Vec<ResolvedEntity>, HarvestError> {
        let url = search_url(&self.base, &task.query());
        let body = self.fetcher.fetch(&url)?;
        parse_search_response(&body)
    }
}
