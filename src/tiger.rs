use std::sync::LazyLock;

use indexmap::IndexSet;
use regex::Regex;
use tracing::info;
use url::Url;

use crate::download::DownloadRequest;
use crate::error::HarvestError;
use crate::fetch::{RetryingFetcher, Transport};
use crate::storage::join_key;

pub const DEFAULT_TIGER_URL: &str = "https://www2.census.gov/geo/tiger";
pub const DEFAULT_TIGER_YEAR: &str = "2024";

static ZIP_HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)href\s*=\s*"([^"/?#]+\.zip)""#).expect("href pattern is valid")
});

/// TIGER/Line shapefile archives the reference entities are derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TigerFiles {
    pub international: Url,
    pub state: Url,
    pub county: Url,
    pub cbsa: Url,
    pub places: Vec<Url>,
}

impl TigerFiles {
    /// Builds the national file URLs for `year` and lists the per-state place
    /// archives from the `PLACE/` directory index.
    pub fn discover<T: Transport>(
        fetcher: &RetryingFetcher<T>,
        base: &Url,
        year: &str,
    ) -> Result<Self, HarvestError> {
        let listing_url = tiger_url(base, &[&format!("TIGER{year}"), "PLACE", ""])?;
        let listing = fetcher.fetch(&listing_url)?;
        let places = parse_place_listing(&String::from_utf8_lossy(&listing), &listing_url)?;
        info!(year, places = places.len(), "listed TIGER place archives");
        Self::for_year(base, year, places)
    }

    pub fn for_year(base: &Url, year: &str, places: Vec<Url>) -> Result<Self, HarvestError> {
        let dir = format!("TIGER{year}");
        let national = |folder: &str, layer: &str| {
            tiger_url(base, &[&dir, folder, &format!("tl_{year}_us_{layer}.zip")])
        };
        Ok(Self {
            international: national("INTERNATIONALBOUNDARY", "internationalboundary")?,
            state: national("STATE", "state")?,
            county: national("COUNTY", "county")?,
            cbsa: national("CBSA", "cbsa")?,
            places,
        })
    }

    pub fn urls(&self) -> Vec<&Url> {
        let mut urls = vec![&self.international, &self.state, &self.county, &self.cbsa];
        urls.extend(self.places.iter());
        urls
    }

    /// One request per archive, keyed by its path below `base` under `prefix`.
    pub fn requests(&self, base: &Url, prefix: &str) -> Result<Vec<DownloadRequest>, HarvestError> {
        self.urls()
            .into_iter()
            .map(|url| {
                let key = join_key(prefix, relative_path(base, url)?);
                Ok(DownloadRequest::new(url.clone(), key))
            })
            .collect()
    }
}

/// Zip archive links in an HTML directory index, resolved against `listing_url`.
pub fn parse_place_listing(html: &str, listing_url: &Url) -> Result<Vec<Url>, HarvestError> {
    let names: IndexSet<&str> = ZIP_HREF_RE
        .captures_iter(html)
        .filter_map(|captures| captures.get(1))
        .map(|name| name.as_str())
        .collect();
    names
        .into_iter()
        .map(|name| {
            listing_url
                .join(name)
                .map_err(|err| HarvestError::MalformedResponse(format!("place archive {name}: {err}")))
        })
        .collect()
}

fn tiger_url(base: &Url, segments: &[&str]) -> Result<Url, HarvestError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| HarvestError::ConfigValue(format!("tiger url cannot be a base: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn relative_path<'u>(base: &Url, url: &'u Url) -> Result<&'u str, HarvestError> {
    url.path()
        .strip_prefix(base.path().trim_end_matches('/'))
        .map(|path| path.trim_start_matches('/'))
        .filter(|path| !path.is_empty())
        .ok_or_else(|| HarvestError::ConfigValue(format!("{url} is outside {base}")))
}
