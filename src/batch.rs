use url::Url;

use crate::domain::ResolvedEntity;
use crate::download::{DownloadRequest, StoreDownloader, StoredFile};
use crate::error::HarvestError;
use crate::facts::{clean_rows, parse_csv, write_csv};
use crate::fetch::{RetryingFetcher, Transport};
use crate::storage::{ObjectStore, join_key};

/// QuickFacts renders at most six geographies per table.
pub const MAX_BATCH_SIZE: usize = 6;
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 5;
pub const DEFAULT_FACTS_URL: &str = "https://www.census.gov/quickfacts/fact/csv";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    members: Vec<ResolvedEntity>,
}

impl Batch {
    pub fn new(members: Vec<ResolvedEntity>) -> Result<Self, HarvestError> {
        if members.is_empty() {
            return Err(HarvestError::EmptyBatch);
        }
        if members.len() > MAX_BATCH_SIZE {
            return Err(HarvestError::BatchTooLarge(members.len()));
        }
        Ok(Self { members })
    }

    pub fn members(&self) -> &[ResolvedEntity] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// `{prefix}/{sorted geoids joined by '-'}.csv`
    pub fn artifact_key(&self, prefix: &str) -> String {
        let mut geoids: Vec<&str> = self
            .members
            .iter()
            .map(|member| member.geoid.as_str())
            .collect();
        geoids.sort_unstable();
        join_key(prefix, &format!("{}.csv", geoids.join("-")))
    }

    pub fn facts_url(&self, base: &Url) -> Result<Url, HarvestError> {
        let ids: Vec<&str> = self.members.iter().map(|member| member.id.as_str()).collect();
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|_| HarvestError::ConfigValue(format!("facts url cannot be a base: {base}")))?
            .pop_if_empty()
            .push(&ids.join(","));
        Ok(url)
    }
}

/// Splits resolved entities into batches of at most six, in arrival order.
pub fn pack(resolved: &[ResolvedEntity]) -> Result<Vec<Batch>, HarvestError> {
    resolved
        .chunks(MAX_BATCH_SIZE)
        .map(|chunk| Batch::new(chunk.to_vec()))
        .collect()
}

/// A fact table stored under its batch key.
#[derive(Debug, Clone)]
pub struct DownloadArtifact {
    pub key: String,
    pub content: Vec<u8>,
    pub batch: Batch,
    pub reused: bool,
}

/// Fetches fact tables for batches through a [`StoreDownloader`], cleaning
/// each table before it is stored.
pub struct BatchDownloader<'a, T: Transport, S: ObjectStore> {
    downloader: StoreDownloader<'a, T, S>,
    facts_base: Url,
    prefix: String,
}

impl<'a, T: Transport, S: ObjectStore> BatchDownloader<'a, T, S> {
    pub fn new(
        fetcher: &'a RetryingFetcher<T>,
        store: &'a S,
        facts_base: Url,
        prefix: impl Into<String>,
        concurrency: usize,
    ) -> Self {
        Self {
            downloader: StoreDownloader::new(fetcher, store, concurrency),
            facts_base,
            prefix: prefix.into(),
        }
    }

    pub fn request_for(&self, batch: &Batch) -> Result<DownloadRequest, HarvestError> {
        Ok(DownloadRequest::new(
            batch.facts_url(&self.facts_base)?,
            batch.artifact_key(&self.prefix),
        ))
    }

    /// Returns artifacts in batch order, with the stored bytes of each table.
    pub fn download_all(&self, batches: Vec<Batch>) -> Result<Vec<DownloadArtifact>, HarvestError> {
        let requests = batches
            .iter()
            .map(|batch| self.request_for(batch))
            .collect::<Result<Vec<_>, _>>()?;
        let stored = self
            .downloader
            .download_to_store_with(requests, |raw| clean_artifact(&raw))?;
        stored
            .into_iter()
            .zip(batches)
            .map(|(file, batch)| self.artifact(file, batch))
            .collect()
    }

    fn artifact(&self, file: StoredFile, batch: Batch) -> Result<DownloadArtifact, HarvestError> {
        let content = self.downloader.store().get(&file.key)?;
        Ok(DownloadArtifact {
            key: file.key,
            content,
            batch,
            reused: file.reused,
        })
    }
}

/// Cleaned CSV when the payload parses as a table, raw bytes otherwise.
pub fn clean_artifact(raw: &[u8]) -> Vec<u8> {
    let Ok(text) = std::str::from_utf8(raw) else {
        return raw.to_vec();
    };
    let cleaned = clean_rows(&parse_csv(text));
    if cleaned.is_empty() {
        return raw.to_vec();
    }
    write_csv(&cleaned).into_bytes()
}
