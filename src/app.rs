use serde::Serialize;
use tracing::{info, warn};

use crate::batch::{BatchDownloader, pack};
use crate::catalog::build_catalog;
use crate::checkpoint::{CheckpointState, CheckpointStore};
use crate::config::HarvestConfig;
use crate::download::{StoreDownloader, StoredFile};
use crate::error::HarvestError;
use crate::fetch::{RetryingFetcher, Transport};
use crate::reference::EntitySource;
use crate::resolver::Resolver;
use crate::search::SearchClient;
use crate::storage::ObjectStore;
use crate::tiger::TigerFiles;
use crate::validate::{ValidationReport, validate_artifact};

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub reference_files: usize,
    pub reference_files_downloaded: usize,
    pub reference_entities: usize,
    pub previously_resolved: usize,
    pub previously_not_found: usize,
    pub searched: usize,
    pub searches_issued: usize,
    pub newly_resolved: usize,
    pub newly_not_found: usize,
    pub conflicts_ignored: usize,
    pub checkpoint_key: String,
    pub batches: usize,
    pub downloaded: usize,
    pub reused: usize,
    pub incomplete: Vec<ValidationReport>,
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResult {
    pub checkpoint_key: String,
    pub resolved: usize,
    pub not_found: usize,
    pub stored_artifacts: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidateResult {
    pub batches: usize,
    pub missing_artifacts: Vec<String>,
    pub incomplete: Vec<ValidationReport>,
}

pub struct Harvester<T: Transport, S: ObjectStore> {
    fetcher: RetryingFetcher<T>,
    store: S,
    config: HarvestConfig,
}

impl<T: Transport, S: ObjectStore> Harvester<T, S> {
    pub fn new(fetcher: RetryingFetcher<T>, store: S, config: HarvestConfig) -> Self {
        Self {
            fetcher,
            store,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn fetcher(&self) -> &RetryingFetcher<T> {
        &self.fetcher
    }

    fn checkpoints(&self) -> CheckpointStore<'_, S> {
        CheckpointStore::new(&self.store, &self.config.dest_prefix)
    }

    /// Copies the TIGER archives for the configured year into the store under
    /// `{dest_prefix}/TIGER{year}/...`, skipping archives already present.
    pub fn fetch_reference_files(&self) -> Result<Vec<StoredFile>, HarvestError> {
        let files = TigerFiles::discover(
            &self.fetcher,
            &self.config.tiger_url,
            &self.config.tiger_year,
        )?;
        let requests = files.requests(&self.config.tiger_url, &self.config.dest_prefix)?;
        let downloader =
            StoreDownloader::new(&self.fetcher, &self.store, self.config.download_concurrency);
        let stored = downloader.download_to_store(requests)?;
        info!(
            year = %self.config.tiger_year,
            files = stored.len(),
            "reference files stored"
        );
        Ok(stored)
    }

    /// Stores the reference files when enabled, resolves every reference entity
    /// not yet in the checkpoint, saves the checkpoint, then downloads and
    /// validates fact tables for everything resolved so far. Any search or
    /// download failure aborts the run; the checkpoint is only written after
    /// all searches succeed.
    pub fn run(&self, source: &dyn EntitySource) -> Result<RunSummary, HarvestError> {
        let reference_files = if self.config.download_reference_files {
            self.fetch_reference_files()?
        } else {
            Vec::new()
        };
        let entities = source.load()?;
        let checkpoints = self.checkpoints();
        let mut state = checkpoints.load();

        let catalog = build_catalog(&entities, &state)?;
        let previously_resolved = catalog.resolved.len();
        let previously_not_found = catalog.not_found.len();
        let searched = catalog.pending.len();

        let search = SearchClient::new(&self.fetcher, self.config.search_url.clone());
        let resolution =
            Resolver::new(search, self.config.search_concurrency).resolve(catalog.pending)?;
        let searches_issued = resolution.searches;
        let merge = state.merge(resolution.resolved.into_values(), resolution.not_found);
        if merge.conflicts_ignored > 0 {
            warn!(
                conflicts = merge.conflicts_ignored,
                "kept earlier checkpoint entries for geoids reported both found and not found"
            );
        }
        checkpoints.save(&state)?;

        let batches = pack(&state.resolved_entities())?;
        let batch_count = batches.len();
        let downloader = BatchDownloader::new(
            &self.fetcher,
            &self.store,
            self.config.facts_url.clone(),
            self.config.artifact_prefix(),
            self.config.download_concurrency,
        );
        let artifacts = downloader.download_all(batches)?;
        let reused = artifacts.iter().filter(|artifact| artifact.reused).count();

        let incomplete: Vec<ValidationReport> = artifacts
            .iter()
            .map(|artifact| validate_artifact(&artifact.key, &artifact.content, &artifact.batch))
            .filter(|report| !report.is_complete())
            .inspect(ValidationReport::log)
            .collect();

        let summary = RunSummary {
            reference_files: reference_files.len(),
            reference_files_downloaded: reference_files.iter().filter(|file| !file.reused).count(),
            reference_entities: entities.len(),
            previously_resolved,
            previously_not_found,
            searched,
            searches_issued,
            newly_resolved: merge.resolved_added,
            newly_not_found: merge.not_found_added,
            conflicts_ignored: merge.conflicts_ignored,
            checkpoint_key: checkpoints.key().to_string(),
            batches: batch_count,
            downloaded: artifacts.len() - reused,
            reused,
            incomplete,
            finished_at: chrono::Utc::now().to_rfc3339(),
        };
        info!(
            resolved = state.resolved().len(),
            not_found = state.not_found().len(),
            batches = summary.batches,
            downloaded = summary.downloaded,
            incomplete = summary.incomplete.len(),
            "harvest finished"
        );
        Ok(summary)
    }

    pub fn status(&self) -> Result<StatusResult, HarvestError> {
        let checkpoints = self.checkpoints();
        let state = checkpoints.load();
        let stored_artifacts = self.store.list(&self.config.artifact_prefix())?.len();
        Ok(StatusResult {
            checkpoint_key: checkpoints.key().to_string(),
            resolved: state.resolved().len(),
            not_found: state.not_found().len(),
            stored_artifacts,
        })
    }

    /// Re-checks stored fact tables against the checkpoint without touching the network.
    pub fn validate_stored(&self) -> Result<ValidateResult, HarvestError> {
        let state: CheckpointState = self.checkpoints().load();
        let batches = pack(&state.resolved_entities())?;
        let prefix = self.config.artifact_prefix();
        let mut result = ValidateResult {
            batches: batches.len(),
            missing_artifacts: Vec::new(),
            incomplete: Vec::new(),
        };
        for batch in &batches {
            let key = batch.artifact_key(&prefix);
            if !self.store.exists(&key)? {
                result.missing_artifacts.push(key);
                continue;
            }
            let content = self.store.get(&key)?;
            let report = validate_artifact(&key, &content, batch);
            if !report.is_complete() {
                report.log();
                result.incomplete.push(report);
            }
        }
        info!(
            batches = result.batches,
            missing_artifacts = result.missing_artifacts.len(),
            incomplete = result.incomplete.len(),
            "validated stored fact tables"
        );
        Ok(result)
    }
}
