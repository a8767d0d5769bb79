use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::domain::{Geoid, ResolvedEntity, SearchTask};
use crate::error::HarvestError;
use crate::fetch::Transport;
use crate::pool::run_bounded;
use crate::search::SearchClient;

pub const DEFAULT_SEARCH_CONCURRENCY: usize = 10;

/// Outcome of searching a set of tasks. `resolved` is ordered by geoid and may
/// hold geoids that were never requested, since one search can return several
/// geographies.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub resolved: IndexMap<Geoid, ResolvedEntity>,
    pub not_found: Vec<Geoid>,
    pub searches: usize,
    pub skipped: usize,
}

/// Shared map the workers merge candidates into.
#[derive(Debug, Default)]
struct Accumulator {
    resolved: Mutex<IndexMap<Geoid, ResolvedEntity>>,
}

impl Accumulator {
    fn contains(&self, geoid: &Geoid) -> bool {
        self.lock().contains_key(geoid)
    }

    fn merge(&self, candidates: Vec<ResolvedEntity>) {
        let mut resolved = self.lock();
        for candidate in candidates {
            resolved.insert(candidate.geoid.clone(), candidate);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IndexMap<Geoid, ResolvedEntity>> {
        self.resolved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn into_inner(self) -> IndexMap<Geoid, ResolvedEntity> {
        self.resolved
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct Resolver<'a, T: Transport> {
    search: SearchClient<'a, T>,
    concurrency: usize,
}

impl<'a, T: Transport> Resolver<'a, T> {
    pub fn new(search: SearchClient<'a, T>, concurrency: usize) -> Self {
        Self {
            search,
            concurrency: concurrency.max(1),
        }
    }

    pub fn resolve(&self, tasks: Vec<SearchTask>) -> Result<Resolution, HarvestError> {
        let requested: Vec<Geoid> = tasks.iter().map(|task| task.geoid().clone()).collect();
        let accumulator = Accumulator::default();
        let searches = AtomicUsize::new(0);
        let skipped = AtomicUsize::new(0);

        run_bounded(tasks, self.concurrency, |task| {
            if accumulator.contains(task.geoid()) {
                debug!(geoid = %task.geoid(), "already resolved by another search");
                skipped.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            searches.fetch_add(1, Ordering::Relaxed);
            let candidates = self.search.search(&task)?;
            debug!(
                query = %task.query(),
                level = %task.level(),
                candidates = candidates.len(),
                "search finished"
            );
            accumulator.merge(candidates);
            Ok(())
        })?;

        let mut resolved = accumulator.into_inner();
        resolved.sort_keys();
        let not_found: Vec<Geoid> = requested
            .into_iter()
            .filter(|geoid| !resolved.contains_key(geoid))
            .collect();
        let resolution = Resolution {
            resolved,
            not_found,
            searches: searches.into_inner(),
            skipped: skipped.into_inner(),
        };
        info!(
            resolved = resolution.resolved.len(),
            not_found = resolution.not_found.len(),
            searches = resolution.searches,
            skipped = resolution.skipped,
            "resolved search tasks"
        );
        Ok(resolution)
    }
}
