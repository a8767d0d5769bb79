use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::bounded;

use crate::error::HarvestError;

/// Runs `job` over `items` on at most `workers` scoped threads.
///
/// Items are handed out through a bounded queue, so no more than `workers`
/// jobs are ever in flight. The first error stops further items from being
/// started; jobs already running are allowed to finish and that first error
/// is returned. A panicking job surfaces as [`HarvestError::Worker`].
pub fn run_bounded<I, F>(items: Vec<I>, workers: usize, job: F) -> Result<(), HarvestError>
where
    I: Send,
    F: Fn(I) -> Result<(), HarvestError> + Sync,
{
    if items.is_empty() {
        return Ok(());
    }
    let workers = workers.max(1).min(items.len());
    let (tx, rx) = bounded::<I>(workers);
    let failed = AtomicBool::new(false);
    let first_error: Mutex<Option<HarvestError>> = Mutex::new(None);

    let panicked = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let rx = rx.clone();
            let job = &job;
            let failed = &failed;
            let first_error = &first_error;
            handles.push(scope.spawn(move || {
                for item in rx.iter() {
                    if failed.load(Ordering::Acquire) {
                        continue;
                    }
                    if let Err(err) = job(item) {
                        failed.store(true, Ordering::Release);
                        let mut slot = first_error
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                        slot.get_or_insert(err);
                    }
                }
            }));
        }
        drop(rx);
        for item in items {
            if failed.load(Ordering::Acquire) || tx.send(item).is_err() {
                break;
            }
        }
        drop(tx);
        handles
            .into_iter()
            .filter_map(|handle| handle.join().err())
            .count()
    });

    match first_error
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
    {
        Some(err) => Err(err),
        None if panicked > 0 => Err(HarvestError::Worker(format!(
            "{panicked} worker thread(s) panicked"
        ))),
        None => Ok(()),
    }
}
