use std::sync::Mutex;

use tracing::{debug, info};
use url::Url;

use crate::error::HarvestError;
use crate::fetch::{RetryingFetcher, Transport};
use crate::pool::run_bounded;
use crate::storage::ObjectStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: Url,
    pub key: String,
}

impl DownloadRequest {
    pub fn new(url: Url, key: impl Into<String>) -> Self {
        Self {
            url,
            key: key.into(),
        }
    }
}

/// A file present in the object store after a download pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub key: String,
    pub reused: bool,
}

/// Copies URLs into the object store with at most `concurrency` fetches in
/// flight. Keys that already exist are left alone and never fetched.
pub struct StoreDownloader<'a, T: Transport, S: ObjectStore> {
    fetcher: &'a RetryingFetcher<T>,
    store: &'a S,
    concurrency: usize,
}

impl<'a, T: Transport, S: ObjectStore> StoreDownloader<'a, T, S> {
    pub fn new(fetcher: &'a RetryingFetcher<T>, store: &'a S, concurrency: usize) -> Self {
        Self {
            fetcher,
            store,
            concurrency: concurrency.max(1),
        }
    }

    pub fn store(&self) -> &'a S {
        self.store
    }

    /// Stores each body unchanged. Results follow request order.
    pub fn download_to_store(
        &self,
        requests: Vec<DownloadRequest>,
    ) -> Result<Vec<StoredFile>, HarvestError> {
        self.download_to_store_with(requests, |body| body)
    }

    /// Like [`Self::download_to_store`], passing each fetched body through
    /// `transform` before it is written.
    pub fn download_to_store_with<F>(
        &self,
        requests: Vec<DownloadRequest>,
        transform: F,
    ) -> Result<Vec<StoredFile>, HarvestError>
    where
        F: Fn(Vec<u8>) -> Vec<u8> + Sync,
    {
        let slots: Mutex<Vec<Option<StoredFile>>> = Mutex::new(vec![None; requests.len()]);
        run_bounded(
            requests.into_iter().enumerate().collect(),
            self.concurrency,
            |(index, request)| {
                let stored = self.download_one(request, &transform)?;
                slots
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())[index] = Some(stored);
                Ok(())
            },
        )?;
        let stored: Vec<StoredFile> = slots
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .into_iter()
            .flatten()
            .collect();
        let reused = stored.iter().filter(|file| file.reused).count();
        info!(downloaded = stored.len() - reused, reused, "downloads finished");
        Ok(stored)
    }

    pub fn download_one<F>(
        &self,
        request: DownloadRequest,
        transform: &F,
    ) -> Result<StoredFile, HarvestError>
    where
        F: Fn(Vec<u8>) -> Vec<u8>,
    {
        let DownloadRequest { url, key } = request;
        if self.store.exists(&key)? {
            debug!(%key, "already stored, skipping download");
            return Ok(StoredFile { key, reused: true });
        }
        debug!(%url, %key, "downloading");
        let body = transform(self.fetcher.fetch(&url)?);
        self.store.put(&key, &body)?;
        debug!(%key, bytes = body.len(), "stored download");
        Ok(StoredFile { key, reused: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::RetryPolicy;
    use crate::storage::FsObjectStore;
    use assert_matches::assert_matches;
    use camino::Utf8PathBuf;

    #[derive(Default)]
    struct Echo {
        calls: Mutex<Vec<String>>,
    }

    impl Transport for Echo {
        fn get(&self, url: &Url) -> Result<Vec<u8>, HarvestError> {
            self.calls.lock().unwrap().push(url.path().to_string());
            if url.path().ends_with("missing.zip") {
                return Err(HarvestError::HttpStatus {
                    url: url.to_string(),
                    status: 404,
                    message: "not found".to_string(),
                });
            }
            Ok(url.path().as_bytes().to_vec())
        }
    }

    fn temp_store() -> (tempfile::TempDir, FsObjectStore) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        (temp, FsObjectStore::new(root))
    }

    fn request(path: &str, key: &str) -> DownloadRequest {
        DownloadRequest::new(
            Url::parse(&format!("https://files.test{path}")).unwrap(),
            key,
        )
    }

    #[test]
    fn existing_keys_are_not_fetched() {
        let (_temp, store) = temp_store();
        store.put("run/b.zip", b"already here").unwrap();
        let fetcher = RetryingFetcher::new(Echo::default(), RetryPolicy::no_delay(1));
        let downloader = StoreDownloader::new(&fetcher, &store, 2);

        let stored = downloader
            .download_to_store(vec![
                request("/a.zip", "run/a.zip"),
                request("/b.zip", "run/b.zip"),
                request("/c.zip", "run/c.zip"),
            ])
            .unwrap();

        let keys: Vec<&str> = stored.iter().map(|file| file.key.as_str()).collect();
        assert_eq!(keys, vec!["run/a.zip", "run/b.zip", "run/c.zip"]);
        assert_eq!(
            stored.iter().map(|file| file.reused).collect::<Vec<_>>(),
            vec![false, true, false]
        );
        assert_eq!(fetcher.transport().calls.lock().unwrap().len(), 2);
        assert_eq!(store.get("run/a.zip").unwrap(), b"/a.zip");
        assert_eq!(store.get("run/b.zip").unwrap(), b"already here");
    }

    #[test]
    fn transform_runs_before_put() {
        let (_temp, store) = temp_store();
        let fetcher = RetryingFetcher::new(Echo::default(), RetryPolicy::no_delay(1));
        let downloader = StoreDownloader::new(&fetcher, &store, 1);

        downloader
            .download_to_store_with(vec![request("/a.csv", "run/a.csv")], |body| {
                body.to_ascii_uppercase()
            })
            .unwrap();

        assert_eq!(store.get("run/a.csv").unwrap(), b"/A.CSV");
    }

    #[test]
    fn failed_fetch_stores_nothing() {
        let (_temp, store) = temp_store();
        let fetcher = RetryingFetcher::new(Echo::default(), RetryPolicy::no_delay(1));
        let downloader = StoreDownloader::new(&fetcher, &store, 1);

        let err = downloader
            .download_to_store(vec![request("/missing.zip", "run/missing.zip")])
            .unwrap_err();

        assert_matches!(err, HarvestError::HttpStatus { status: 404, .. });
        assert!(!store.exists("run/missing.zip").unwrap());
    }
}
