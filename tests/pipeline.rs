use std::collections::HashMap;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use url::Url;

use geofacts_harvester::app::Harvester;
use geofacts_harvester::config::{Config, ConfigLoader, HarvestConfig, Overrides, RetryEntry};
use geofacts_harvester::domain::{Entity, GeoLevel, Geoid};
use geofacts_harvester::error::HarvestError;
use geofacts_harvester::fetch::{RetryingFetcher, Transport};
use geofacts_harvester::storage::{FsObjectStore, ObjectStore};

const SEARCH_URL: &str = "https://qf.test/quickfacts/search/json";
const FACTS_URL: &str = "https://qf.test/quickfacts/fact/csv";
const TIGER_URL: &str = "https://tiger.test/geo/tiger";

/// Serves canned search results keyed by query and fact tables keyed by the id list.
#[derive(Default)]
struct MockQuickFacts {
    searches: HashMap<String, String>,
    tables: HashMap<String, String>,
    search_calls: Mutex<Vec<String>>,
    facts_calls: Mutex<Vec<String>>,
    tiger_calls: Mutex<Vec<String>>,
    fail_searches: bool,
    fail_facts: bool,
}

impl MockQuickFacts {
    fn with_search(mut self, query: &str, body: &str) -> Self {
        self.searches.insert(query.to_string(), body.to_string());
        self
    }

    fn with_table(mut self, ids: &str, body: &str) -> Self {
        self.tables.insert(ids.to_string(), body.to_string());
        self
    }

    fn search_calls(&self) -> usize {
        self.search_calls.lock().unwrap().len()
    }

    fn facts_calls(&self) -> usize {
        self.facts_calls.lock().unwrap().len()
    }

    fn tiger_calls(&self) -> Vec<String> {
        self.tiger_calls.lock().unwrap().clone()
    }
}

impl Transport for MockQuickFacts {
    fn get(&self, url: &Url) -> Result<Vec<u8>, HarvestError> {
        if url.as_str().starts_with(TIGER_URL) {
            self.tiger_calls.lock().unwrap().push(url.path().to_string());
            if url.path().ends_with("/PLACE/") {
                return Ok(br#"<table>
                    <tr><td><a href="/geo/tiger/TIGER2024/">Parent Directory</a></td></tr>
                    <tr><td><a href="tl_2024_15_place.zip">tl_2024_15_place.zip</a></td></tr>
                </table>"#
                    .to_vec());
            }
            return Ok(format!("archive {}", url.path()).into_bytes());
        }
        if url.as_str().starts_with(SEARCH_URL) {
            let query = url
                .query_pairs()
                .find(|(key, _)| key == "search")
                .map(|(_, value)| value.into_owned())
                .unwrap_or_default();
            self.search_calls.lock().unwrap().push(query.clone());
            if self.fail_searches {
                return Err(HarvestError::HttpStatus {
                    url: url.to_string(),
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            let body = self.searches.get(&query).cloned().unwrap_or_else(|| {
                r#"{"data":[{"geoid":null,"id":null,"label":"No results","level":null}]}"#
                    .to_string()
            });
            return Ok(body.into_bytes());
        }
        let ids = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_string();
        self.facts_calls.lock().unwrap().push(ids.clone());
        if self.fail_facts {
            return Err(HarvestError::HttpStatus {
                url: url.to_string(),
                status: 502,
                message: "bad gateway".to_string(),
            });
        }
        match self.tables.get(&ids) {
            Some(body) => Ok(body.clone().into_bytes()),
            None => Err(HarvestError::HttpStatus {
                url: url.to_string(),
                status: 404,
                message: "no table".to_string(),
            }),
        }
    }
}

fn config_for(root: &std::path::Path, reference_files: bool) -> HarvestConfig {
    let config = Config {
        search_url: Some(SEARCH_URL.to_string()),
        facts_url: Some(FACTS_URL.to_string()),
        tiger_url: Some(TIGER_URL.to_string()),
        tiger_year: Some("2024".to_string()),
        download_reference_files: Some(reference_files),
        storage_root: Some(root.to_string_lossy().into_owned()),
        dest_prefix: Some("test".to_string()),
        retry: Some(RetryEntry {
            max_attempts: Some(5),
            min_delay_ms: Some(0),
            max_delay_ms: Some(0),
        }),
        ..Config::default()
    };
    ConfigLoader::resolve_config(config, Overrides::default()).unwrap()
}

fn harvester(
    root: &std::path::Path,
    quickfacts: MockQuickFacts,
) -> Harvester<MockQuickFacts, FsObjectStore> {
    build_harvester(config_for(root, false), root, quickfacts)
}

fn build_harvester(
    config: HarvestConfig,
    root: &std::path::Path,
    quickfacts: MockQuickFacts,
) -> Harvester<MockQuickFacts, FsObjectStore> {
    let store = FsObjectStore::new(Utf8PathBuf::from_path_buf(root.to_path_buf()).unwrap());
    let fetcher = RetryingFetcher::new(quickfacts, config.retry);
    Harvester::new(fetcher, store, config)
}

fn geoid(value: &str) -> Geoid {
    value.parse().unwrap()
}

fn checkpoint_json(harvester: &Harvester<MockQuickFacts, FsObjectStore>) -> serde_json::Value {
    let bytes = harvester.store().get("test/search_results.json").unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

const HAWAII_SEARCH: &str =
    r#"{"data":[{"geoid":"15","id":"0400000US15","label":"Hawaii","level":"state"}]}"#;
const HAWAII_TABLE: &str = "\"Fact\",\"Fact Note\",\"Hawaii\",\"Value Note for Hawaii\"\n\
\"Population estimates, July 1, 2023, (V2023)\",\"\",\"1,435,138\",\"\"\n\
\"FIPS Code\",\"\",\"\"\"15\"\"\",\"\"\n\
\"NOTE: FIPS Code values are enclosed in quotes to ensure leading zeros remain intact.\"\n";

#[test]
fn single_state_is_resolved_downloaded_and_checkpointed() {
    let temp = tempfile::tempdir().unwrap();
    let quickfacts = MockQuickFacts::default()
        .with_search("Hawaii", HAWAII_SEARCH)
        .with_table("0400000US15", HAWAII_TABLE);
    let harvester = harvester(temp.path(), quickfacts);
    let reference = vec![Entity::state(geoid("15"), "Hawaii")];

    let summary = harvester.run(&reference).unwrap();

    assert_eq!(summary.newly_resolved, 1);
    assert_eq!(summary.newly_not_found, 0);
    assert_eq!(summary.batches, 1);
    assert_eq!(summary.downloaded, 1);
    assert!(summary.incomplete.is_empty());
    assert_eq!(harvester.fetcher().transport().search_calls(), 1);
    assert_eq!(harvester.fetcher().transport().facts_calls(), 1);
    assert_eq!(
        checkpoint_json(&harvester),
        serde_json::json!({
            "geo_infos": [{"geoid": "15", "id": "0400000US15", "label": "Hawaii", "level": "state"}],
            "not_found": []
        })
    );

    let stored = harvester.store().get("test/quickfacts/15.csv").unwrap();
    let stored = String::from_utf8(stored).unwrap();
    assert!(!stored.contains("Value Note"));
    assert!(!stored.contains("NOTE:"));
    assert!(stored.trim_end().ends_with("FIPS Code,15"));
}

#[test]
fn county_without_match_is_not_found() {
    let temp = tempfile::tempdir().unwrap();
    let quickfacts = MockQuickFacts::default()
        .with_search("Hawaii", HAWAII_SEARCH)
        .with_table("0400000US15", HAWAII_TABLE);
    let harvester = harvester(temp.path(), quickfacts);
    let reference = vec![
        Entity::state(geoid("15"), "Hawaii"),
        Entity::within_state(
            geoid("15005"),
            "Kalawao County",
            GeoLevel::County,
            Some("Hawaii".to_string()),
        ),
    ];

    let summary = harvester.run(&reference).unwrap();

    assert_eq!(summary.newly_resolved, 1);
    assert_eq!(summary.newly_not_found, 1);
    let calls = harvester.fetcher().transport().search_calls.lock().unwrap().clone();
    assert!(calls.contains(&"Kalawao County, Hawaii".to_string()));
    let checkpoint = checkpoint_json(&harvester);
    assert_eq!(checkpoint["not_found"], serde_json::json!(["15005"]));
    assert_eq!(checkpoint["geo_infos"].as_array().unwrap().len(), 1);
}

#[test]
fn missing_code_is_reported_without_failing_the_run() {
    let temp = tempfile::tempdir().unwrap();
    let quickfacts = MockQuickFacts::default()
        .with_search("Hawaii", HAWAII_SEARCH)
        .with_search(
            "Alaska",
            r#"{"data":[{"geoid":"02","id":"AK","label":"Alaska","level":"state"}]}"#,
        )
        .with_table(
            "AK,0400000US15",
            "Fact,Hawaii,Alaska\nPopulation,\"1,435,138\",\"733,406\"\nFIPS Code,\"\"\"15\"\"\",\n",
        );
    let harvester = harvester(temp.path(), quickfacts);
    let reference = vec![
        Entity::state(geoid("15"), "Hawaii"),
        Entity::state(geoid("02"), "Alaska"),
    ];

    let summary = harvester.run(&reference).unwrap();

    assert_eq!(summary.incomplete.len(), 1);
    let report = &summary.incomplete[0];
    assert_eq!(report.key, "test/quickfacts/02-15.csv");
    assert!(report.missing_entities.is_empty());
    assert_eq!(report.missing_codes, vec![geoid("02")]);
    assert_eq!(
        checkpoint_json(&harvester)["geo_infos"].as_array().unwrap().len(),
        2
    );
}

#[test]
fn second_run_issues_no_searches_or_downloads() {
    let temp = tempfile::tempdir().unwrap();
    let reference = vec![
        Entity::state(geoid("15"), "Hawaii"),
        Entity::state(geoid("72"), "Puerto Rico"),
    ];

    let first = harvester(
        temp.path(),
        MockQuickFacts::default()
            .with_search("Hawaii", HAWAII_SEARCH)
            .with_table("0400000US15", HAWAII_TABLE),
    );
    let summary = first.run(&reference).unwrap();
    assert_eq!(summary.newly_resolved + summary.newly_not_found, 2);

    let second = harvester(
        temp.path(),
        MockQuickFacts::default()
            .with_search("Hawaii", HAWAII_SEARCH)
            .with_table("0400000US15", HAWAII_TABLE),
    );
    let summary = second.run(&reference).unwrap();

    assert_eq!(summary.previously_resolved, 1);
    assert_eq!(summary.previously_not_found, 1);
    assert_eq!(summary.searched, 0);
    assert_eq!(summary.newly_resolved + summary.newly_not_found, 0);
    assert_eq!(summary.reused, 1);
    assert_eq!(second.fetcher().transport().search_calls(), 0);
    assert_eq!(second.fetcher().transport().facts_calls(), 0);
}

#[test]
fn stored_artifact_skips_download() {
    let temp = tempfile::tempdir().unwrap();
    let harvester = harvester(
        temp.path(),
        MockQuickFacts::default().with_search("Hawaii", HAWAII_SEARCH),
    );
    harvester
        .store()
        .put("test/quickfacts/15.csv", b"Fact,Hawaii\nFIPS Code,15\n")
        .unwrap();

    let summary = harvester
        .run(&vec![Entity::state(geoid("15"), "Hawaii")])
        .unwrap();

    assert_eq!(summary.reused, 1);
    assert_eq!(summary.downloaded, 0);
    assert!(summary.incomplete.is_empty());
    assert_eq!(harvester.fetcher().transport().facts_calls(), 0);
}

#[test]
fn exhausted_search_retries_abort_without_checkpoint() {
    let temp = tempfile::tempdir().unwrap();
    let quickfacts = MockQuickFacts {
        fail_searches: true,
        ..MockQuickFacts::default()
    };
    let harvester = harvester(temp.path(), quickfacts);

    let err = harvester
        .run(&vec![Entity::state(geoid("15"), "Hawaii")])
        .unwrap_err();

    assert_matches!(err, HarvestError::HttpStatus { status: 503, .. });
    assert_eq!(harvester.fetcher().transport().search_calls(), 5);
    assert!(!harvester.store().exists("test/search_results.json").unwrap());
}

#[test]
fn status_and_offline_validation_read_stored_state() {
    let temp = tempfile::tempdir().unwrap();
    let harvester = harvester(
        temp.path(),
        MockQuickFacts::default()
            .with_search("Hawaii", HAWAII_SEARCH)
            .with_table("0400000US15", HAWAII_TABLE),
    );
    harvester
        .run(&vec![Entity::state(geoid("15"), "Hawaii")])
        .unwrap();

    let status = harvester.status().unwrap();
    assert_eq!(status.resolved, 1);
    assert_eq!(status.not_found, 0);
    assert_eq!(status.stored_artifacts, 1);

    let validation = harvester.validate_stored().unwrap();
    assert_eq!(validation.batches, 1);
    assert!(validation.missing_artifacts.is_empty());
    assert!(validation.incomplete.is_empty());
}

#[test]
fn search_record_missing_fields_aborts_without_retry_or_checkpoint() {
    let temp = tempfile::tempdir().unwrap();
    let harvester = harvester(
        temp.path(),
        MockQuickFacts::default()
            .with_search("Hawaii", r#"{"data":[{"geoid":"15","id":"0400000US15"}]}"#),
    );

    let err = harvester
        .run(&vec![Entity::state(geoid("15"), "Hawaii")])
        .unwrap_err();

    assert_matches!(err, HarvestError::MalformedResponse(_));
    assert_eq!(harvester.fetcher().transport().search_calls(), 1);
    assert_eq!(harvester.fetcher().transport().facts_calls(), 0);
    assert!(!harvester.store().exists("test/search_results.json").unwrap());
}

#[test]
fn exhausted_download_retries_fail_after_checkpoint_is_saved() {
    let temp = tempfile::tempdir().unwrap();
    let quickfacts = MockQuickFacts {
        fail_facts: true,
        ..MockQuickFacts::default().with_search("Hawaii", HAWAII_SEARCH)
    };
    let harvester = harvester(temp.path(), quickfacts);

    let err = harvester
        .run(&vec![Entity::state(geoid("15"), "Hawaii")])
        .unwrap_err();

    assert_matches!(err, HarvestError::HttpStatus { status: 502, .. });
    assert_eq!(harvester.fetcher().transport().facts_calls(), 5);
    assert!(!harvester.store().exists("test/quickfacts/15.csv").unwrap());
    assert_eq!(
        checkpoint_json(&harvester)["geo_infos"][0]["id"],
        serde_json::json!("0400000US15")
    );
}

#[test]
fn reference_files_are_stored_before_resolving_and_reused() {
    let temp = tempfile::tempdir().unwrap();
    let mock = || {
        MockQuickFacts::default()
            .with_search("Hawaii", HAWAII_SEARCH)
            .with_table("0400000US15", HAWAII_TABLE)
    };
    let reference = vec![Entity::state(geoid("15"), "Hawaii")];

    let first = build_harvester(config_for(temp.path(), true), temp.path(), mock());
    let summary = first.run(&reference).unwrap();

    assert_eq!(summary.reference_files, 5);
    assert_eq!(summary.reference_files_downloaded, 5);
    assert_eq!(first.fetcher().transport().tiger_calls().len(), 6);
    assert_eq!(
        first
            .store()
            .get("test/TIGER2024/PLACE/tl_2024_15_place.zip")
            .unwrap(),
        b"archive /geo/tiger/TIGER2024/PLACE/tl_2024_15_place.zip"
    );
    assert!(
        first
            .store()
            .exists("test/TIGER2024/STATE/tl_2024_us_state.zip")
            .unwrap()
    );

    let second = build_harvester(config_for(temp.path(), true), temp.path(), mock());
    let summary = second.run(&reference).unwrap();

    assert_eq!(summary.reference_files, 5);
    assert_eq!(summary.reference_files_downloaded, 0);
    assert_eq!(
        second.fetcher().transport().tiger_calls(),
        vec!["/geo/tiger/TIGER2024/PLACE/".to_string()]
    );
}
