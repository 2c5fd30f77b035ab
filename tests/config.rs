use assert_matches::assert_matches;

use cmip_climatology::config::{Config, ConfigLoader};
use cmip_climatology::domain::YearWindow;
use cmip_climatology::error::ClimError;
use cmip_climatology::executor::FailurePolicy;

#[test]
fn resolves_full_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("climatology.json");
    std::fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "catalog": "https://example.org/catalog.json",
            "query": {"source_id": ["M1", "M2"], "experiment": "ssp585", "variable_id": "tas"},
            "require_all_on": ["source_id"],
            "years": {"start": 2015, "end": 2020},
            "workers": 3,
            "policy": "skip-failed",
            "timeout_secs": 5,
            "snapshot": false
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.catalog_url, "https://example.org/catalog.json");
    assert_eq!(resolved.query.facets()["source_id"], vec!["M1", "M2"]);
    assert_eq!(resolved.query.facets()["experiment_id"], vec!["ssp585"]);
    assert_eq!(resolved.execution.workers, 3);
    assert_eq!(resolved.execution.policy, FailurePolicy::SkipFailed);
    assert_eq!(resolved.execution.timeout.as_secs(), 5);
    assert!(!resolved.use_snapshot);

    let request = resolved.request().unwrap();
    assert_eq!(request.window, YearWindow::new(2015, 2020).unwrap());
}

#[test]
fn request_needs_a_year_window() {
    let config: Config = serde_json::from_str(r#"{"query": {"model": "M1"}}"#).unwrap();
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert_matches!(resolved.request(), Err(ClimError::InvalidQuery(_)));
}

#[test]
fn reversed_years_are_rejected() {
    let config: Config = serde_json::from_str(r#"{"years": "2020-2015"}"#).unwrap();
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(ClimError::InvalidYearWindow { .. })
    );
}

#[test]
fn unknown_schema_version_is_rejected() {
    let config: Config = serde_json::from_str(r#"{"schema_version": 7}"#).unwrap();
    assert_matches!(ConfigLoader::resolve_config(config), Err(ClimError::ConfigParse(_)));
}

#[test]
fn invalid_json_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert_matches!(ConfigLoader::resolve(path.to_str()), Err(ClimError::ConfigParse(_)));
}

#[test]
fn explicit_missing_file_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");
    assert_matches!(ConfigLoader::resolve(path.to_str()), Err(ClimError::ConfigRead(_)));
}
