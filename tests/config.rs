use std::time::Duration;

use camino::Utf8PathBuf;

use kira_structure_resolver::config::{Config, ConfigLoader, RunOverrides};
use kira_structure_resolver::error::ResolverError;

fn overrides() -> RunOverrides {
    RunOverrides {
        input: "entries.jsonl.gz".into(),
        output: "out.tsv".into(),
        ..RunOverrides::default()
    }
}

#[test]
fn load_config_from_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("kira-sr.json");
    std::fs::write(
        &path,
        r#"{
            "schema_version": 1,
            "reference": "/data/anage_data.txt",
            "index": {"cross_refs": "/data/x.tsv.gz", "taxonomy": "/data/t.tsv.gz"},
            "workers": 2,
            "retry": {"max_attempts": 5, "base_delay_ms": 10},
            "aliases": {"lab mouse": "mus musculus"}
        }"#,
    )
    .unwrap();

    let config = ConfigLoader::load(path.to_str()).unwrap();
    assert_eq!(config.schema_version, Some(1));
    assert_eq!(config.workers, Some(2));
    assert_eq!(config.aliases.get("lab mouse").map(String::as_str), Some("mus musculus"));

    let resolved = ConfigLoader::resolve_config(config, overrides()).unwrap();
    assert_eq!(resolved.reference, Utf8PathBuf::from("/data/anage_data.txt"));
    assert_eq!(
        resolved.index.as_ref().map(|paths| paths.taxonomy.clone()),
        Some(Utf8PathBuf::from("/data/t.tsv.gz"))
    );
    assert_eq!(resolved.workers, 2);
    assert_eq!(resolved.retry.max_attempts, 5);
    assert_eq!(resolved.retry.base_delay, Duration::from_millis(10));
}

#[test]
fn load_missing_explicit_config_fails() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    let err = ConfigLoader::load(path.to_str()).unwrap_err();
    assert!(matches!(err, ResolverError::ConfigRead(_)));
}

#[test]
fn load_malformed_config_fails() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("kira-sr.json");
    std::fs::write(&path, "{\"workers\": \"many\"}").unwrap();
    let err = ConfigLoader::load(path.to_str()).unwrap_err();
    assert!(matches!(err, ResolverError::ConfigParse(_)));
}

#[test]
fn cli_overrides_win_over_file() {
    let config = Config {
        batch_size: Some(100),
        workers: Some(2),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(
        config,
        RunOverrides {
            batch_size: Some(10),
            lines: Some("1-50".to_string()),
            timeout_secs: Some(5),
            remote_only: true,
            ..overrides()
        },
    )
    .unwrap();
    assert_eq!(resolved.batch_size, 10);
    assert_eq!(resolved.timeout, Duration::from_secs(5));
    assert_eq!(resolved.workers, 2);
    assert!(resolved.index.is_none());
    assert!(!resolved.prefer_local_index);
    assert_eq!(resolved.line_filter.upper_bound(), Some(50));
}

#[test]
fn invalid_line_selection_is_rejected() {
    let err = ConfigLoader::resolve_config(
        Config::default(),
        RunOverrides {
            lines: Some("ten".to_string()),
            ..overrides()
        },
    )
    .unwrap_err();
    assert!(matches!(err, ResolverError::InvalidLineFilter(_)));
}
