//! End-to-end tests: bootstrap file, layered YAML sources, transformers and
//! derived reloadables.

#![cfg(feature = "yaml")]

use std::path::Path;
use std::sync::{Arc, Mutex};

use reloadable_config::bootstrap::{load_bootstrap_file, Registries};
use reloadable_config::env::MapEnvironment;
use reloadable_config::{ConfigError, ConfigQuery, ReloadableConfig};
use serde::Deserialize;
use serde_json::json;

fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

async fn build(dir: &Path, env: MapEnvironment, query: ConfigQuery) -> ReloadableConfig {
    let bootstrap_path = dir.join("bootstrap.yaml");
    write(
        dir,
        "bootstrap.yaml",
        &format!(
            "sources:\n  \
               - impl: file\n    directory: {}\n    format: yaml\n  \
               - impl: env\n    prefix: BILLING_\n\
             transformers:\n  \
               - impl: placeholders\n  \
               - impl: secrets\n    directory: {}\n\
             get-timeout-ms: 2000\n",
            dir.join("conf").display(),
            dir.join("secrets").display(),
        ),
    );
    let bootstrap = load_bootstrap_file(&bootstrap_path).await.unwrap();
    bootstrap
        .build(&Registries::with_environment(Arc::new(env)), query)
        .unwrap()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Database {
    host: String,
    port: u16,
    password: String,
    max_connections: u32,
}

#[tokio::test]
async fn layers_merge_by_specificity_and_later_env_wins() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "conf/billing.yaml", "db:\n  host: base\n  port: 5432\nlevel: base\n");
    write(dir.path(), "conf/prod/billing.yaml", "db:\n  host: prod\nlevel: prod\n");
    write(dir.path(), "conf/prod/dc1/billing.yaml", "level: prod-dc1\n");
    write(dir.path(), "conf/prod/dc1/z1/billing.yaml", "zone: z1\n");
    write(dir.path(), "conf/canary/billing.yaml", "level: canary\n");

    let query = ConfigQuery::new("billing", ["prod", "canary"], Some("dc1"), Some("z1")).unwrap();
    let config = build(dir.path(), MapEnvironment::new(), query).await;
    let tree = config.get_or_refresh().await.unwrap();

    assert_eq!(tree.get("db.host"), Some(&json!("prod")));
    assert_eq!(tree.get("db.port"), Some(&json!(5432)));
    assert_eq!(tree.get("zone"), Some(&json!("z1")));
    assert_eq!(tree.get("level"), Some(&json!("canary")));
}

#[tokio::test]
async fn file_changes_reach_derived_values() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "secrets/db", "s3cret\n");
    write(
        dir.path(),
        "conf/billing.yaml",
        "db:\n  host: ${DB_HOST:-localhost}\n  port: 5432\n  password: secret:db\n  max-connections: 10\nfeature: false\n",
    );
    let env: MapEnvironment = [("BILLING_REGION", "eu")].into_iter().collect();
    let config = build(dir.path(), env, ConfigQuery::for_app("billing").unwrap()).await;

    let db = config.register_bean::<Database>("db").unwrap();
    let feature = config.register_path::<bool>("feature").unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    feature.register(move |v: Option<&bool>| sink.lock().unwrap().push(v.copied()));

    config.refresh().await.unwrap();
    assert_eq!(
        db.get().unwrap(),
        Database {
            host: "localhost".into(),
            port: 5432,
            password: "s3cret".into(),
            max_connections: 10,
        }
    );
    assert!(!feature.get().unwrap());
    assert_eq!(config.current().unwrap().get("region"), Some(&json!("eu")));

    write(
        dir.path(),
        "conf/billing.yaml",
        "db:\n  host: ${DB_HOST:-localhost}\n  port: 5432\n  password: secret:db\n  max-connections: 10\nfeature: \"true\"\n",
    );
    config.refresh().await.unwrap();
    assert_eq!(feature.current(), Some(true));
    assert_eq!(*seen.lock().unwrap(), vec![Some(false), Some(true)]);
    assert_eq!(db.get().unwrap().port, 5432);
    config.close();
}

#[tokio::test]
async fn missing_files_fail_the_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let config = build(dir.path(), MapEnvironment::new(), ConfigQuery::for_app("billing").unwrap()).await;
    let err = config.get_or_refresh().await.unwrap_err();
    assert!(!err.is_timeout());
    let ConfigError::SourceFetch { source_name, .. } = &err else {
        panic!("expected a source failure, got {err}");
    };
    assert_eq!(source_name, "file");
    assert!(config.current().is_none());
    assert!(config.last_error().is_some());
}

#[tokio::test]
async fn unresolved_placeholder_is_a_transform_failure() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "conf/billing.yaml", "url: ${MISSING_URL}\n");
    let config = build(dir.path(), MapEnvironment::new(), ConfigQuery::for_app("billing").unwrap()).await;
    let err = config.refresh().await.unwrap_err();
    assert!(matches!(err, ConfigError::Transform { ref transformer, .. } if transformer == "placeholders"));
}
