use std::fs;

use docqa_core::config::{DistanceMetric, RagConfig, TruncationPolicy};
use docqa_core::db;
use docqa_core::error::ErrorKind;
use pretty_assertions::assert_eq;

#[test]
fn loads_partial_config_file_with_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("docqa.json");
    fs::write(
        &path,
        r#"{
  "embedding": { "model": "mxbai-embed-large", "truncation": "reject" },
  "index": { "metric": "squared_euclidean" },
  "retrieval": { "top_k": 8 }
}"#,
    )
    .expect("write config");

    let cfg = RagConfig::from_json_file(&path).expect("load");
    cfg.validate().expect("valid");
    assert_eq!(cfg.embedding.model, "mxbai-embed-large");
    assert_eq!(cfg.embedding.truncation, TruncationPolicy::Reject);
    assert_eq!(cfg.embedding.batch_size, 16);
    assert_eq!(cfg.index.metric, DistanceMetric::SquaredEuclidean);
    assert_eq!(cfg.retrieval.top_k, 8);
    assert_eq!(cfg.retrieval.max_k, 50);
    assert_eq!(cfg.ollama.base_url, "http://127.0.0.1:11434");
}

#[test]
fn bad_config_is_a_configuration_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("missing.json");
    let err = RagConfig::from_json_file(&missing).expect_err("missing file");
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = RagConfig::from_json_str(r#"{"index": {"metric": "manhattan"}}"#)
        .expect_err("unknown metric");
    assert_eq!(err.code, "RAG_CONFIG_INVALID");

    let cfg = RagConfig::from_json_str(r#"{"chunking": {"target_size": 100, "overlap": 150}}"#)
        .expect("parses");
    assert_eq!(cfg.validate().expect_err("overlap").kind(), ErrorKind::Configuration);
}

#[test]
fn migrations_apply_to_a_file_database_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("docqa.sqlite3");

    let mut conn = db::open(&path).expect("open");
    db::migrate(&mut conn).expect("migrate");
    drop(conn);

    let mut conn = db::open(&path).expect("reopen");
    db::migrate(&mut conn).expect("migrate again");
    let applied: i64 = conn
        .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
        .expect("count");
    assert_eq!(applied, 1);
}
