#![allow(clippy::unwrap_used, clippy::expect_used)]

use conductor_memory::{HistorySink, VectorHistory};
use serde_json::json;
use std::collections::HashMap;

#[tokio::test]
async fn test_jsonl_history_survives_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("history").join("tasks.jsonl");

    {
        let history = VectorHistory::open(path.clone()).await.unwrap();
        let metadata = HashMap::from([("executor".to_string(), json!("shell"))]);
        history
            .store(
                "task_history",
                "vacuum analytics database -> finished in 4m",
                metadata,
                Some("t-1".into()),
            )
            .await
            .unwrap();
        history
            .store(
                "task_history",
                "FAILED: renew tls certificate -> acme timeout",
                HashMap::new(),
                Some("t-2".into()),
            )
            .await
            .unwrap();
    }

    let reopened = VectorHistory::open(path.clone()).await.unwrap();
    assert_eq!(reopened.len().await, 2);

    let hits = reopened
        .search("task_history", "vacuum database", 5, 0.3)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "t-1");
    assert_eq!(hits[0].metadata["executor"], json!("shell"));
}

#[tokio::test]
async fn test_replacing_a_record_rewrites_file() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("tasks.jsonl");

    let history = VectorHistory::open(path.clone()).await.unwrap();
    for text in ["attempt one", "attempt two"] {
        history
            .store("c", text, HashMap::new(), Some("same".into()))
            .await
            .unwrap();
    }

    let data = tokio::fs::read_to_string(&path).await.unwrap();
    assert_eq!(data.lines().count(), 1);
    assert!(data.contains("attempt two"));
}

#[tokio::test]
async fn test_corrupt_file_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("bad.jsonl");
    tokio::fs::write(&path, "{oops\n").await.unwrap();
    assert!(VectorHistory::open(path).await.is_err());
}
