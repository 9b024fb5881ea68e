/// Producer tests: paging, watermark movement and cursor persistence
mod common;

use chrono::{TimeZone, Utc};
use common::*;
use filmsync_orchestration::{open_cursor_store, OrchestratorError, Producer, ProducerSpec};
use filmsync_storage::{
    CursorStore, InMemoryCursorStore, JsonFileCursorStore, QueryParam, RawRow, Watermark,
};
use futures::{pin_mut, TryStreamExt};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

fn spec(limit: usize, state_file: &Path) -> ProducerSpec {
    ProducerSpec {
        name: FILM_PRODUCER.to_string(),
        state_file_path: state_file.to_path_buf(),
        state_field: "modified".to_string(),
        limit,
        sql: producer_sql(FILM_PRODUCER, "film_work"),
        id_field: "id".to_string(),
    }
}

fn source_for(log: &ChangeLog) -> Arc<ScriptedSource> {
    Arc::new(ScriptedSource::new().route(FILM_PRODUCER, log.handler()))
}

async fn drain(producer: &mut Producer) -> Result<Vec<Vec<String>>, OrchestratorError> {
    let stream = producer.produce();
    pin_mut!(stream);
    stream.try_collect().await
}

#[tokio::test]
async fn test_pages_advance_in_memory_watermark_only() {
    let log = ChangeLog::with_rows(&[("a", 1), ("b", 2), ("c", 3)]);
    let cursor = InMemoryCursorStore::new();
    let mut producer = Producer::new(
        spec(2, Path::new("unused.json")),
        source_for(&log),
        Arc::new(cursor.clone()),
    )
    .await
    .unwrap();

    let pages = drain(&mut producer).await.unwrap();

    assert_eq!(pages, vec![vec!["a", "b"], vec!["c"]]);
    assert_eq!(producer.watermark(), Some(&Watermark::Int(3)));
    assert_eq!(producer.committed(), None);
    assert!(cursor.snapshot().is_empty());
}

#[tokio::test]
async fn test_save_state_writes_only_on_advance() {
    let log = ChangeLog::with_rows(&[("a", 1)]);
    let cursor = InMemoryCursorStore::new();
    let mut producer = Producer::new(
        spec(10, Path::new("unused.json")),
        source_for(&log),
        Arc::new(cursor.clone()),
    )
    .await
    .unwrap();

    // Nothing produced yet
    assert!(!producer.save_state().await.unwrap());

    drain(&mut producer).await.unwrap();
    assert!(producer.save_state().await.unwrap());
    assert_eq!(cursor.snapshot().get("modified"), Some(&Watermark::Int(1)));

    // Empty follow-up pass
    producer.reload().await.unwrap();
    assert!(drain(&mut producer).await.unwrap().is_empty());
    assert!(!producer.save_state().await.unwrap());
}

#[tokio::test]
async fn test_reload_discards_uncommitted_progress() {
    let log = ChangeLog::with_rows(&[("a", 1), ("b", 2)]);
    let cursor = InMemoryCursorStore::with_value("modified", Watermark::Int(1));
    let source = source_for(&log);
    let mut producer = Producer::new(
        spec(10, Path::new("unused.json")),
        source.clone(),
        Arc::new(cursor),
    )
    .await
    .unwrap();

    assert_eq!(drain(&mut producer).await.unwrap(), vec![vec!["b"]]);
    producer.reload().await.unwrap();

    assert_eq!(producer.watermark(), Some(&Watermark::Int(1)));
    source.clear_calls();
    assert_eq!(drain(&mut producer).await.unwrap(), vec![vec!["b"]]);
    assert_eq!(source.calls()[0].params[0], QueryParam::Int(1));
}

#[tokio::test]
async fn test_row_without_state_field_is_an_error() {
    let source = ScriptedSource::new().route(FILM_PRODUCER, |_| {
        Ok(vec![RawRow::from_pairs(vec![("id", json!("a"))])])
    });
    let mut producer = Producer::new(
        spec(10, Path::new("unused.json")),
        Arc::new(source),
        Arc::new(InMemoryCursorStore::new()),
    )
    .await
    .unwrap();

    let err = producer.next_page().await.unwrap_err();

    match err {
        OrchestratorError::MissingStateField { producer, field } => {
            assert_eq!(producer, FILM_PRODUCER);
            assert_eq!(field, "modified");
        }
        other => panic!("expected MissingStateField, got {other:?}"),
    }
}

#[tokio::test]
async fn test_watermark_filter_must_have_own_line() {
    let one_line = ProducerSpec {
        sql: "SELECT id, modified FROM content.film_work WHERE modified > :watermark ORDER BY modified LIMIT :limit"
            .to_string(),
        ..spec(10, Path::new("unused.json"))
    };
    let limit_on_filter_line = ProducerSpec {
        sql: "SELECT id, modified FROM content.film_work\nWHERE modified > :watermark ORDER BY modified LIMIT :limit"
            .to_string(),
        ..spec(10, Path::new("unused.json"))
    };

    for bad in [one_line, limit_on_filter_line] {
        let source = Arc::new(ScriptedSource::new());
        let result = Producer::new(bad, source.clone(), Arc::new(InMemoryCursorStore::new())).await;

        assert!(matches!(result, Err(OrchestratorError::Config(_))));
        assert!(source.calls().is_empty());
    }
}

#[tokio::test]
async fn test_timestamp_state_column() {
    let source = ScriptedSource::new().route(FILM_PRODUCER, |params| {
        if params.len() > 1 {
            return Ok(Vec::new());
        }
        Ok(vec![
            RawRow::from_pairs(vec![
                ("id", json!("a")),
                ("modified", json!("2021-06-16T20:14:09.221+00:00")),
            ]),
            RawRow::from_pairs(vec![
                ("id", json!("b")),
                ("modified", json!("2021-06-16T20:14:10+00:00")),
            ]),
        ])
    });
    let source = Arc::new(source);
    let mut producer = Producer::new(
        spec(10, Path::new("unused.json")),
        source.clone(),
        Arc::new(InMemoryCursorStore::new()),
    )
    .await
    .unwrap();

    drain(&mut producer).await.unwrap();

    let expected = Utc.with_ymd_and_hms(2021, 6, 16, 20, 14, 10).unwrap();
    assert_eq!(producer.watermark(), Some(&Watermark::Timestamp(expected)));
    assert_eq!(
        source.calls()[1].params[0],
        QueryParam::Timestamp(expected)
    );
}

#[tokio::test]
async fn test_json_cursor_file_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("film_work.json");
    let log = ChangeLog::with_rows(&[("a", 1), ("b", 3)]);

    {
        let mut producer = Producer::new(
            spec(10, &path),
            source_for(&log),
            Arc::new(JsonFileCursorStore::new(&path)),
        )
        .await
        .unwrap();
        drain(&mut producer).await.unwrap();
        producer.save_state().await.unwrap();
    }

    let stored: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(stored["modified"], 3);

    // A fresh process picks up where the last commit left off
    let source = source_for(&log);
    let mut producer = Producer::new(
        spec(10, &path),
        source.clone(),
        Arc::new(JsonFileCursorStore::new(&path)),
    )
    .await
    .unwrap();

    assert_eq!(producer.committed(), Some(&Watermark::Int(3)));
    assert!(drain(&mut producer).await.unwrap().is_empty());
    assert_eq!(
        source.calls()[0].params,
        vec![QueryParam::Int(3), QueryParam::Int(10)]
    );
}

#[tokio::test]
async fn test_open_cursor_store_by_extension() {
    let dir = tempfile::tempdir().unwrap();

    let json_path = dir.path().join("state.json");
    let store = open_cursor_store(&json_path).unwrap();
    store.set("modified", &Watermark::Int(7)).await.unwrap();
    let text = std::fs::read_to_string(&json_path).unwrap();
    assert!(serde_json::from_str::<serde_json::Value>(&text).is_ok());

    let db_path = dir.path().join("state.db");
    let store = open_cursor_store(&db_path).unwrap();
    store.set("modified", &Watermark::Int(9)).await.unwrap();
    assert!(db_path.exists());

    let reopened = open_cursor_store(&db_path).unwrap();
    assert_eq!(reopened.get("modified").await.unwrap(), Some(Watermark::Int(9)));
}
