//! State store behavior across reopen, crash, and concurrent writers.

use callpipe::prelude::*;
use callpipe::utils::{parse_timestamp, FixedClock, SystemClock};
use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn attrs(value: serde_json::Value) -> Attributes {
    value.as_object().cloned().unwrap_or_default()
}

fn download_attrs(id: &str) -> Attributes {
    attrs(json!({
        "broker_id": "b1",
        "filename": format!("b1_{id}.wav"),
        "filepath": format!("output/audio/b1_{id}.wav"),
    }))
}

fn state_file(dir: &TempDir) -> std::path::PathBuf {
    PipelinePaths::new(dir.path()).state_file()
}

fn extract(store: &StateStore, ids: &[&str]) {
    let day = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
    let calls = ids
        .iter()
        .map(|id| ((*id).to_string(), attrs(json!({"broker_id": "b1"}))))
        .collect();
    store.record_extraction(day, day, calls).unwrap();
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}

#[test]
fn test_mark_completed_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::open(state_file(&dir));

    for _ in 0..3 {
        store
            .mark_completed(StageName::DownloadAudio, "C1", download_attrs("C1"))
            .unwrap();
    }

    let doc = read_json(store.state_file());
    assert_eq!(doc["stages"]["download_audio"]["total_downloaded"], json!(1));
    assert_eq!(
        doc["stages"]["download_audio"]["downloaded_files"]
            .as_object()
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn test_round_trip_only_last_updated_differs() {
    let dir = TempDir::new().unwrap();
    let store = StateStore::open(state_file(&dir));
    extract(&store, &["C1", "C2"]);
    store
        .mark_completed(StageName::DownloadAudio, "C1", download_attrs("C1"))
        .unwrap();
    store
        .mark_failed(StageName::DownloadAudio, "C2", "HTTP 404")
        .unwrap();
    store
        .record_archive(
            ArchiveCategory::CallIds,
            ArchiveRecord {
                item_id: None,
                original_filename: "calls_2024-04-01.xlsx".to_string(),
                archive_path: "archive/call_ids/2024-05-01/calls_2024-04-01.xlsx".to_string(),
                archived_at: store.now(),
            },
        )
        .unwrap();
    let before = store.snapshot();

    store.flush().unwrap();
    let reopened = StateStore::open(state_file(&dir));

    assert!(reopened.snapshot().same_content(&before));
}

#[test]
fn test_crash_resume_recomputes_remaining_work() {
    let dir = TempDir::new().unwrap();
    let path = state_file(&dir);
    {
        let store = StateStore::open(&path);
        extract(&store, &["C1", "C2", "C3", "C4"]);
        store
            .mark_completed(StageName::DownloadAudio, "C1", download_attrs("C1"))
            .unwrap();
        store
            .mark_completed(StageName::DownloadAudio, "C3", download_attrs("C3"))
            .unwrap();
    }
    // A temp file left behind by a write interrupted before its rename.
    let leftover = path.with_file_name(".pipeline_state.json.AbC123.tmp");
    fs::write(&leftover, b"{\"partial\": ").unwrap();

    let store = Arc::new(StateStore::open(&path));
    let queries = QueryEngine::new(Arc::clone(&store));

    assert!(!leftover.exists());
    assert!(matches!(store.load(), LoadOutcome::Loaded { warnings: 0 }));
    assert_eq!(
        queries.items_for(StageName::DownloadAudio),
        vec!["C2".to_string(), "C4".to_string()]
    );
    assert_eq!(
        queries.items_for(StageName::Transcribe),
        vec!["C1".to_string(), "C3".to_string()]
    );
}

#[test]
fn test_failed_then_succeeded() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(StateStore::open(state_file(&dir)));
    let stats = StatsReporter::new(Arc::clone(&store));

    store
        .mark_failed(StageName::Transcribe, "C9", "AssemblyAI timeout")
        .unwrap();
    assert_eq!(stats.failed_items().for_stage(StageName::Transcribe), ["C9"]);

    store
        .mark_completed(
            StageName::Transcribe,
            "C9",
            attrs(json!({"transcript_path": "output/transcripts/b1_C9.txt"})),
        )
        .unwrap();

    assert!(stats.failed_items().for_stage(StageName::Transcribe).is_empty());
    assert_eq!(stats.stats().transcribed, 1);

    let doc = read_json(store.state_file());
    let entry = &doc["stages"]["transcribe"]["transcribed_files"]["C9"];
    assert_eq!(entry["status"], json!("completed"));
    assert!(entry.get("error").is_none());
    assert!(entry.get("failed_at").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers() {
    const WRITERS: usize = 64;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(StateStore::with_clock(
        state_file(&dir),
        Arc::new(SystemClock),
    ));

    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::task::spawn_blocking(move || {
                store.mark_completed(StageName::Analyze, &format!("C{i:03}"), Attributes::new())
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().unwrap());
    }

    assert_eq!(
        store.snapshot().ledger(StageName::Analyze).completed_count(),
        WRITERS
    );

    let reopened = StateStore::open(state_file(&dir));
    let ledger_len = reopened.snapshot().ledger(StageName::Analyze).len();
    assert_eq!(ledger_len, WRITERS);
    assert_eq!(
        read_json(reopened.state_file())["stages"]["analyze"]["total_analyzed"],
        json!(WRITERS)
    );
}

#[test]
fn test_legacy_file_is_rewritten_in_uniform_format() {
    let dir = TempDir::new().unwrap();
    let path = state_file(&dir);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(
        &path,
        serde_json::to_vec_pretty(&json!({
            "version": "1.0.0",
            "created": "2024-04-01T09:00:00.123456",
            "last_updated": "2024-04-02T09:00:00.123456",
            "stages": {
                "get_call_ids": {
                    "processed_date_ranges": [
                        {"start_date": "2024-03-01", "end_date": "2024-03-31", "calls_found": 2, "processed_at": "2024-04-01T09:00:00"}
                    ],
                    "total_calls_extracted": 2,
                    "last_run": "2024-04-01T09:00:00"
                },
                "download_audio": {
                    "downloaded_files": {
                        "C1": {"status": "completed", "filename": "b1_C1.wav", "filepath": "/data/output/audio/b1_C1.wav", "completed_at": "2024-04-01T10:00:00"}
                    },
                    "failed_downloads": {
                        "C2": {"error": "HTTP 404", "failed_at": "2024-04-01T10:01:00"}
                    },
                    "total_downloaded": 1
                },
                "transcribe": {"transcribed_files": {}, "failed_transcriptions": {}, "total_transcribed": 0},
                "upload_audio": {"uploaded_files": {}, "failed_uploads": {}, "total_uploaded": 0},
                "analyze": {"analyzed_calls": {}, "failed_analyses": {}, "total_analyzed": 0}
            },
            "archived_files": {"call_ids": [], "audio": [], "transcripts": []}
        }))
        .unwrap(),
    )
    .unwrap();

    let clock = Arc::new(FixedClock(parse_timestamp("2024-05-01T08:00:00Z").unwrap()));
    let store = StateStore::with_clock(&path, clock);

    assert!(store.is_done(StageName::DownloadAudio, "C1"));
    assert!(!store.is_done(StageName::DownloadAudio, "C2"));
    assert!(store.is_range_processed(
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 3, 31).unwrap()
    ));

    store.flush().unwrap();
    let doc = read_json(&path);
    let download = &doc["stages"]["download_audio"];

    assert!(download.get("failed_downloads").is_none());
    assert_eq!(download["downloaded_files"]["C2"]["status"], json!("failed"));
    assert_eq!(download["downloaded_files"]["C2"]["error"], json!("HTTP 404"));
    assert_eq!(doc["archived_files"]["failed"], json!([]));
    assert_eq!(doc["created"], json!("2024-04-01T09:00:00.123456+00:00"));
}

#[test]
fn test_corrupt_file_recovers_and_keeps_backup() {
    let dir = TempDir::new().unwrap();
    let path = state_file(&dir);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, b"\x00\x01 definitely not json").unwrap();

    let store = StateStore::open(&path);
    store
        .mark_completed(StageName::Analyze, "C1", Attributes::new())
        .unwrap();

    let backups = fs::read_dir(path.parent().unwrap())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_string_lossy()
                .starts_with("pipeline_state.json.corrupt-")
        })
        .count();
    assert_eq!(backups, 1);
    assert!(store.is_done(StageName::Analyze, "C1"));
}

#[test]
fn test_null_last_updated_loads_without_backup() {
    let dir = TempDir::new().unwrap();
    let path = state_file(&dir);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(
        &path,
        serde_json::to_vec(&json!({
            "version": "1.0.0",
            "created": "2024-04-01T09:00:00",
            "last_updated": null,
            "stages": {
                "download_audio": {
                    "downloaded_files": {
                        "C1": {"status": "completed", "filename": "b1_C1.wav", "filepath": "/data/b1_C1.wav", "completed_at": "2024-04-01T10:00:00"}
                    },
                    "total_downloaded": 1
                }
            }
        }))
        .unwrap(),
    )
    .unwrap();

    let store = StateStore::open(&path);

    assert!(store.is_done(StageName::DownloadAudio, "C1"));
    assert!(path.exists());
    assert!(matches!(store.load(), LoadOutcome::Loaded { warnings: 1 }));
}
