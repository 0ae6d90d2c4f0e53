use filetracker_core::sink::LogSink;
use filetracker_core::source::ChangeEvent;
use filetracker_core::LogEntry;
use filetracker_storage::SledLogSink;

#[tokio::test]
async fn test_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("logs");

    {
        let sink = SledLogSink::open(&path).unwrap();
        sink.write(&ChangeEvent::new("/srv/watched/old.txt", 1_700_000_000))
            .await
            .unwrap();
        sink.close().await.unwrap();
    }

    let sink = SledLogSink::open(&path).unwrap();
    sink.write(&ChangeEvent::new("/srv/watched/new.txt", 1_700_000_060))
        .await
        .unwrap();

    let entries: Vec<LogEntry> = sink
        .read_paginated(10, 0)
        .await
        .unwrap()
        .into_iter()
        .map(LogEntry::from)
        .collect();

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].details.target_path(), Some("/srv/watched/new.txt"));
    assert_eq!(entries[0].log_time, "2023-11-14T22:14:20Z");
    assert_eq!(entries[1].details.target_path(), Some("/srv/watched/old.txt"));
    assert_ne!(entries[0].id, entries[1].id);
}

#[tokio::test]
async fn test_offset_past_end_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let sink = SledLogSink::open(dir.path().join("logs")).unwrap();
    sink.write(&ChangeEvent::new("/srv/a", 1)).await.unwrap();

    assert!(sink.read_paginated(10, 1).await.unwrap().is_empty());
}
