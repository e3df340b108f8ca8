mod common;

use common::{MockApi, UploadStatusCollector, CHECK_ALL_NO_BODY, TOKEN_ERROR_BODY};
use std::{fs, sync::Arc, time::Duration};
use stratus_upload_manager::{
    apis::{ApiCaller, UploadTarget},
    hash_file, OnDuplicateAction, UploadErrorKind, UploadManager, UploadModification,
    UploadRequest, UploadState,
};
use stratus_http_client::HttpConfig;
use tokio::runtime::Handle;

const MIB: usize = 1024 * 1024;

fn caller(addr: std::net::SocketAddr) -> ApiCaller {
    let http_config = HttpConfig::builder()
        .work_runtime(Handle::current())
        .build();
    ApiCaller::new_with_base_url(http_config, "SESSION", format!("http://{}", addr))
}

fn fixture_file(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

#[tokio::test(flavor = "multi_thread")]
async fn test_simple_upload_lifecycle() {
    let api = Arc::new(MockApi::default());
    let addr = api.to_owned().start().await;

    let dir = tempfile::tempdir().unwrap();
    let path = fixture_file(&dir, "file.bin", &vec![7u8; 1024]);

    let manager = UploadManager::new(caller(addr));
    let collector = UploadStatusCollector::new();
    let callback = collector.to_owned();
    manager.add(UploadRequest::new(&path), move |status| {
        callback.record(status)
    });
    collector.wait_terminal().await;

    assert_eq!(
        collector.state_names(),
        [
            "enqueued_for_hashing",
            "hashing",
            "enqueued_for_upload",
            "uploading",
            "polling",
            "completed",
        ]
    );
    match collector.terminal() {
        UploadState::Completed { quickkey, filename } => {
            assert_eq!(quickkey, "Q");
            assert_eq!(filename.as_deref(), Some("stored-name"));
        }
        other => panic!("unexpected terminal: {:?}", other),
    }

    assert_eq!(api.simple_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(api.resumable_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert!(api.poll_calls.load(std::sync::atomic::Ordering::SeqCst) >= 1);

    let heads = api.upload_heads.lock().unwrap().to_owned();
    assert!(heads[0].contains("x-filename: file.bin"));
    assert!(heads[0].contains("x-filesize: 1024"));
    let lines = api.upload_lines.lock().unwrap().to_owned();
    assert!(lines[0].contains("session_token=TOKEN"));
    assert!(lines[0].contains("response_format=json"));
    assert!(lines[0].contains("mtime="));
    assert!(!lines[0].contains("action_on_duplicate"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resumable_upload_from_bitmap() {
    let api = Arc::new(MockApi::default());
    // 三个分块，服务端已经有第二块。
    *api.check_body.lock().unwrap() = r#"{"response":{"result":"Success","file_exists":"no",
        "hash_different":"no","storage_limit_exceeded":"no","hash_exists":"no",
        "resumable":{"number_of_units":3,"words":[2]}}}"#
        .to_owned();
    let addr = api.to_owned().start().await;

    let dir = tempfile::tempdir().unwrap();
    let content: Vec<u8> = (0..20 * MIB).map(|i| (i % 249) as u8).collect();
    let path = fixture_file(&dir, "large.bin", &content);

    let manager = UploadManager::new(caller(addr));
    let collector = UploadStatusCollector::new();
    let callback = collector.to_owned();
    manager.add(UploadRequest::new(&path), move |status| {
        callback.record(status)
    });
    collector.wait_terminal().await;

    match collector.terminal() {
        UploadState::Completed { quickkey, .. } => assert_eq!(quickkey, "Q"),
        other => panic!("unexpected terminal: {:?}", other),
    }

    assert_eq!(api.simple_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(api.resumable_calls.load(std::sync::atomic::Ordering::SeqCst), 2);

    let mut unit_ids = api.unit_ids.lock().unwrap().to_owned();
    unit_ids.sort_unstable();
    assert_eq!(unit_ids, [0, 2]);

    let heads = api.upload_heads.lock().unwrap().to_owned();
    for head in &heads {
        assert!(head.contains("x-filehash: "));
        assert!(head.contains("x-unit-hash: "));
        assert!(head.contains(&format!("x-filesize: {}", 20 * MIB)));
    }
    let mut unit_sizes: Vec<String> = heads
        .iter()
        .map(|head| {
            common::request_header(head, "x-unit-size")
                .unwrap()
                .to_owned()
        })
        .collect();
    unit_sizes.sort_unstable();
    let mut expected = vec![(8 * MIB).to_string(), (4 * MIB).to_string()];
    expected.sort_unstable();
    assert_eq!(unit_sizes, expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_instant_upload_when_hash_exists() {
    let api = Arc::new(MockApi::default());
    *api.check_body.lock().unwrap() = r#"{"response":{"result":"Success","file_exists":"no",
        "hash_different":"no","storage_limit_exceeded":"no","hash_exists":"yes"}}"#
        .to_owned();
    let addr = api.to_owned().start().await;

    let dir = tempfile::tempdir().unwrap();
    let path = fixture_file(&dir, "instant.bin", b"instant content");

    let manager = UploadManager::new(caller(addr));
    let collector = UploadStatusCollector::new();
    let callback = collector.to_owned();
    manager.add(UploadRequest::new(&path), move |status| {
        callback.record(status)
    });
    collector.wait_terminal().await;

    match collector.terminal() {
        UploadState::Completed { quickkey, .. } => assert_eq!(quickkey, "QK-INSTANT"),
        other => panic!("unexpected terminal: {:?}", other),
    }
    assert_eq!(api.instant_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(api.simple_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(api.poll_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_already_uploaded_short_circuits() {
    let api = Arc::new(MockApi::default());
    *api.check_body.lock().unwrap() = r#"{"response":{"result":"Success","file_exists":"yes",
        "hash_different":"no","duplicate_quickkey":"DUP","storage_limit_exceeded":"no",
        "hash_exists":"yes"}}"#
        .to_owned();
    let addr = api.to_owned().start().await;

    let dir = tempfile::tempdir().unwrap();
    let path = fixture_file(&dir, "dup.bin", b"duplicate content");

    let manager = UploadManager::new(caller(addr));
    let collector = UploadStatusCollector::new();
    let callback = collector.to_owned();
    manager.add(UploadRequest::new(&path), move |status| {
        callback.record(status)
    });
    collector.wait_terminal().await;

    match collector.terminal() {
        UploadState::Completed { quickkey, .. } => assert_eq!(quickkey, "DUP"),
        other => panic!("unexpected terminal: {:?}", other),
    }
    assert_eq!(api.instant_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(api.poll_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_duplicate_name_fails_without_replace() {
    let api = Arc::new(MockApi::default());
    *api.check_body.lock().unwrap() = r#"{"response":{"result":"Success","file_exists":"yes",
        "hash_different":"yes","storage_limit_exceeded":"no","hash_exists":"no"}}"#
        .to_owned();
    let addr = api.to_owned().start().await;

    let dir = tempfile::tempdir().unwrap();
    let path = fixture_file(&dir, "clash.bin", b"clashing content");

    let manager = UploadManager::new(caller(addr));
    let collector = UploadStatusCollector::new();
    let callback = collector.to_owned();
    manager.add(UploadRequest::new(&path), move |status| {
        callback.record(status)
    });
    collector.wait_terminal().await;

    match collector.terminal() {
        UploadState::Failed(error) => {
            assert_eq!(error.kind(), UploadErrorKind::FileExistInFolder);
        }
        other => panic!("unexpected terminal: {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_replace_duplicate_uploads_anyway() {
    let api = Arc::new(MockApi::default());
    *api.check_body.lock().unwrap() = r#"{"response":{"result":"Success","file_exists":"yes",
        "hash_different":"yes","storage_limit_exceeded":"no","hash_exists":"no"}}"#
        .to_owned();
    let addr = api.to_owned().start().await;

    let dir = tempfile::tempdir().unwrap();
    let path = fixture_file(&dir, "replace.bin", b"replacement content");

    let manager = UploadManager::new(caller(addr));
    let collector = UploadStatusCollector::new();
    let callback = collector.to_owned();
    manager.add(
        UploadRequest::new(&path)
            .target_folder(UploadTarget::ParentFolderKey("folder9".to_owned()))
            .on_duplicate(OnDuplicateAction::Replace),
        move |status| callback.record(status),
    );
    collector.wait_terminal().await;

    assert!(matches!(
        collector.terminal(),
        UploadState::Completed { .. }
    ));
    let lines = api.upload_lines.lock().unwrap().to_owned();
    assert!(lines[0].contains("action_on_duplicate=replace"));
    assert!(lines[0].contains("folder_key=folder9"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_storage_limit_exceeded() {
    let api = Arc::new(MockApi::default());
    *api.check_body.lock().unwrap() = r#"{"response":{"result":"Success","file_exists":"no",
        "hash_different":"no","storage_limit_exceeded":"yes","hash_exists":"no"}}"#
        .to_owned();
    let addr = api.to_owned().start().await;

    let dir = tempfile::tempdir().unwrap();
    let path = fixture_file(&dir, "big.bin", b"over quota");

    let manager = UploadManager::new(caller(addr));
    let collector = UploadStatusCollector::new();
    let callback = collector.to_owned();
    manager.add(UploadRequest::new(&path), move |status| {
        callback.record(status)
    });
    collector.wait_terminal().await;

    match collector.terminal() {
        UploadState::Failed(error) => {
            assert_eq!(error.kind(), UploadErrorKind::InsufficientCloudStorage);
        }
        other => panic!("unexpected terminal: {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_zero_byte_file_is_rejected() {
    let api = Arc::new(MockApi::default());
    let addr = api.to_owned().start().await;

    let dir = tempfile::tempdir().unwrap();
    let path = fixture_file(&dir, "empty.bin", b"");

    let manager = UploadManager::new(caller(addr));
    let collector = UploadStatusCollector::new();
    let callback = collector.to_owned();
    manager.add(UploadRequest::new(&path), move |status| {
        callback.record(status)
    });
    collector.wait_terminal().await;

    match collector.terminal() {
        UploadState::Failed(error) => {
            assert_eq!(error.kind(), UploadErrorKind::ZeroByteFile);
        }
        other => panic!("unexpected terminal: {:?}", other),
    }
    assert_eq!(api.token_calls(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_identical_content_never_uploads_concurrently() {
    let api = Arc::new(MockApi::default());
    *api.upload_delay.lock().unwrap() = Duration::from_millis(300);
    let addr = api.to_owned().start().await;

    let dir = tempfile::tempdir().unwrap();
    let content = vec![42u8; 4096];
    let first = fixture_file(&dir, "copy-a.bin", &content);
    let second = fixture_file(&dir, "copy-b.bin", &content);

    let manager = UploadManager::new(caller(addr));
    let collector_a = UploadStatusCollector::new();
    let collector_b = UploadStatusCollector::new();
    let callback = collector_a.to_owned();
    manager.add(UploadRequest::new(&first), move |status| {
        callback.record(status)
    });
    let callback = collector_b.to_owned();
    manager.add(UploadRequest::new(&second), move |status| {
        callback.record(status)
    });

    collector_a.wait_terminal().await;
    collector_b.wait_terminal().await;

    assert!(matches!(
        collector_a.terminal(),
        UploadState::Completed { .. }
    ));
    assert!(matches!(
        collector_b.terminal(),
        UploadState::Completed { .. }
    ));
    assert_eq!(api.simple_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(
        api.max_concurrent_uploads
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_token_failure_backs_off_before_retry() {
    let api = Arc::new(MockApi::default());
    api.token_bodies
        .lock()
        .unwrap()
        .push_back(TOKEN_ERROR_BODY.to_owned());
    let addr = api.to_owned().start().await;

    let dir = tempfile::tempdir().unwrap();
    let path = fixture_file(&dir, "retry.bin", b"needs a token");

    let manager = UploadManager::builder(caller(addr))
        .action_token_retry(Duration::from_millis(300))
        .build();
    let collector = UploadStatusCollector::new();
    let callback = collector.to_owned();
    manager.add(UploadRequest::new(&path), move |status| {
        callback.record(status)
    });
    collector.wait_terminal().await;

    assert!(matches!(
        collector.terminal(),
        UploadState::Completed { .. }
    ));
    let times = api.token_call_times.lock().unwrap().to_owned();
    assert_eq!(times.len(), 2);
    assert!(
        times[1] - times[0] >= Duration::from_millis(290),
        "retried after {:?}",
        times[1] - times[0]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_and_pause_while_waiting_for_token() {
    let api = Arc::new(MockApi::default());
    // 令牌一直拿不到，上传停在等待队列里。
    api.token_bodies
        .lock()
        .unwrap()
        .push_back(TOKEN_ERROR_BODY.to_owned());
    *api.check_body.lock().unwrap() = CHECK_ALL_NO_BODY.to_owned();
    let addr = api.to_owned().start().await;

    let dir = tempfile::tempdir().unwrap();
    let path = fixture_file(&dir, "queued.bin", b"waiting for token");

    let manager = UploadManager::builder(caller(addr))
        .action_token_retry(Duration::from_secs(60))
        .build();

    let collector = UploadStatusCollector::new();
    let callback = collector.to_owned();
    let handle = manager.add(UploadRequest::new(&path), move |status| {
        callback.record(status)
    });
    while !collector
        .states()
        .iter()
        .any(|state| matches!(state, UploadState::EnqueuedForUpload))
    {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    manager.modify(handle, UploadModification::Cancel);
    collector.wait_terminal().await;
    match collector.terminal() {
        UploadState::Failed(error) => assert_eq!(error.kind(), UploadErrorKind::Cancelled),
        other => panic!("unexpected terminal: {:?}", other),
    }

    let collector = UploadStatusCollector::new();
    let callback = collector.to_owned();
    let handle = manager.add(UploadRequest::new(&path), move |status| {
        callback.record(status)
    });
    while !collector
        .states()
        .iter()
        .any(|state| matches!(state, UploadState::EnqueuedForUpload))
    {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    manager.modify(handle, UploadModification::Pause);
    collector.wait_terminal().await;
    match collector.terminal() {
        UploadState::Failed(error) => assert_eq!(error.kind(), UploadErrorKind::Paused),
        other => panic!("unexpected terminal: {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_known_hashes_skip_hashing() {
    let api = Arc::new(MockApi::default());
    let addr = api.to_owned().start().await;

    let dir = tempfile::tempdir().unwrap();
    let path = fixture_file(&dir, "prehashed.bin", b"hash me ahead of time");
    let metadata = fs::metadata(&path).unwrap();
    let hashes = hash_file(&path, metadata.len(), metadata.modified().unwrap())
        .await
        .unwrap();

    let manager = UploadManager::new(caller(addr));
    let collector = UploadStatusCollector::new();
    let callback = collector.to_owned();
    manager.add(
        UploadRequest::new(&path).known_hashes(hashes),
        move |status| callback.record(status),
    );
    collector.wait_terminal().await;

    assert!(matches!(
        collector.terminal(),
        UploadState::Completed { .. }
    ));
    let names = collector.state_names();
    assert!(!names.contains(&"enqueued_for_hashing"));
    assert!(!names.contains(&"hashing"));
    assert_eq!(names.first(), Some(&"enqueued_for_upload"));
}
