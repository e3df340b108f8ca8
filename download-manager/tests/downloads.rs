mod common;

use common::{read_request_head, request_header, start_server, write_response, StatusCollector};
use sha2::{Digest, Sha256};
use std::{fs, path::PathBuf, sync::Arc, time::Duration};
use stratus_download_manager::{
    download, DownloadConfig, DownloadError, DownloadErrorKind, DownloadStatus, DownloadTarget,
    OnExists, PathOrChooser, Sha256Reader, SuccessOutcome,
};
use stratus_http_client::{ErrorKind as HttpErrorKind, HttpConfig};
use tokio::{io::AsyncWriteExt, runtime::Handle, time::sleep};

fn http_config() -> HttpConfig {
    HttpConfig::builder()
        .work_runtime(Handle::current())
        .build()
}

fn pattern_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_download_to_memory() {
    let addr = start_server(|mut stream, _| async move {
        read_request_head(&mut stream).await;
        write_response(&mut stream, b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello").await;
    })
    .await;

    let collector = StatusCollector::new();
    let callback = collector.to_owned();
    download(
        format!("http://{}/", addr),
        DownloadConfig::new(http_config(), DownloadTarget::WriteToMemory),
        move |status| callback.record(status),
    );
    collector.wait_terminal().await;

    assert!(collector.progress_count() >= 1);
    assert_eq!(collector.terminal_count(), 1);
    match collector.terminal() {
        DownloadStatus::Success(SuccessOutcome::InMemory(buffer)) => {
            assert_eq!(buffer.as_slice(), b"hello");
        }
        other => panic!("unexpected terminal: {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_overwrite_denied() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("existing.bin");
    fs::write(&path, b"already here").unwrap();

    let collector = StatusCollector::new();
    let callback = collector.to_owned();
    download(
        "http://127.0.0.1:1/never-contacted",
        DownloadConfig::new(
            http_config(),
            DownloadTarget::WriteToPath {
                path: path.to_owned(),
                on_exists: OnExists::FailIfExisting,
            },
        ),
        move |status| callback.record(status),
    );
    collector.wait_terminal().await;

    match collector.terminal() {
        DownloadStatus::Failure(error) => {
            assert_eq!(error.kind(), DownloadErrorKind::OverwriteDenied);
        }
        other => panic!("unexpected terminal: {:?}", other),
    }
    assert_eq!(fs::read(&path).unwrap(), b"already here");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_write_to_path_rewrites_existing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("target.bin");
    fs::write(&path, b"old content").unwrap();

    let addr = start_server(|mut stream, _| async move {
        read_request_head(&mut stream).await;
        write_response(&mut stream, b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nnew").await;
    })
    .await;

    let collector = StatusCollector::new();
    let callback = collector.to_owned();
    download(
        format!("http://{}/", addr),
        DownloadConfig::new(
            http_config(),
            DownloadTarget::WriteToPath {
                path: path.to_owned(),
                on_exists: OnExists::RewriteIfExisting,
            },
        ),
        move |status| callback.record(status),
    );
    collector.wait_terminal().await;

    match collector.terminal() {
        DownloadStatus::Success(SuccessOutcome::OnDisk(on_disk)) => {
            assert_eq!(on_disk, path);
        }
        other => panic!("unexpected terminal: {:?}", other),
    }
    assert_eq!(fs::read(&path).unwrap(), b"new");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_filename_from_response_header() {
    let dir = tempfile::tempdir().unwrap();
    let dir_path = dir.path().to_owned();

    let addr = start_server(|mut stream, _| async move {
        read_request_head(&mut stream).await;
        write_response(
            &mut stream,
            b"HTTP/1.1 200 OK\r\nContent-Length: 7\r\n\
              Content-Disposition: attachment; filename=\"named.bin\"\r\n\r\ncontent",
        )
        .await;
    })
    .await;

    let chooser_dir = dir_path.to_owned();
    let collector = StatusCollector::new();
    let callback = collector.to_owned();
    download(
        format!("http://{}/", addr),
        DownloadConfig::new(
            http_config(),
            DownloadTarget::WriteToPathFromHeader {
                chooser: Arc::new(move |filename, _url, _headers| {
                    let filename = filename.ok_or_else(|| {
                        DownloadError::new(
                            DownloadErrorKind::NoFilenameInHeader,
                            "No filename in response header.",
                        )
                    })?;
                    Ok(chooser_dir.join(filename))
                }),
            },
        ),
        move |status| callback.record(status),
    );
    collector.wait_terminal().await;

    let expected = dir_path.join("named.bin");
    match collector.terminal() {
        DownloadStatus::Success(SuccessOutcome::OnDisk(on_disk)) => {
            assert_eq!(on_disk, expected);
        }
        other => panic!("unexpected terminal: {:?}", other),
    }
    assert_eq!(fs::read(&expected).unwrap(), b"content");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_filename_rejected_by_chooser() {
    let addr = start_server(|mut stream, _| async move {
        read_request_head(&mut stream).await;
        write_response(&mut stream, b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nxx").await;
    })
    .await;

    let collector = StatusCollector::new();
    let callback = collector.to_owned();
    download(
        format!("http://{}/", addr),
        DownloadConfig::new(
            http_config(),
            DownloadTarget::WriteToPathFromHeader {
                chooser: Arc::new(|filename, _url, _headers| match filename {
                    Some(filename) => Ok(PathBuf::from(filename)),
                    None => Err(DownloadError::new(
                        DownloadErrorKind::NoFilenameInHeader,
                        "No filename in response header.",
                    )),
                }),
            },
        ),
        move |status| callback.record(status),
    );
    collector.wait_terminal().await;

    match collector.terminal() {
        DownloadStatus::Failure(error) => {
            assert_eq!(error.kind(), DownloadErrorKind::NoFilenameInHeader);
        }
        other => panic!("unexpected terminal: {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_no_target_with_reader() {
    let body = pattern_bytes(65536);
    let expected_digest = hex::encode(Sha256::digest(&body));

    let addr = start_server(move |mut stream, _| {
        let body = body.to_owned();
        async move {
            read_request_head(&mut stream).await;
            let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len());
            write_response(&mut stream, head.as_bytes()).await;
            write_response(&mut stream, &body).await;
        }
    })
    .await;

    let reader = Arc::new(Sha256Reader::new());
    let collector = StatusCollector::new();
    let callback = collector.to_owned();
    download(
        format!("http://{}/", addr),
        DownloadConfig::builder(http_config(), DownloadTarget::NoTarget)
            .add_reader(reader.to_owned())
            .build(),
        move |status| callback.record(status),
    );
    collector.wait_terminal().await;

    assert!(matches!(
        collector.terminal(),
        DownloadStatus::Success(SuccessOutcome::NoTarget)
    ));
    assert_eq!(reader.hex_digest(), expected_digest);
}

const MIB: usize = 1024 * 1024;

#[tokio::test(flavor = "multi_thread")]
async fn test_resume_with_hashing_reader() {
    let full_content = pattern_bytes(3 * MIB);
    let expected_digest = hex::encode(Sha256::digest(&full_content));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.bin");
    fs::write(&path, &full_content[..MIB]).unwrap();

    let suffix = full_content[MIB..].to_vec();
    let addr = start_server(move |mut stream, index| {
        let suffix = suffix.to_owned();
        async move {
            let head = read_request_head(&mut stream).await;
            if index == 0 {
                assert_eq!(request_header(&head, "range"), Some("bytes=0-"));
                write_response(
                    &mut stream,
                    format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", 3 * MIB).as_bytes(),
                )
                .await;
            } else {
                assert_eq!(
                    request_header(&head, "range"),
                    Some("bytes=1048576-3145728")
                );
                let response = format!("HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\n\r\n", suffix.len());
                write_response(&mut stream, response.as_bytes()).await;
                write_response(&mut stream, &suffix).await;
            }
        }
    })
    .await;

    let reader = Arc::new(Sha256Reader::new());
    let collector = StatusCollector::new();
    let callback = collector.to_owned();
    download(
        format!("http://{}/file.bin", addr),
        DownloadConfig::builder(
            http_config(),
            DownloadTarget::ContinueToPath {
                path: PathOrChooser::Path(path.to_owned()),
                expected_size: None,
            },
        )
        .add_reader(reader.to_owned())
        .build(),
        move |status| callback.record(status),
    );
    collector.wait_terminal().await;

    match collector.terminal() {
        DownloadStatus::Success(SuccessOutcome::OnDisk(on_disk)) => {
            assert_eq!(on_disk, path);
        }
        other => panic!("unexpected terminal: {:?}", other),
    }
    assert_eq!(fs::read(&path).unwrap(), full_content);
    assert_eq!(reader.hex_digest(), expected_digest);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resume_guards() {
    let dir = tempfile::tempdir().unwrap();

    // 本地已经和远端一样大。
    let path = dir.path().join("complete.bin");
    fs::write(&path, vec![0u8; 1000]).unwrap();
    let kind = resume_against_remote(&path, 1000, None).await;
    assert_eq!(kind, DownloadErrorKind::ResumedDownloadAlreadyDownloaded);

    // 本地比远端还大。
    let path = dir.path().join("too-large.bin");
    fs::write(&path, vec![0u8; 2000]).unwrap();
    let kind = resume_against_remote(&path, 1000, None).await;
    assert_eq!(kind, DownloadErrorKind::ResumedDownloadTooLarge);

    // 远端大小和预期不符。
    let path = dir.path().join("changed.bin");
    fs::write(&path, vec![0u8; 100]).unwrap();
    let kind = resume_against_remote(&path, 1000, Some(999)).await;
    assert_eq!(kind, DownloadErrorKind::ResumedDownloadChangedRemotely);
}

async fn resume_against_remote(
    path: &std::path::Path,
    remote_size: usize,
    expected_size: Option<u64>,
) -> DownloadErrorKind {
    let addr = start_server(move |mut stream, _| async move {
        read_request_head(&mut stream).await;
        write_response(
            &mut stream,
            format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", remote_size).as_bytes(),
        )
        .await;
    })
    .await;

    let collector = StatusCollector::new();
    let callback = collector.to_owned();
    download(
        format!("http://{}/", addr),
        DownloadConfig::new(
            http_config(),
            DownloadTarget::ContinueToPath {
                path: PathOrChooser::Path(path.to_owned()),
                expected_size,
            },
        ),
        move |status| callback.record(status),
    );
    collector.wait_terminal().await;

    match collector.terminal() {
        DownloadStatus::Failure(error) => error.kind(),
        other => panic!("unexpected terminal: {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resume_rejected_when_ranges_denied() {
    let addr = start_server(|mut stream, _| async move {
        read_request_head(&mut stream).await;
        write_response(
            &mut stream,
            b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\nAccept-Ranges: none\r\n\r\n",
        )
        .await;
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    let collector = StatusCollector::new();
    let callback = collector.to_owned();
    download(
        format!("http://{}/", addr),
        DownloadConfig::new(
            http_config(),
            DownloadTarget::ContinueToPath {
                path: PathOrChooser::Path(dir.path().join("out.bin")),
                expected_size: None,
            },
        ),
        move |status| callback.record(status),
    );
    collector.wait_terminal().await;

    match collector.terminal() {
        DownloadStatus::Failure(error) => {
            assert_eq!(error.kind(), DownloadErrorKind::DownloadResumeUnsupported);
        }
        other => panic!("unexpected terminal: {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resume_probe_rejects_bad_status() {
    let addr = start_server(|mut stream, _| async move {
        read_request_head(&mut stream).await;
        write_response(
            &mut stream,
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n",
        )
        .await;
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    let collector = StatusCollector::new();
    let callback = collector.to_owned();
    download(
        format!("http://{}/", addr),
        DownloadConfig::new(
            http_config(),
            DownloadTarget::ContinueToPath {
                path: PathOrChooser::Path(dir.path().join("out.bin")),
                expected_size: None,
            },
        ),
        move |status| callback.record(status),
    );
    collector.wait_terminal().await;

    match collector.terminal() {
        DownloadStatus::Failure(error) => {
            assert_eq!(error.kind(), DownloadErrorKind::DownloadResumeUnsupported);
        }
        other => panic!("unexpected terminal: {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resume_without_local_file_downloads_fully() {
    let body = pattern_bytes(2048);
    let addr = start_server(move |mut stream, index| {
        let body = body.to_owned();
        async move {
            let head = read_request_head(&mut stream).await;
            if index == 0 {
                assert_eq!(request_header(&head, "range"), Some("bytes=0-"));
                write_response(
                    &mut stream,
                    format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len())
                        .as_bytes(),
                )
                .await;
            } else {
                // 本地没有文件，应当完整下载而不是带范围续传。
                assert_eq!(request_header(&head, "range"), None);
                let response =
                    format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len());
                write_response(&mut stream, response.as_bytes()).await;
                write_response(&mut stream, &body).await;
            }
        }
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fresh.bin");
    let collector = StatusCollector::new();
    let callback = collector.to_owned();
    download(
        format!("http://{}/", addr),
        DownloadConfig::new(
            http_config(),
            DownloadTarget::ContinueToPath {
                path: PathOrChooser::Path(path.to_owned()),
                expected_size: None,
            },
        ),
        move |status| callback.record(status),
    );
    collector.wait_terminal().await;

    assert!(matches!(
        collector.terminal(),
        DownloadStatus::Success(SuccessOutcome::OnDisk(_))
    ));
    assert_eq!(fs::read(&path).unwrap(), pattern_bytes(2048));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_mid_download() {
    let addr = start_server(|mut stream, _| async move {
        read_request_head(&mut stream).await;
        write_response(&mut stream, b"HTTP/1.1 200 OK\r\nContent-Length: 1000000\r\n\r\n").await;
        let chunk = vec![b'x'; 8192];
        loop {
            if stream.write_all(&chunk).await.is_err() {
                break;
            }
            let _ = stream.flush().await;
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    let dir = tempfile::tempdir().unwrap();
    let collector = StatusCollector::new();
    let callback = collector.to_owned();
    let handle = download(
        format!("http://{}/", addr),
        DownloadConfig::new(
            http_config(),
            DownloadTarget::WriteToPath {
                path: dir.path().join("cancelled.bin"),
                on_exists: OnExists::RewriteIfExisting,
            },
        ),
        move |status| callback.record(status),
    );

    while collector.progress_count() == 0 {
        sleep(Duration::from_millis(10)).await;
    }
    handle.cancel();
    collector.wait_terminal().await;

    assert_eq!(collector.terminal_count(), 1);
    match collector.terminal() {
        DownloadStatus::Failure(error) => {
            assert_eq!(
                error.kind(),
                DownloadErrorKind::Http(HttpErrorKind::Cancelled)
            );
        }
        other => panic!("unexpected terminal: {:?}", other),
    }
}
