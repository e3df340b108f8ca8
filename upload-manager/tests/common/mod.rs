#![allow(dead_code)]

use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};
use stratus_upload_manager::{UploadState, UploadStatus};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::Notify,
};

pub const DEFAULT_TOKEN_BODY: &str =
    r#"{"response":{"result":"Success","action_token":"TOKEN"}}"#;
pub const TOKEN_ERROR_BODY: &str =
    r#"{"response":{"result":"Error","error":105,"message":"Invalid token"}}"#;
pub const CHECK_ALL_NO_BODY: &str = r#"{"response":{"result":"Success","file_exists":"no",
    "hash_different":"no","storage_limit_exceeded":"no","hash_exists":"no"}}"#;
pub const POLL_DONE_BODY: &str = r#"{"response":{"result":"Success","doupload":
    {"result":0,"fileerror":0,"status":99,"quickkey":"Q","filename":"stored-name"}}}"#;
pub const UPLOAD_KEY_BODY: &str = r#"{"response":{"result":"Success","doupload":{"key":"UK"}}}"#;

/// 可按测试需要调整的伪 API 服务端
#[derive(Debug)]
pub struct MockApi {
    pub check_body: Mutex<String>,
    pub token_bodies: Mutex<VecDeque<String>>,
    pub token_call_times: Mutex<Vec<Instant>>,
    pub upload_delay: Mutex<Duration>,
    pub upload_heads: Mutex<Vec<String>>,
    pub upload_lines: Mutex<Vec<String>>,
    pub unit_ids: Mutex<Vec<u32>>,
    pub simple_calls: AtomicUsize,
    pub resumable_calls: AtomicUsize,
    pub instant_calls: AtomicUsize,
    pub poll_calls: AtomicUsize,
    pub concurrent_uploads: AtomicUsize,
    pub max_concurrent_uploads: AtomicUsize,
}

impl Default for MockApi {
    fn default() -> Self {
        Self {
            check_body: Mutex::new(CHECK_ALL_NO_BODY.to_owned()),
            token_bodies: Mutex::new(VecDeque::new()),
            token_call_times: Mutex::new(Vec::new()),
            upload_delay: Mutex::new(Duration::ZERO),
            upload_heads: Mutex::new(Vec::new()),
            upload_lines: Mutex::new(Vec::new()),
            unit_ids: Mutex::new(Vec::new()),
            simple_calls: AtomicUsize::new(0),
            resumable_calls: AtomicUsize::new(0),
            instant_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
            concurrent_uploads: AtomicUsize::new(0),
            max_concurrent_uploads: AtomicUsize::new(0),
        }
    }
}

impl MockApi {
    pub async fn start(self: Arc<Self>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let api = self;
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let api = api.to_owned();
                tokio::spawn(async move {
                    api.handle_connection(stream).await;
                });
            }
        });
        addr
    }

    pub fn token_calls(&self) -> usize {
        self.token_call_times.lock().unwrap().len()
    }

    async fn handle_connection(&self, mut stream: TcpStream) {
        let (head, _body) = read_request(&mut stream).await;
        let request_line = head.lines().next().unwrap_or_default().to_owned();

        let body = if request_line.contains("/api/user/get_action_token.php") {
            self.token_call_times.lock().unwrap().push(Instant::now());
            self.token_bodies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| DEFAULT_TOKEN_BODY.to_owned())
        } else if request_line.contains("/api/upload/check.php") {
            self.check_body.lock().unwrap().to_owned()
        } else if request_line.contains("/api/upload/instant.php") {
            self.instant_calls.fetch_add(1, Ordering::SeqCst);
            r#"{"response":{"result":"Success","quickkey":"QK-INSTANT","filename":"stored-name"}}"#
                .to_owned()
        } else if request_line.contains("/api/upload/poll_upload.php") {
            self.poll_calls.fetch_add(1, Ordering::SeqCst);
            POLL_DONE_BODY.to_owned()
        } else if request_line.contains("/api/upload/simple.php")
            || request_line.contains("/api/upload/resumable.php")
        {
            let concurrent = self.concurrent_uploads.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent_uploads
                .fetch_max(concurrent, Ordering::SeqCst);

            if request_line.contains("resumable") {
                self.resumable_calls.fetch_add(1, Ordering::SeqCst);
                if let Some(unit_id) = request_header(&head, "x-unit-id") {
                    self.unit_ids
                        .lock()
                        .unwrap()
                        .push(unit_id.parse().unwrap());
                }
            } else {
                self.simple_calls.fetch_add(1, Ordering::SeqCst);
            }
            self.upload_heads.lock().unwrap().push(head.to_owned());
            self.upload_lines.lock().unwrap().push(request_line.to_owned());

            let delay = *self.upload_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.concurrent_uploads.fetch_sub(1, Ordering::SeqCst);
            UPLOAD_KEY_BODY.to_owned()
        } else {
            panic!("unexpected request: {}", request_line);
        };

        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.flush().await;
    }
}

pub async fn read_request(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let mut collected = Vec::new();
    let mut chunk = [0u8; 16384];
    let head_end = loop {
        if let Some(pos) = collected
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
        {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before finishing the request");
        collected.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&collected[..head_end]).into_owned();
    let mut body: Vec<u8> = collected[head_end..].to_vec();

    let content_length = request_header(&head, "content-length")
        .map(|value| value.parse::<usize>().unwrap())
        .unwrap_or(0);
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before finishing the request body");
        body.extend_from_slice(&chunk[..n]);
    }

    (head, body)
}

pub fn request_header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().find_map(|line| {
        let (header_name, value) = line.split_once(':')?;
        header_name
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}

/// 录制全部上传状态事件的测试回调
#[derive(Debug, Default)]
pub struct UploadStatusCollector {
    states: Mutex<Vec<UploadState>>,
    finished: AtomicBool,
    notify: Notify,
}

impl UploadStatusCollector {
    pub fn new() -> Arc<Self> {
        Arc::new(Default::default())
    }

    pub fn record(&self, status: UploadStatus) {
        let terminal = matches!(
            status.state,
            UploadState::Completed { .. } | UploadState::Failed(_)
        );
        self.states.lock().unwrap().push(status.state);
        if terminal {
            self.finished.store(true, Ordering::SeqCst);
            self.notify.notify_one();
        }
    }

    pub async fn wait_terminal(&self) {
        loop {
            if self.finished.load(Ordering::SeqCst) {
                return;
            }
            self.notify.notified().await;
        }
    }

    pub fn states(&self) -> Vec<UploadState> {
        self.states.lock().unwrap().to_owned()
    }

    pub fn state_names(&self) -> Vec<&'static str> {
        self.states()
            .iter()
            .map(|state| match state {
                UploadState::EnqueuedForHashing => "enqueued_for_hashing",
                UploadState::Hashing => "hashing",
                UploadState::EnqueuedForUpload => "enqueued_for_upload",
                UploadState::Uploading => "uploading",
                UploadState::Polling => "polling",
                UploadState::Completed { .. } => "completed",
                UploadState::Failed(_) => "failed",
            })
            .collect()
    }

    pub fn terminal(&self) -> UploadState {
        self.states().last().cloned().expect("no status recorded")
    }
}
