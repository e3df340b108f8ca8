#![allow(dead_code)]

use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};
use stratus_download_manager::DownloadStatus;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::Notify,
};

pub async fn start_server<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(TcpStream, usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut connection_index = 0;
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(handler(stream, connection_index));
            connection_index += 1;
        }
    });
    addr
}

pub async fn read_request_head(stream: &mut TcpStream) -> String {
    let mut collected = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(pos) = collected
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
        {
            return String::from_utf8_lossy(&collected[..pos + 4]).into_owned();
        }
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before finishing the request");
        collected.extend_from_slice(&chunk[..n]);
    }
}

pub fn request_header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().find_map(|line| {
        let (header_name, value) = line.split_once(':')?;
        header_name
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}

pub async fn write_response(stream: &mut TcpStream, response: &[u8]) {
    stream.write_all(response).await.unwrap();
    stream.flush().await.unwrap();
}

/// 录制全部状态事件的测试回调
#[derive(Debug, Default)]
pub struct StatusCollector {
    events: Mutex<Vec<DownloadStatus>>,
    finished: AtomicBool,
    notify: Notify,
}

impl StatusCollector {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Default::default())
    }

    pub fn record(&self, status: DownloadStatus) {
        let terminal = matches!(
            status,
            DownloadStatus::Failure(_) | DownloadStatus::Success(_)
        );
        self.events.lock().unwrap().push(status);
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

    pub fn events(&self) -> Vec<DownloadStatus> {
        self.events.lock().unwrap().to_owned()
    }

    pub fn terminal(&self) -> DownloadStatus {
        self.events().last().cloned().expect("no status recorded")
    }

    pub fn terminal_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|status| {
                matches!(
                    status,
                    DownloadStatus::Failure(_) | DownloadStatus::Success(_)
                )
            })
            .count()
    }

    pub fn progress_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|status| matches!(status, DownloadStatus::Progress { .. }))
            .count()
    }
}
