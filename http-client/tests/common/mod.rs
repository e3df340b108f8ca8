#![allow(dead_code)]

use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};
use stratus_http_client::{Error, ErrorKind, Headers, ResponseObserver, SharedBuffer, Url};
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

/// 读出完整的请求头文本，有请求体时一并读出
pub async fn read_request(stream: &mut TcpStream) -> (String, Vec<u8>) {
    let mut collected = Vec::new();
    let mut chunk = [0u8; 4096];
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

    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().unwrap())
        })
        .unwrap_or(0);
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before finishing the request body");
        body.extend_from_slice(&chunk[..n]);
    }

    (head, body)
}

pub async fn write_response(stream: &mut TcpStream, response: &[u8]) {
    stream.write_all(response).await.unwrap();
    stream.flush().await.unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Redirect(u16, String),
    Header(u16),
    Content(u64, Vec<u8>),
    Complete,
    Error(ErrorKind, String),
}

/// 录制全部观察者事件的测试观察者
#[derive(Debug, Default)]
pub struct Collector {
    events: Mutex<Vec<Event>>,
    finished: AtomicBool,
    notify: Notify,
}

impl Collector {
    pub fn new() -> Arc<Self> {
        Arc::new(Default::default())
    }

    pub async fn wait_terminal(&self) {
        loop {
            if self.finished.load(Ordering::SeqCst) {
                return;
            }
            self.notify.notified().await;
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().to_owned()
    }

    pub fn body(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for event in self.events() {
            if let Event::Content(start_pos, data) = event {
                assert_eq!(
                    start_pos,
                    body.len() as u64,
                    "content must tile without gaps or overlap"
                );
                body.extend_from_slice(&data);
            }
        }
        body
    }

    pub fn terminal(&self) -> Event {
        self.events().last().cloned().expect("no events recorded")
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn finish(&self, event: Event) {
        self.push(event);
        self.finished.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

impl ResponseObserver for Collector {
    fn redirect_header_received(&self, headers: &Headers, new_url: &Url) {
        self.push(Event::Redirect(
            headers.status_code,
            new_url.full_url().to_owned(),
        ));
    }

    fn response_header_received(&self, headers: &Headers) {
        self.push(Event::Header(headers.status_code));
    }

    fn response_content_received(&self, start_pos: u64, buffer: SharedBuffer) {
        self.push(Event::Content(start_pos, buffer.to_vec()));
    }

    fn request_complete(&self) {
        self.finish(Event::Complete);
    }

    fn request_error(&self, error: Error) {
        self.finish(Event::Error(error.kind(), error.to_string()));
    }
}
