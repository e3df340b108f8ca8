use super::{
    filename_from_headers,
    proxy::ObserverProxy,
    writers::{Acceptor, FileWriter, MemoryWriter, NoTargetWriter, UnknownNameFileWriter},
};
use crate::{
    download_config::{DownloadConfig, DownloadTarget, OnExists, PathOrChooser},
    error::DownloadErrorKind,
    readers::DownloadReader,
    DownloadError, DownloadStatus, SuccessOutcome,
};
use std::{
    fmt,
    fs::{File, OpenOptions},
    io::Read,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use stratus_http::{
    Error as HttpError, ErrorKind as HttpErrorKind, Headers, ResponseObserver, SharedBuffer,
};
use stratus_http_client::{HttpConfig, HttpRequest};
use tokio::{runtime::Handle, sync::mpsc};

const READ_BUFFER_SIZE: usize = 1024 * 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unstarted,
    ReadingExistingFile,
    GetResumeResponseHeader,
    DownloadingFull,
    DownloadingFromOffset,
    Failure,
    Success,
}

fn is_terminal(state: State) -> bool {
    matches!(state, State::Failure | State::Success)
}

fn is_downloading(state: State) -> bool {
    matches!(state, State::DownloadingFull | State::DownloadingFromOffset)
}

pub(crate) struct DownloadContainer {
    url: String,
    http_config: HttpConfig,
    inner: Mutex<Inner>,
}

struct Inner {
    state: State,
    target: DownloadTarget,
    readers: Vec<Arc<dyn DownloadReader>>,
    status_tx: mpsc::UnboundedSender<DownloadStatus>,
    http_request: Option<HttpRequest>,
    observer_proxy: Option<Arc<ObserverProxy>>,
    acceptor: Option<Box<dyn Acceptor>>,
    resume_read_bytes: Option<u64>,
    discovered_path: Option<PathBuf>,
    keep_alive: Option<Arc<DownloadContainer>>,
}

impl fmt::Debug for DownloadContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadContainer")
            .field("url", &self.url)
            .finish()
    }
}

impl DownloadContainer {
    pub(crate) fn new(
        url: impl Into<String>,
        config: DownloadConfig,
        status_callback: impl Fn(DownloadStatus) + Send + Sync + 'static,
    ) -> Arc<Self> {
        let status_tx =
            spawn_status_dispatcher(&config.http_config.callback_runtime(), status_callback);
        Arc::new(Self {
            url: url.into(),
            http_config: config.http_config,
            inner: Mutex::new(Inner {
                state: State::Unstarted,
                target: config.target,
                readers: config.readers,
                status_tx,
                http_request: None,
                observer_proxy: None,
                acceptor: None,
                resume_read_bytes: None,
                discovered_path: None,
                keep_alive: None,
            }),
        })
    }

    pub(crate) fn start(self: Arc<Self>) {
        let result = {
            let mut inner = self.inner.lock().unwrap();
            // 终止回调送达前容器持有自身。
            inner.keep_alive = Some(self.to_owned());
            match inner.target.to_owned() {
                DownloadTarget::ContinueToPath { .. } => self.get_ranged_response_header(&mut inner),
                DownloadTarget::WriteToPath { path, on_exists } => {
                    self.start_write_to_path(&mut inner, path, on_exists)
                }
                DownloadTarget::WriteToPathFromHeader { chooser } => self.download_full(
                    &mut inner,
                    Box::new(UnknownNameFileWriter::new(self.url.to_owned(), chooser)),
                ),
                DownloadTarget::WriteToMemory => {
                    self.download_full(&mut inner, Box::new(MemoryWriter::new()))
                }
                DownloadTarget::NoTarget => {
                    self.download_full(&mut inner, Box::new(NoTargetWriter::new()))
                }
            }
        };
        if let Err(error) = result {
            self.fail(error);
        }
    }

    pub(crate) fn cancel(&self) {
        let request = self.inner.lock().unwrap().http_request.to_owned();
        match request {
            Some(request) => request.fail(HttpErrorKind::Cancelled, "Download cancelled"),
            None => self.fail(DownloadError::cancelled()),
        }
    }

    fn get_ranged_response_header(&self, inner: &mut Inner) -> Result<(), DownloadError> {
        inner.state = State::GetResumeResponseHeader;

        let this = inner.keep_alive.to_owned().expect("download started");
        let proxy = ObserverProxy::new(this);
        let request =
            HttpRequest::new(self.http_config.to_owned(), self.url.to_owned(), proxy.to_owned());
        request.set_header("Range", "bytes=0-")?;
        request.set_headers_only(true)?;
        request.start();

        inner.observer_proxy = Some(proxy);
        inner.http_request = Some(request);
        Ok(())
    }

    fn start_write_to_path(
        &self,
        inner: &mut Inner,
        path: PathBuf,
        on_exists: OnExists,
    ) -> Result<(), DownloadError> {
        if on_exists == OnExists::FailIfExisting && path.exists() {
            return Err(DownloadError::new(
                DownloadErrorKind::OverwriteDenied,
                "Download to existing file denied.",
            ));
        }
        let file = File::create(&path)
            .map_err(|err| DownloadError::filesystem("Failed to open file.", err))?;
        self.download_full(inner, Box::new(FileWriter::new(file, path)))
    }

    fn start_continue_to_path(
        &self,
        inner: &mut Inner,
        path: PathBuf,
        remote_filesize: u64,
    ) -> Result<(), DownloadError> {
        inner.discovered_path = Some(path.to_owned());
        let exists = path.exists();
        if exists && !inner.readers.is_empty() {
            // 先把本地已有内容重新过一遍读取器，续传后的散列才完整。
            inner.state = State::ReadingExistingFile;
            inner.resume_read_bytes = Some(0);
            let this = inner.keep_alive.to_owned().expect("download started");
            self.http_config.work_runtime().spawn(async move {
                this.read_existing_file(path, remote_filesize).await;
            });
            Ok(())
        } else if exists {
            self.open_for_append_and_download_range(inner, path, remote_filesize)
        } else {
            let file = File::create(&path)
                .map_err(|err| DownloadError::filesystem("Failed to open file.", err))?;
            self.download_full(inner, Box::new(FileWriter::new(file, path)))
        }
    }

    async fn read_existing_file(self: Arc<Self>, path: PathBuf, remote_filesize: u64) {
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) => {
                self.fail(DownloadError::filesystem("Failed to open file.", err));
                return;
            }
        };
        let mut buffer = [0u8; READ_BUFFER_SIZE];
        loop {
            let result = {
                let mut inner = self.inner.lock().unwrap();
                if inner.state != State::ReadingExistingFile {
                    return;
                }
                match file.read(&mut buffer) {
                    Ok(0) => {
                        Some(self.open_for_append_and_download_range(
                            &mut inner,
                            path.to_owned(),
                            remote_filesize,
                        ))
                    }
                    Ok(n) => {
                        *inner
                            .resume_read_bytes
                            .as_mut()
                            .expect("resume counter initialized") += n as u64;
                        for reader in &inner.readers {
                            reader.handle_data(&buffer[..n]);
                        }
                        None
                    }
                    Err(err) => Some(Err(DownloadError::filesystem(
                        "Error while reading existing file.",
                        err,
                    ))),
                }
            };
            match result {
                Some(Ok(())) => return,
                Some(Err(error)) => {
                    self.fail(error);
                    return;
                }
                // 继续读取，但把执行器让给别的任务。
                None => tokio::task::yield_now().await,
            }
        }
    }

    fn open_for_append_and_download_range(
        &self,
        inner: &mut Inner,
        path: PathBuf,
        remote_filesize: u64,
    ) -> Result<(), DownloadError> {
        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|err| DownloadError::filesystem("Failed to open file.", err))?;
        let local_filesize = file
            .metadata()
            .map_err(|err| DownloadError::filesystem("Failed to read file size.", err))?
            .len();

        if let Some(read_bytes) = inner.resume_read_bytes {
            if read_bytes != local_filesize {
                return Err(DownloadError::new(
                    DownloadErrorKind::ResumedDownloadChangedLocally,
                    "Unexpected filesize in resumed download.",
                ));
            }
        }
        if local_filesize == remote_filesize {
            return Err(DownloadError::new(
                DownloadErrorKind::ResumedDownloadAlreadyDownloaded,
                "Local filesize matches remote filesize.",
            ));
        }
        if local_filesize > remote_filesize {
            return Err(DownloadError::new(
                DownloadErrorKind::ResumedDownloadTooLarge,
                "Local filesize larger than remote filesize.",
            ));
        }

        inner.state = State::DownloadingFromOffset;
        let range = format!("bytes={}-{}", local_filesize, remote_filesize);
        self.download_file(
            inner,
            Box::new(FileWriter::new(file, path)),
            vec![("Range".to_owned(), range)],
        )
    }

    fn download_full(
        &self,
        inner: &mut Inner,
        acceptor: Box<dyn Acceptor>,
    ) -> Result<(), DownloadError> {
        inner.state = State::DownloadingFull;
        self.download_file(inner, acceptor, Vec::new())
    }

    fn download_file(
        &self,
        inner: &mut Inner,
        acceptor: Box<dyn Acceptor>,
        header_pairs: Vec<(String, String)>,
    ) -> Result<(), DownloadError> {
        inner.acceptor = Some(acceptor);

        let this = inner.keep_alive.to_owned().expect("download started");
        let proxy = ObserverProxy::new(this);
        let request =
            HttpRequest::new(self.http_config.to_owned(), self.url.to_owned(), proxy.to_owned());
        for (name, value) in header_pairs {
            request.set_header(name, value)?;
        }
        request.start();

        inner.observer_proxy = Some(proxy);
        inner.http_request = Some(request);
        Ok(())
    }

    fn on_resume_probe_header(
        &self,
        inner: &mut Inner,
        headers: &Headers,
    ) -> Result<(), DownloadError> {
        // 探测结束，与还在收尾的请求脱钩。
        if let Some(proxy) = inner.observer_proxy.take() {
            proxy.reset();
        }
        if let Some(request) = inner.http_request.take() {
            request.cancel();
        }

        if headers.status_code != 200 && headers.status_code != 206 {
            return Err(DownloadError::new(
                DownloadErrorKind::DownloadResumeUnsupported,
                "Improper status code from resume headers.",
            ));
        }

        let (path_or_chooser, expected_size) = match &inner.target {
            DownloadTarget::ContinueToPath {
                path,
                expected_size,
            } => (path.to_owned(), *expected_size),
            _ => {
                return Err(DownloadError::new(
                    DownloadErrorKind::Http(HttpErrorKind::LogicError),
                    "Resume probe without a resume target.",
                ));
            }
        };

        if let Some(accept_ranges) = headers.get("accept-ranges") {
            // 服务端可以不带这个头，但声明 none 就是明确拒绝。
            if accept_ranges == "none" {
                return Err(DownloadError::new(
                    DownloadErrorKind::DownloadResumeUnsupported,
                    "Ranges denied by header.",
                ));
            }
        }

        let content_length = match headers.content_length() {
            Ok(Some(content_length)) => content_length,
            Ok(None) => {
                return Err(DownloadError::new(
                    DownloadErrorKind::DownloadResumeUnsupported,
                    "No content length in response.",
                ));
            }
            Err(err) => {
                return Err(DownloadError::new(
                    DownloadErrorKind::DownloadResumeUnsupported,
                    format!("Improper filesize in resume response headers: {}", err),
                ));
            }
        };

        if let Some(expected_size) = expected_size {
            if expected_size != content_length {
                return Err(DownloadError::new(
                    DownloadErrorKind::ResumedDownloadChangedRemotely,
                    "Unexpected filesize in resumed download.",
                ));
            }
        }

        let path = match path_or_chooser {
            PathOrChooser::Path(path) => path,
            PathOrChooser::Chooser(chooser) => {
                let filename = filename_from_headers(headers);
                chooser(filename.as_deref(), &self.url, headers)?
            }
        };

        self.start_continue_to_path(inner, path, content_length)
    }

    fn fail(&self, error: DownloadError) {
        let mut inner = self.inner.lock().unwrap();
        if is_terminal(inner.state) {
            return;
        }
        inner.state = State::Failure;
        let _ = inner.status_tx.send(DownloadStatus::Failure(error));
        terminate_cleanup(&mut inner);
    }
}

fn spawn_status_dispatcher(
    callback_runtime: &Handle,
    status_callback: impl Fn(DownloadStatus) + Send + Sync + 'static,
) -> mpsc::UnboundedSender<DownloadStatus> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    callback_runtime.spawn(async move {
        while let Some(status) = rx.recv().await {
            let terminal = matches!(
                status,
                DownloadStatus::Failure(_) | DownloadStatus::Success(_)
            );
            status_callback(status);
            // 终止事件之后不再让迟到的事件进入用户代码。
            if terminal {
                break;
            }
        }
    });
    tx
}

fn terminate_cleanup(inner: &mut Inner) {
    if let Some(proxy) = inner.observer_proxy.take() {
        proxy.reset();
    }
    if let Some(request) = inner.http_request.take() {
        request.cancel();
    }
    inner.acceptor = None;
    inner.keep_alive = None;
}

impl ResponseObserver for DownloadContainer {
    fn response_header_received(&self, headers: &Headers) {
        let result = {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                State::GetResumeResponseHeader => self.on_resume_probe_header(&mut inner, headers),
                State::DownloadingFromOffset if headers.status_code != 206 => {
                    Err(DownloadError::new(
                        DownloadErrorKind::Http(HttpErrorKind::BadHttpStatus),
                        format!(
                            "Unexpected HTTP status: {} (expected 206)",
                            headers.status_code
                        ),
                    ))
                }
                State::DownloadingFull if headers.status_code != 200 => Err(DownloadError::new(
                    DownloadErrorKind::Http(HttpErrorKind::BadHttpStatus),
                    format!(
                        "Unexpected HTTP status: {} (expected 200)",
                        headers.status_code
                    ),
                )),
                state if is_downloading(state) => match inner.acceptor.as_mut() {
                    Some(acceptor) => acceptor.response_header_received(headers),
                    None => Ok(()),
                },
                _ => Ok(()),
            }
        };
        if let Err(error) = result {
            self.fail(error);
        }
    }

    fn response_content_received(&self, start_pos: u64, buffer: SharedBuffer) {
        let failure = {
            let mut inner = self.inner.lock().unwrap();
            if !is_downloading(inner.state) {
                return;
            }
            for reader in &inner.readers {
                reader.handle_data(&buffer);
            }
            let result = match inner.acceptor.as_mut() {
                Some(acceptor) => acceptor.content_received(start_pos, &buffer),
                None => Ok(()),
            };
            match result {
                Ok(()) => {
                    let end_byte_pos = start_pos + buffer.len() as u64;
                    let _ = inner.status_tx.send(DownloadStatus::Progress {
                        bytes_read: end_byte_pos,
                    });
                    None
                }
                Err(error) => Some(error),
            }
        };
        if let Some(error) = failure {
            self.fail(error);
        }
    }

    fn request_complete(&self) {
        let failure = {
            let mut inner = self.inner.lock().unwrap();
            if !is_downloading(inner.state) {
                return;
            }
            let result = match inner.acceptor.as_mut() {
                Some(acceptor) => acceptor.complete().map(|()| acceptor.outcome()),
                None => Ok(SuccessOutcome::NoTarget),
            };
            match result {
                Ok(success) => {
                    inner.state = State::Success;
                    let _ = inner.status_tx.send(DownloadStatus::Success(success));
                    terminate_cleanup(&mut inner);
                    None
                }
                Err(error) => Some(error),
            }
        };
        if let Some(error) = failure {
            self.fail(error);
        }
    }

    fn request_error(&self, error: HttpError) {
        {
            let inner = self.inner.lock().unwrap();
            if is_terminal(inner.state) {
                return;
            }
        }
        self.fail(error.into());
    }
}
