use super::{
    error::UploadErrorKind,
    hasher::{hash_file, FileHashes},
    upload_manager::{CountState, ManagerMsg},
    upload_request::{OnDuplicateAction, UploadRequest},
    upload_status::{UploadHandle, UploadState, UploadStatus},
    UploadError,
};
use rand::Rng;
use std::{
    fs::File,
    future::Future,
    io::{Read, Result as IoResult, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use stratus_apis::{
    upload::{self, CheckRequest, UploadUrlParams},
    ApiCaller, ApiResult, UploadTarget,
};
use stratus_http::{PostDataPipe, SharedBuffer};
use tokio::{runtime::Handle, sync::mpsc, time::sleep};

const POLL_RETRY_INTERVAL: Duration = Duration::from_secs(1);
const PIPE_CHUNK_SIZE: u64 = 1024 * 8;

/// 注入状态机的外部事件
#[derive(Debug)]
pub(crate) enum MachineEvent {
    StartHash,
    StartUpload { action_token: String },
    Error(UploadError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChunkState {
    NeedsUpload,
    Uploading,
    Uploaded,
}

/// 按服务端位图初始化分块状态
///
/// 字取小端序，字 `w` 的第 `i` 位对应分块 `16w+i`，
/// 超出分块数的位忽略，位图没覆盖到的分块视为未上传。
pub(crate) fn chunk_states_from_bitmap(words: &[u16], chunk_count: usize) -> Vec<ChunkState> {
    let mut states = Vec::with_capacity(chunk_count);
    'words: for word in words {
        let mut mask = 1u16;
        for _ in 0..16 {
            if states.len() == chunk_count {
                break 'words;
            }
            states.push(if word & mask != 0 {
                ChunkState::Uploaded
            } else {
                ChunkState::NeedsUpload
            });
            mask <<= 1;
        }
    }
    while states.len() < chunk_count {
        states.push(ChunkState::NeedsUpload);
    }
    states
}

/// 从文件区间逐块拉取请求体的数据源
struct FileRangePipe {
    file: File,
    remaining: u64,
    total: u64,
}

impl FileRangePipe {
    fn open(path: &Path, begin: u64, end: u64) -> IoResult<Self> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(begin))?;
        Ok(Self {
            file,
            remaining: end - begin,
            total: end - begin,
        })
    }
}

impl PostDataPipe for FileRangePipe {
    fn total_size(&self) -> u64 {
        self.total
    }

    fn next_chunk(&mut self) -> IoResult<Option<SharedBuffer>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let take = self.remaining.min(PIPE_CHUNK_SIZE) as usize;
        let mut buffer = vec![0u8; take];
        self.file.read_exact(&mut buffer)?;
        self.remaining -= take as u64;
        Ok(Some(SharedBuffer::new(buffer)))
    }
}

/// 单个文件的上传状态机
///
/// 事件经由专属通道串行送达，所有状态变化都发生在自己的任务里。
pub(crate) struct UploadMachine {
    handle: UploadHandle,
    path: PathBuf,
    target_name: Option<String>,
    target_folder: UploadTarget,
    on_duplicate: OnDuplicateAction,
    caller: ApiCaller,
    manager: mpsc::UnboundedSender<ManagerMsg>,
    status_tx: mpsc::UnboundedSender<UploadState>,
    count_state: CountState,
    filesize: u64,
    mtime_string: String,
    hashes: Option<FileHashes>,
    chunk_states: Vec<ChunkState>,
    upload_key: String,
}

impl UploadMachine {
    pub(crate) fn new(
        handle: UploadHandle,
        request: UploadRequest,
        caller: ApiCaller,
        manager: mpsc::UnboundedSender<ManagerMsg>,
        status_callback: Arc<dyn Fn(UploadStatus) + Send + Sync>,
    ) -> Self {
        let status_tx = spawn_status_dispatcher(
            &caller.http_config().callback_runtime(),
            handle,
            request.local_file_path.to_owned(),
            status_callback,
        );
        Self {
            handle,
            path: request.local_file_path,
            target_name: request.target_name,
            target_folder: request
                .target_folder
                .unwrap_or_else(|| UploadTarget::ParentFolderKey(String::new())),
            on_duplicate: request.on_duplicate,
            caller,
            manager,
            status_tx,
            count_state: CountState::Idle,
            filesize: 0,
            mtime_string: String::new(),
            hashes: request.known_hashes,
            chunk_states: Vec::new(),
            upload_key: String::new(),
        }
    }

    pub(crate) async fn run(mut self, mut events: mpsc::UnboundedReceiver<MachineEvent>) {
        match self.drive(&mut events).await {
            Ok((quickkey, filename)) => {
                log::debug!("upload complete: {} -> {}", self.path.display(), quickkey);
                self.set_count_state(CountState::Idle);
                self.send_manager(ManagerMsg::Complete(self.handle));
                self.send_status(UploadState::Completed { quickkey, filename });
            }
            Err(error) => {
                log::debug!("upload failed: {} -> {}", self.path.display(), error);
                self.set_count_state(CountState::Idle);
                self.send_manager(ManagerMsg::Complete(self.handle));
                self.send_status(UploadState::Failed(error));
            }
        }
    }

    async fn drive(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<MachineEvent>,
    ) -> Result<(String, Option<String>), UploadError> {
        let metadata = std::fs::metadata(&self.path)
            .map_err(|err| UploadError::filesystem("Filesize unavailable.", err))?;
        self.filesize = metadata.len();
        let mtime = metadata
            .modified()
            .map_err(|err| UploadError::filesystem("Mtime unavailable.", err))?;
        self.mtime_string = upload::format_mtime(mtime);

        if self.filesize == 0 {
            return Err(UploadError::new(
                UploadErrorKind::ZeroByteFile,
                "API does not support empty files",
            ));
        }

        match &self.hashes {
            None => {
                self.send_manager(ManagerMsg::AddToHash(self.handle));
                self.send_status(UploadState::EnqueuedForHashing);
                let granted = wait_for_start_hash(events).await;
                self.send_manager(ManagerMsg::RemoveToHash(self.handle));
                granted?;

                self.set_count_state(CountState::Hashing);
                self.send_status(UploadState::Hashing);
                let path = self.path.to_owned();
                let hashes = tokio::select! {
                    result = hash_file(path, self.filesize, mtime) => result?,
                    error = wait_error(events) => return Err(error),
                };
                self.hashes = Some(hashes);
            }
            Some(hashes) => {
                if hashes.file_size != self.filesize {
                    return Err(UploadError::new(
                        UploadErrorKind::FileModified,
                        "Provided hashes do not match the current file size.",
                    ));
                }
            }
        }

        let hash = self.hashes.as_ref().expect("hashes present").hash.to_owned();
        let chunk_count = self
            .hashes
            .as_ref()
            .expect("hashes present")
            .chunk_ranges
            .len();

        self.send_manager(ManagerMsg::AddToUpload(self.handle, hash.to_owned()));
        self.send_status(UploadState::EnqueuedForUpload);
        let granted = wait_for_start_upload(events).await;
        self.send_manager(ManagerMsg::RemoveToUpload(self.handle));
        let action_token = granted?;

        self.set_count_state(CountState::Uploading);
        self.send_status(UploadState::Uploading);

        let check_request = CheckRequest {
            filename: self.filename(),
            hash: hash.to_owned(),
            size: self.filesize,
            target: self.target_folder.to_owned(),
            resumable: chunk_count > 1,
        };
        let check = select_api(events, self.caller.upload_check(&check_request)).await?;

        if check.file_exists.is_yes() && !check.hash_different.is_yes() {
            if let Some(quickkey) = check.duplicate_quickkey {
                // 同名同内容，云端已经是这个文件了。
                return Ok((quickkey, Some(self.filename())));
            }
        }
        if check.storage_limit_exceeded.is_yes() {
            return Err(UploadError::new(
                UploadErrorKind::InsufficientCloudStorage,
                "Account lacks sufficient storage for upload to cloud",
            ));
        }
        if check.file_exists.is_yes()
            && self.on_duplicate != OnDuplicateAction::Replace
            && self.on_duplicate != OnDuplicateAction::AutoRename
        {
            return Err(UploadError::new(
                UploadErrorKind::FileExistInFolder,
                "File already exists in folder.",
            ));
        }
        if check.hash_exists.is_yes() {
            let instant = select_api(
                events,
                self.caller.upload_instant(
                    &self.filename(),
                    &hash,
                    self.filesize,
                    &self.target_folder,
                    self.on_duplicate == OnDuplicateAction::Replace,
                ),
            )
            .await?;
            return Ok((instant.quickkey, instant.filename));
        }

        let mut resumable = chunk_count > 1;
        if resumable {
            match check.resumable {
                Some(state) if state.number_of_units as usize == chunk_count => {
                    self.chunk_states = chunk_states_from_bitmap(&state.words, chunk_count);
                }
                _ => {
                    log::warn!(
                        "resumable state missing or mismatched for {}, using single upload",
                        self.path.display()
                    );
                    resumable = false;
                }
            }
        }

        if resumable {
            self.upload_chunks(events, &action_token, &hash).await?;
        } else {
            self.upload_simple(events, &action_token).await?;
        }

        self.send_status(UploadState::Polling);
        loop {
            let poll = select_api(events, self.caller.poll_upload(&self.upload_key)).await?;
            if poll.result < 0 {
                return Err(UploadError::new(
                    UploadErrorKind::UploadResponse(poll.result),
                    format!("Upload rejected with result {}", poll.result),
                ));
            }
            if poll.fileerror != 0 {
                return Err(UploadError::new(
                    UploadErrorKind::UploadResponse(poll.fileerror),
                    format!("Upload failed with fileerror {}", poll.fileerror),
                ));
            }
            if poll.status == 99 {
                let quickkey = poll.quickkey.ok_or_else(|| {
                    UploadError::new(
                        UploadErrorKind::ContentInvalidData,
                        "Successful response missing quickkey",
                    )
                })?;
                return Ok((quickkey, poll.filename));
            }
            tokio::select! {
                _ = sleep(POLL_RETRY_INTERVAL) => {}
                error = wait_error(events) => return Err(error),
            }
        }
    }

    async fn upload_simple(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<MachineEvent>,
        action_token: &str,
    ) -> Result<(), UploadError> {
        let url = upload::simple_upload_url(
            self.caller.base_url(),
            &UploadUrlParams {
                action_token,
                mtime: &self.mtime_string,
                replace_duplicate: self.on_duplicate == OnDuplicateAction::Replace,
                target: &self.target_folder,
            },
        );
        let headers = self.common_upload_headers();
        let pipe = FileRangePipe::open(&self.path, 0, self.filesize)
            .map_err(|err| UploadError::filesystem("Unable to open file.", err))?;

        self.upload_key = self.drive_raw_upload(events, url, headers, pipe).await?;
        Ok(())
    }

    async fn upload_chunks(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<MachineEvent>,
        action_token: &str,
        whole_file_hash: &str,
    ) -> Result<(), UploadError> {
        loop {
            let Some(chunk_id) = self.next_chunk_to_upload() else {
                if self.upload_key.is_empty() {
                    // 服务端说全部收到，却没有任何一次上传给出轮询凭据。
                    return Err(UploadError::new(
                        UploadErrorKind::LogicError,
                        "Reached poll upload without upload key",
                    ));
                }
                return Ok(());
            };

            let (begin, end) = self.hashes.as_ref().expect("hashes present").chunk_ranges
                [chunk_id];
            let chunk_hash = self.hashes.as_ref().expect("hashes present").chunk_hashes
                [chunk_id]
                .to_owned();

            let url = upload::resumable_upload_url(
                self.caller.base_url(),
                &UploadUrlParams {
                    action_token,
                    mtime: &self.mtime_string,
                    replace_duplicate: self.on_duplicate == OnDuplicateAction::Replace,
                    target: &self.target_folder,
                },
            );
            let mut headers = self.common_upload_headers();
            headers.push(("x-filehash".to_owned(), whole_file_hash.to_owned()));
            headers.push(("x-unit-hash".to_owned(), chunk_hash));
            headers.push(("x-unit-id".to_owned(), chunk_id.to_string()));
            headers.push(("x-unit-size".to_owned(), (end - begin).to_string()));

            let pipe = FileRangePipe::open(&self.path, begin, end)
                .map_err(|err| UploadError::filesystem("Unable to open file.", err))?;

            self.chunk_states[chunk_id] = ChunkState::Uploading;
            let upload_key = self.drive_raw_upload(events, url, headers, pipe).await?;
            if self.upload_key.is_empty() {
                self.upload_key = upload_key;
            }
            self.chunk_states[chunk_id] = ChunkState::Uploaded;
        }
    }

    async fn drive_raw_upload(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<MachineEvent>,
        url: String,
        headers: Vec<(String, String)>,
        pipe: FileRangePipe,
    ) -> Result<String, UploadError> {
        let call = self.caller.start_raw_upload(url, &headers, pipe)?;
        let request = call.request().to_owned();
        tokio::select! {
            result = call.wait() => result.map_err(Into::into),
            error = wait_error(events) => {
                request.cancel();
                Err(error)
            }
        }
    }

    /// 均匀随机挑一个待上传的分块
    ///
    /// 同一内容被多处同时上传时，随机顺序降低撞车的概率。
    fn next_chunk_to_upload(&self) -> Option<usize> {
        let incomplete: Vec<usize> = self
            .chunk_states
            .iter()
            .enumerate()
            .filter(|(_, state)| **state == ChunkState::NeedsUpload)
            .map(|(chunk_id, _)| chunk_id)
            .collect();
        if incomplete.is_empty() {
            return None;
        }
        let picked = rand::thread_rng().gen_range(0..incomplete.len());
        Some(incomplete[picked])
    }

    fn filename(&self) -> String {
        match &self.target_name {
            Some(name) => name.to_owned(),
            None => self
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    fn common_upload_headers(&self) -> Vec<(String, String)> {
        vec![
            ("x-filename".to_owned(), self.filename()),
            ("x-filesize".to_owned(), self.filesize.to_string()),
        ]
    }

    fn set_count_state(&mut self, count_state: CountState) {
        if self.count_state != count_state {
            self.count_state = count_state;
            self.send_manager(ManagerMsg::CountState(self.handle, count_state));
        }
    }

    fn send_manager(&self, msg: ManagerMsg) {
        let _ = self.manager.send(msg);
    }

    fn send_status(&self, state: UploadState) {
        let _ = self.status_tx.send(state);
    }
}

fn spawn_status_dispatcher(
    callback_runtime: &Handle,
    handle: UploadHandle,
    path: PathBuf,
    status_callback: Arc<dyn Fn(UploadStatus) + Send + Sync>,
) -> mpsc::UnboundedSender<UploadState> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    callback_runtime.spawn(async move {
        while let Some(state) = rx.recv().await {
            status_callback(UploadStatus {
                handle,
                path: path.to_owned(),
                state,
            });
        }
    });
    tx
}

async fn wait_for_start_hash(
    events: &mut mpsc::UnboundedReceiver<MachineEvent>,
) -> Result<(), UploadError> {
    loop {
        match events.recv().await {
            Some(MachineEvent::StartHash) => return Ok(()),
            Some(MachineEvent::Error(error)) => return Err(error),
            Some(_) => continue,
            None => std::future::pending::<()>().await,
        }
    }
}

async fn wait_for_start_upload(
    events: &mut mpsc::UnboundedReceiver<MachineEvent>,
) -> Result<String, UploadError> {
    loop {
        match events.recv().await {
            Some(MachineEvent::StartUpload { action_token }) => return Ok(action_token),
            Some(MachineEvent::Error(error)) => return Err(error),
            Some(_) => continue,
            None => std::future::pending::<()>().await,
        }
    }
}

async fn wait_error(events: &mut mpsc::UnboundedReceiver<MachineEvent>) -> UploadError {
    loop {
        match events.recv().await {
            Some(MachineEvent::Error(error)) => return error,
            Some(_) => continue,
            None => std::future::pending::<()>().await,
        }
    }
}

async fn select_api<T>(
    events: &mut mpsc::UnboundedReceiver<MachineEvent>,
    fut: impl Future<Output = ApiResult<T>>,
) -> Result<T, UploadError> {
    tokio::select! {
        result = fut => result.map_err(Into::into),
        error = wait_error(events) => Err(error),
    }
}
