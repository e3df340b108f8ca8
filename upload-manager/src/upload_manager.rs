use super::{
    error::UploadErrorKind,
    state_machine::{MachineEvent, UploadMachine},
    upload_request::UploadRequest,
    upload_status::{UploadHandle, UploadModification, UploadStatus},
    UploadError,
};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
    time::{Duration, Instant},
};
use stratus_apis::{ApiCaller, ApiResult};
use tokio::sync::mpsc;

// 上传动作令牌服务端有效期二十四小时，取四分之三作为本地寿命。
const ACTION_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 3600 / 4 * 3);
const ACTION_TOKEN_RETRY: Duration = Duration::from_secs(15);
const MAX_CONCURRENT_HASHINGS: usize = 2;
const MAX_CONCURRENT_UPLOADS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CountState {
    Idle,
    Hashing,
    Uploading,
}

/// 状态机回报给管理器的事件
#[derive(Debug)]
pub(crate) enum ManagerMsg {
    AddToHash(UploadHandle),
    RemoveToHash(UploadHandle),
    AddToUpload(UploadHandle, String),
    RemoveToUpload(UploadHandle),
    CountState(UploadHandle, CountState),
    Complete(UploadHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenState {
    Invalid,
    Retrieving,
    Error,
    Valid,
}

#[derive(Debug)]
struct TokenCache {
    state: TokenState,
    token: String,
    expires_at: Instant,
}

#[derive(Debug)]
struct MachineEntry {
    events: mpsc::UnboundedSender<MachineEvent>,
    hash: Option<String>,
    count_state: CountState,
    holds_hash_slot: bool,
}

#[derive(Debug)]
struct ManagerState {
    machines: HashMap<UploadHandle, MachineEntry>,
    to_hash: VecDeque<UploadHandle>,
    to_upload: VecDeque<UploadHandle>,
    current_hashings: usize,
    current_uploads: usize,
    enqueued_to_start_hashings: HashSet<UploadHandle>,
    enqueued_to_start_uploads: HashSet<UploadHandle>,
    uploading_hashes: HashSet<String>,
    token: TokenCache,
}

/// 上传管理器
///
/// 负责准入控制、散列与上传的并发上限、相同内容的去重，
/// 以及上传动作令牌的获取和轮换。克隆只复制引用。
/// 释放最后一个引用时，所有进行中的上传都会收到取消错误。
#[derive(Debug, Clone)]
pub struct UploadManager(Arc<UploadManagerInner>);

#[derive(Debug)]
struct UploadManagerInner {
    caller: ApiCaller,
    manager_tx: mpsc::UnboundedSender<ManagerMsg>,
    next_handle: AtomicU64,
    max_concurrent_hashings: usize,
    max_concurrent_uploads: usize,
    action_token_retry: Duration,
    action_token_lifetime: Duration,
    state: Mutex<ManagerState>,
}

impl UploadManager {
    /// 创建上传管理器构建器
    #[inline]
    pub fn builder(caller: ApiCaller) -> UploadManagerBuilder {
        UploadManagerBuilder::new(caller)
    }

    /// 以默认参数创建上传管理器
    #[inline]
    pub fn new(caller: ApiCaller) -> Self {
        Self::builder(caller).build()
    }

    /// 获取 API 调用器
    #[inline]
    pub fn caller(&self) -> &ApiCaller {
        &self.0.caller
    }

    /// 提交一个上传
    ///
    /// 状态回调在回调执行器上送达，准入顺序决定散列顺序。
    pub fn add(
        &self,
        request: UploadRequest,
        status_callback: impl Fn(UploadStatus) + Send + Sync + 'static,
    ) -> UploadHandle {
        let handle = UploadHandle(self.0.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        {
            let mut state = self.0.state.lock().unwrap();
            state.machines.insert(
                handle,
                MachineEntry {
                    events: events_tx,
                    hash: None,
                    count_state: CountState::Idle,
                    holds_hash_slot: false,
                },
            );
        }

        let machine = UploadMachine::new(
            handle,
            request,
            self.0.caller.to_owned(),
            self.0.manager_tx.to_owned(),
            Arc::new(status_callback),
        );
        self.0
            .caller
            .http_config()
            .work_runtime()
            .spawn(machine.run(events_rx));

        UploadManagerInner::tick(&self.0);
        handle
    }

    /// 修改进行中的上传
    ///
    /// 取消或暂停都以对应的错误事件结束该上传。
    pub fn modify(&self, handle: UploadHandle, modification: UploadModification) {
        let sender = {
            let state = self.0.state.lock().unwrap();
            state.machines.get(&handle).map(|entry| entry.events.to_owned())
        };
        if let Some(sender) = sender {
            let error = match modification {
                UploadModification::Cancel => {
                    UploadError::new(UploadErrorKind::Cancelled, "Cancellation requested")
                }
                UploadModification::Pause => {
                    UploadError::new(UploadErrorKind::Paused, "Pause requested.")
                }
            };
            let _ = sender.send(MachineEvent::Error(error));
        }
    }
}

impl UploadManagerInner {
    fn handle_msg(this: &Arc<Self>, msg: ManagerMsg) {
        {
            let mut state = this.state.lock().unwrap();
            match msg {
                ManagerMsg::AddToHash(handle) => state.to_hash.push_back(handle),
                ManagerMsg::RemoveToHash(handle) => state.to_hash.retain(|queued| *queued != handle),
                ManagerMsg::AddToUpload(handle, hash) => {
                    if let Some(entry) = state.machines.get_mut(&handle) {
                        entry.hash = Some(hash);
                    }
                    state.to_upload.push_back(handle);
                }
                ManagerMsg::RemoveToUpload(handle) => {
                    state.to_upload.retain(|queued| *queued != handle)
                }
                ManagerMsg::CountState(handle, new_state) => {
                    let old_state = match state.machines.get(&handle) {
                        Some(entry) => entry.count_state,
                        None => return,
                    };
                    match old_state {
                        CountState::Hashing => state.current_hashings -= 1,
                        CountState::Uploading => state.current_uploads -= 1,
                        CountState::Idle => {}
                    }
                    match new_state {
                        CountState::Hashing => {
                            state.current_hashings += 1;
                            state.enqueued_to_start_hashings.remove(&handle);
                        }
                        CountState::Uploading => {
                            state.current_uploads += 1;
                            state.enqueued_to_start_uploads.remove(&handle);
                        }
                        CountState::Idle => {}
                    }
                    if let Some(entry) = state.machines.get_mut(&handle) {
                        entry.count_state = new_state;
                    }
                }
                ManagerMsg::Complete(handle) => {
                    state.enqueued_to_start_hashings.remove(&handle);
                    state.enqueued_to_start_uploads.remove(&handle);
                    state.to_hash.retain(|queued| *queued != handle);
                    state.to_upload.retain(|queued| *queued != handle);
                    if let Some(entry) = state.machines.remove(&handle) {
                        if entry.holds_hash_slot {
                            if let Some(hash) = entry.hash {
                                state.uploading_hashes.remove(&hash);
                            }
                        }
                    }
                }
            }
        }
        Self::tick(this);
    }

    fn tick(this: &Arc<Self>) {
        Self::tick_start_uploads(this);
        Self::tick_start_hashings(this);
    }

    fn tick_start_hashings(this: &Arc<Self>) {
        let grants = {
            let mut state = this.state.lock().unwrap();
            let mut grants = Vec::new();
            while !state.to_hash.is_empty()
                && state.current_hashings + state.enqueued_to_start_hashings.len()
                    < this.max_concurrent_hashings
            {
                let handle = state.to_hash.pop_front().expect("queue not empty");
                state.enqueued_to_start_hashings.insert(handle);
                if let Some(entry) = state.machines.get(&handle) {
                    grants.push(entry.events.to_owned());
                }
            }
            grants
        };
        // 锁外再触发事件。
        for sender in grants {
            let _ = sender.send(MachineEvent::StartHash);
        }
    }

    fn tick_start_uploads(this: &Arc<Self>) {
        enum Action {
            Nothing,
            FetchToken,
            Grant(mpsc::UnboundedSender<MachineEvent>, String),
        }

        let action = {
            let mut state = this.state.lock().unwrap();
            if state.to_upload.is_empty() {
                Action::Nothing
            } else {
                let now = Instant::now();
                let token = &mut state.token;
                if token.state != TokenState::Valid || token.expires_at < now {
                    match token.state {
                        // 获取失败后先等退避窗口过去。
                        TokenState::Error if now < token.expires_at => Action::Nothing,
                        TokenState::Retrieving => Action::Nothing,
                        _ => {
                            token.state = TokenState::Retrieving;
                            Action::FetchToken
                        }
                    }
                } else if state.current_uploads + state.enqueued_to_start_uploads.len()
                    < this.max_concurrent_uploads
                {
                    let token_value = state.token.token.to_owned();
                    let mut granted = None;
                    // 先来先上传，但相同内容同一时刻只占一个上传槽。
                    for index in 0..state.to_upload.len() {
                        let handle = state.to_upload[index];
                        let hash = state
                            .machines
                            .get(&handle)
                            .and_then(|entry| entry.hash.to_owned());
                        let Some(hash) = hash else { continue };
                        if state.uploading_hashes.contains(&hash) {
                            continue;
                        }
                        state.to_upload.remove(index);
                        state.uploading_hashes.insert(hash);
                        state.enqueued_to_start_uploads.insert(handle);
                        if let Some(entry) = state.machines.get_mut(&handle) {
                            entry.holds_hash_slot = true;
                            granted = Some(entry.events.to_owned());
                        }
                        break;
                    }
                    match granted {
                        Some(sender) => Action::Grant(sender, token_value),
                        None => Action::Nothing,
                    }
                } else {
                    Action::Nothing
                }
            }
        };

        match action {
            Action::Nothing => {}
            Action::Grant(sender, action_token) => {
                let _ = sender.send(MachineEvent::StartUpload { action_token });
            }
            Action::FetchToken => {
                let weak = Arc::downgrade(this);
                let caller = this.caller.to_owned();
                this.caller.http_config().work_runtime().spawn(async move {
                    let result = caller.get_upload_action_token().await;
                    if let Some(inner) = weak.upgrade() {
                        Self::handle_action_token(&inner, result);
                    }
                });
            }
        }
    }

    fn handle_action_token(this: &Arc<Self>, result: ApiResult<String>) {
        match result {
            Ok(token) => {
                let mut state = this.state.lock().unwrap();
                state.token.state = TokenState::Valid;
                state.token.token = token;
                state.token.expires_at = Instant::now() + this.action_token_lifetime;
                drop(state);
                Self::tick(this);
            }
            Err(err) => {
                log::warn!("failed to acquire upload action token: {}", err);
                let retry_at = Instant::now() + this.action_token_retry;
                {
                    let mut state = this.state.lock().unwrap();
                    state.token.state = TokenState::Error;
                    state.token.expires_at = retry_at;
                }
                let weak = Arc::downgrade(this);
                let retry = this.action_token_retry;
                this.caller.http_config().work_runtime().spawn(async move {
                    tokio::time::sleep(retry).await;
                    if let Some(inner) = weak.upgrade() {
                        {
                            let mut state = inner.state.lock().unwrap();
                            if state.token.state == TokenState::Error {
                                state.token.state = TokenState::Invalid;
                                state.token.token.clear();
                            }
                        }
                        Self::tick(&inner);
                    }
                });
            }
        }
    }
}

impl Drop for UploadManagerInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap();
        for entry in state.machines.values() {
            let _ = entry.events.send(MachineEvent::Error(UploadError::new(
                UploadErrorKind::Cancelled,
                "Cancelled due to shutdown.",
            )));
        }
        state.machines.clear();
    }
}

/// 上传管理器构建器
#[derive(Debug)]
pub struct UploadManagerBuilder {
    caller: ApiCaller,
    max_concurrent_hashings: usize,
    max_concurrent_uploads: usize,
    action_token_retry: Duration,
    action_token_lifetime: Duration,
}

impl UploadManagerBuilder {
    /// 创建上传管理器构建器
    #[inline]
    pub fn new(caller: ApiCaller) -> Self {
        Self {
            caller,
            max_concurrent_hashings: MAX_CONCURRENT_HASHINGS,
            max_concurrent_uploads: MAX_CONCURRENT_UPLOADS,
            action_token_retry: ACTION_TOKEN_RETRY,
            action_token_lifetime: ACTION_TOKEN_LIFETIME,
        }
    }

    /// 设置同时进行的散列数上限
    #[inline]
    pub fn max_concurrent_hashings(&mut self, max: usize) -> &mut Self {
        self.max_concurrent_hashings = max.max(1);
        self
    }

    /// 设置同时进行的上传数上限
    #[inline]
    pub fn max_concurrent_uploads(&mut self, max: usize) -> &mut Self {
        self.max_concurrent_uploads = max.max(1);
        self
    }

    /// 设置令牌获取失败后的退避时长
    #[inline]
    pub fn action_token_retry(&mut self, retry: Duration) -> &mut Self {
        self.action_token_retry = retry;
        self
    }

    /// 设置令牌的本地寿命
    #[inline]
    pub fn action_token_lifetime(&mut self, lifetime: Duration) -> &mut Self {
        self.action_token_lifetime = lifetime;
        self
    }

    /// 构建上传管理器
    pub fn build(&mut self) -> UploadManager {
        let (manager_tx, mut manager_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(UploadManagerInner {
            caller: self.caller.to_owned(),
            manager_tx,
            next_handle: AtomicU64::new(0),
            max_concurrent_hashings: self.max_concurrent_hashings,
            max_concurrent_uploads: self.max_concurrent_uploads,
            action_token_retry: self.action_token_retry,
            action_token_lifetime: self.action_token_lifetime,
            state: Mutex::new(ManagerState {
                machines: HashMap::new(),
                to_hash: VecDeque::new(),
                to_upload: VecDeque::new(),
                current_hashings: 0,
                current_uploads: 0,
                enqueued_to_start_hashings: HashSet::new(),
                enqueued_to_start_uploads: HashSet::new(),
                uploading_hashes: HashSet::new(),
                token: TokenCache {
                    state: TokenState::Invalid,
                    token: String::new(),
                    expires_at: Instant::now(),
                },
            }),
        });

        let weak: Weak<UploadManagerInner> = Arc::downgrade(&inner);
        inner.caller.http_config().work_runtime().spawn(async move {
            while let Some(msg) = manager_rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                UploadManagerInner::handle_msg(&inner, msg);
            }
        });

        UploadManager(inner)
    }
}
