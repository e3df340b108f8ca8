use super::{
    config::HttpConfig,
    engine::{Machine, ObserverHandle, RequestSettings},
};
use std::{
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};
use stratus_http::{
    Error, ErrorKind, PostDataPipe, RedirectPolicy, RequestBody, ResponseObserver, Result,
    SharedBuffer,
};
use tokio::sync::watch;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// 单次 HTTP 请求
///
/// 创建后先配置再启动，启动后配置一律失败。
/// 请求启动后由工作执行器上的任务推进，句柄释放不影响请求进行，
/// 终止回调送达前引擎始终持有自身。
#[derive(Clone)]
pub struct HttpRequest(Arc<RequestInner>);

struct RequestInner {
    config: HttpConfig,
    url: String,
    observer: Mutex<Option<Arc<dyn ResponseObserver>>>,
    phase: Mutex<Phase>,
    cancel_tx: watch::Sender<Option<Error>>,
}

enum Phase {
    Configuring(RequestSettings),
    Started,
}

impl HttpRequest {
    /// 创建 HTTP 请求
    ///
    /// 默认方法为 `GET`，请求头继承配置中的默认请求头，
    /// 超时六十秒，重定向策略继承配置。
    pub fn new(
        config: HttpConfig,
        url: impl Into<String>,
        observer: Arc<dyn ResponseObserver>,
    ) -> Self {
        let settings = RequestSettings {
            method: "GET".to_owned(),
            headers: config.default_headers().to_owned(),
            body: None,
            timeout: DEFAULT_TIMEOUT,
            redirect_policy: config.redirect_policy(),
            headers_only: false,
        };
        let (cancel_tx, _) = watch::channel(None);
        Self(Arc::new(RequestInner {
            config,
            url: url.into(),
            observer: Mutex::new(Some(observer)),
            phase: Mutex::new(Phase::Configuring(settings)),
            cancel_tx,
        }))
    }

    fn configure<T>(&self, configure: impl FnOnce(&mut RequestSettings) -> T) -> Result<T> {
        let mut phase = self.0.phase.lock().unwrap();
        match &mut *phase {
            Phase::Configuring(settings) => Ok(configure(settings)),
            Phase::Started => Err(Error::new(
                ErrorKind::LogicError,
                "Unable to configure in progress HttpRequest.",
            )),
        }
    }

    /// 设置请求方法
    #[inline]
    pub fn set_method(&self, method: impl Into<String>) -> Result<()> {
        self.configure(|settings| settings.method = method.into())
    }

    /// 设置请求头，同名头按大小写不敏感的规则覆盖
    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let name = name.into();
        let value = value.into();
        self.configure(|settings| {
            if let Some(found) = settings
                .headers
                .iter_mut()
                .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
            {
                found.1 = value;
            } else {
                settings.headers.push((name, value));
            }
        })
    }

    /// 设置完整的请求体
    ///
    /// 请求方法随之变为 `POST`，`Content-Length` 自动设置。
    pub fn set_post_data(&self, data: impl Into<SharedBuffer>) -> Result<()> {
        let data = data.into();
        let size = data.len() as u64;
        self.set_body(RequestBody::Buffer(data), size)
    }

    /// 设置拉取式请求体数据源
    ///
    /// 请求方法随之变为 `POST`，`Content-Length` 自动设置。
    pub fn set_post_data_pipe(&self, pipe: impl PostDataPipe) -> Result<()> {
        let size = pipe.total_size();
        self.set_body(RequestBody::Pipe(Box::new(pipe)), size)
    }

    fn set_body(&self, body: RequestBody, size: u64) -> Result<()> {
        self.set_header("Content-Length", size.to_string())?;
        self.configure(|settings| {
            settings.method = "POST".to_owned();
            settings.body = Some(body);
        })
    }

    /// 设置单次请求的总超时
    #[inline]
    pub fn set_timeout(&self, timeout: Duration) -> Result<()> {
        self.configure(|settings| settings.timeout = timeout)
    }

    /// 覆盖本请求的重定向策略
    #[inline]
    pub fn set_redirect_policy(&self, policy: RedirectPolicy) -> Result<()> {
        self.configure(|settings| settings.redirect_policy = policy)
    }

    /// 只请求响应头
    ///
    /// 最终响应头送达后请求即成功结束，不读取响应体。
    #[inline]
    pub fn set_headers_only(&self, headers_only: bool) -> Result<()> {
        self.configure(|settings| settings.headers_only = headers_only)
    }

    /// 启动请求
    ///
    /// 重复启动没有效果。
    pub fn start(&self) {
        let settings = {
            let mut phase = self.0.phase.lock().unwrap();
            match std::mem::replace(&mut *phase, Phase::Started) {
                Phase::Configuring(settings) => settings,
                Phase::Started => return,
            }
        };
        let observer = self
            .0
            .observer
            .lock()
            .unwrap()
            .take()
            .expect("observer taken only on start");
        let observer = ObserverHandle::spawn(observer, &self.0.config.callback_runtime());
        let machine = Machine::new(
            self.0.config.to_owned(),
            self.0.url.to_owned(),
            settings,
            observer,
            self.0.cancel_tx.subscribe(),
        );
        self.0.config.work_runtime().spawn(machine.run());
    }

    /// 取消请求
    ///
    /// 观察者会恰好收到一次 `Cancelled` 错误事件，之后不再有事件。
    /// 任意线程均可调用。
    #[inline]
    pub fn cancel(&self) {
        self.fail(ErrorKind::Cancelled, "Cancelled");
    }

    /// 以指定错误终止请求
    #[inline]
    pub fn fail(&self, kind: ErrorKind, description: impl Into<String>) {
        self.0
            .cancel_tx
            .send_replace(Some(Error::new(kind, description)));
    }

    /// 获取请求的 URL
    #[inline]
    pub fn url(&self) -> &str {
        &self.0.url
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRequest").field("url", &self.0.url).finish()
    }
}

#[allow(dead_code)]
fn assert_request() {
    use assert_impl::assert_impl;

    assert_impl!(Send: HttpRequest);
    assert_impl!(Sync: HttpRequest);
}
