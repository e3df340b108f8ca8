use super::{bandwidth::BandwidthMeter, tls};
use once_cell::sync::OnceCell;
use std::{fmt, sync::Arc, time::Duration};
use stratus_http::{HeaderContainer, Proxy, RedirectPolicy, Result, SelfSigned};
use tokio::runtime::{Builder as RuntimeBuilder, Handle, Runtime};
use tokio_rustls::rustls::ClientConfig as TlsClientConfig;

/// 单项网络操作的超时时间
///
/// 读写数据的超时默认跟随单次请求的总超时。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// 域名解析超时
    pub resolve: Duration,
    /// 建立连接超时
    pub connect: Duration,
    /// TLS 握手超时
    pub tls_handshake: Duration,
    /// 代理请求写入超时
    pub proxy_write: Duration,
    /// 代理响应读取超时
    pub proxy_read: Duration,
    /// 数据读写超时，`None` 时使用单次请求的总超时
    pub io: Option<Duration>,
}

impl Default for Timeouts {
    #[inline]
    fn default() -> Self {
        Self {
            resolve: Duration::from_secs(30),
            connect: Duration::from_secs(30),
            tls_handshake: Duration::from_secs(30),
            proxy_write: Duration::from_secs(30),
            proxy_read: Duration::from_secs(30),
            io: None,
        }
    }
}

pub(crate) const USER_AGENT: &str = "HttpRequester";

fn default_headers() -> HeaderContainer {
    vec![
        ("Accept".to_owned(), "*/*".to_owned()),
        ("TE".to_owned(), "trailers".to_owned()),
        ("Accept-Encoding".to_owned(), "gzip".to_owned()),
        ("User-Agent".to_owned(), USER_AGENT.to_owned()),
        ("Connection".to_owned(), "close".to_owned()),
    ]
}

enum RuntimeHolder {
    Owned(Arc<Runtime>),
    External(Handle),
}

impl RuntimeHolder {
    fn handle(&self) -> Handle {
        match self {
            Self::Owned(runtime) => runtime.handle().to_owned(),
            Self::External(handle) => handle.to_owned(),
        }
    }
}

impl fmt::Debug for RuntimeHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owned(_) => f.write_str("RuntimeHolder::Owned"),
            Self::External(_) => f.write_str("RuntimeHolder::External"),
        }
    }
}

/// HTTP 请求的共享配置
///
/// 启动请求后配置不再变化，克隆只复制引用，可安全地在请求间共享。
#[derive(Debug, Clone)]
pub struct HttpConfig(Arc<HttpConfigInner>);

struct HttpConfigInner {
    work_runtime: RuntimeHolder,
    callback_runtime: Option<Handle>,
    http_proxy: Option<Proxy>,
    https_proxy: Option<Proxy>,
    self_signed: SelfSigned,
    redirect_policy: RedirectPolicy,
    default_headers: HeaderContainer,
    bandwidth_usage_percent: u32,
    bandwidth_meter: Option<Arc<dyn BandwidthMeter>>,
    timeouts: Timeouts,
    extra_root_certs_pem: Vec<Vec<u8>>,
    tls_context: OnceCell<Arc<TlsClientConfig>>,
}

impl fmt::Debug for HttpConfigInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConfigInner")
            .field("work_runtime", &self.work_runtime)
            .field("http_proxy", &self.http_proxy)
            .field("https_proxy", &self.https_proxy)
            .field("self_signed", &self.self_signed)
            .field("redirect_policy", &self.redirect_policy)
            .field("default_headers", &self.default_headers)
            .field("bandwidth_usage_percent", &self.bandwidth_usage_percent)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl Default for HttpConfig {
    #[inline]
    fn default() -> Self {
        Self::builder().build()
    }
}

impl HttpConfig {
    /// 创建 HTTP 配置构建器
    #[inline]
    pub fn builder() -> HttpConfigBuilder {
        Default::default()
    }

    /// 以默认参数创建 HTTP 配置
    ///
    /// 未指定工作执行器时会创建一个内部的多线程运行时。
    #[inline]
    pub fn new() -> Self {
        Default::default()
    }

    /// 获取工作执行器
    #[inline]
    pub fn work_runtime(&self) -> Handle {
        self.0.work_runtime.handle()
    }

    /// 获取回调执行器，未设置时与工作执行器相同
    #[inline]
    pub fn callback_runtime(&self) -> Handle {
        self.0
            .callback_runtime
            .to_owned()
            .unwrap_or_else(|| self.work_runtime())
    }

    /// 获取 HTTP 代理
    #[inline]
    pub fn http_proxy(&self) -> Option<&Proxy> {
        self.0.http_proxy.as_ref()
    }

    /// 获取 HTTPS 代理
    #[inline]
    pub fn https_proxy(&self) -> Option<&Proxy> {
        self.0.https_proxy.as_ref()
    }

    /// 获取自签名证书策略
    #[inline]
    pub fn self_signed(&self) -> SelfSigned {
        self.0.self_signed
    }

    /// 获取重定向策略
    #[inline]
    pub fn redirect_policy(&self) -> RedirectPolicy {
        self.0.redirect_policy
    }

    /// 获取默认请求头
    #[inline]
    pub fn default_headers(&self) -> &HeaderContainer {
        &self.0.default_headers
    }

    /// 获取带宽占用百分比
    #[inline]
    pub fn bandwidth_usage_percent(&self) -> u32 {
        self.0.bandwidth_usage_percent
    }

    /// 获取带宽统计接口
    #[inline]
    pub fn bandwidth_meter(&self) -> Option<&Arc<dyn BandwidthMeter>> {
        self.0.bandwidth_meter.as_ref()
    }

    /// 获取单项操作超时配置
    #[inline]
    pub fn timeouts(&self) -> Timeouts {
        self.0.timeouts
    }

    /// 获取 TLS 配置
    ///
    /// 首次访问时从系统信任库和附加的 PEM 证书构建，此后复用。
    pub fn tls_context(&self) -> Result<Arc<TlsClientConfig>> {
        self.0
            .tls_context
            .get_or_try_init(|| {
                tls::build_tls_context(self.0.self_signed, &self.0.extra_root_certs_pem)
            })
            .map(Arc::clone)
    }

    /// 基于当前配置创建可修改的构建器
    ///
    /// 用于为单个请求派生微调过的配置副本。
    pub fn to_builder(&self) -> HttpConfigBuilder {
        HttpConfigBuilder {
            work_runtime: Some(self.0.work_runtime.handle()),
            callback_runtime: self.0.callback_runtime.to_owned(),
            http_proxy: self.0.http_proxy.to_owned(),
            https_proxy: self.0.https_proxy.to_owned(),
            self_signed: self.0.self_signed,
            redirect_policy: self.0.redirect_policy,
            default_headers: self.0.default_headers.to_owned(),
            bandwidth_usage_percent: self.0.bandwidth_usage_percent,
            bandwidth_meter: self.0.bandwidth_meter.to_owned(),
            timeouts: self.0.timeouts,
            extra_root_certs_pem: self.0.extra_root_certs_pem.to_owned(),
        }
    }
}

/// HTTP 配置构建器
#[derive(Debug, Default)]
pub struct HttpConfigBuilder {
    work_runtime: Option<Handle>,
    callback_runtime: Option<Handle>,
    http_proxy: Option<Proxy>,
    https_proxy: Option<Proxy>,
    self_signed: SelfSigned,
    redirect_policy: RedirectPolicy,
    default_headers: HeaderContainer,
    bandwidth_usage_percent: u32,
    bandwidth_meter: Option<Arc<dyn BandwidthMeter>>,
    timeouts: Timeouts,
    extra_root_certs_pem: Vec<Vec<u8>>,
}

impl HttpConfigBuilder {
    /// 设置工作执行器
    #[inline]
    pub fn work_runtime(&mut self, handle: Handle) -> &mut Self {
        self.work_runtime = Some(handle);
        self
    }

    /// 设置回调执行器
    #[inline]
    pub fn callback_runtime(&mut self, handle: Handle) -> &mut Self {
        self.callback_runtime = Some(handle);
        self
    }

    /// 设置 HTTP 代理
    #[inline]
    pub fn http_proxy(&mut self, proxy: Proxy) -> &mut Self {
        self.http_proxy = Some(proxy);
        self
    }

    /// 设置 HTTPS 代理
    #[inline]
    pub fn https_proxy(&mut self, proxy: Proxy) -> &mut Self {
        self.https_proxy = Some(proxy);
        self
    }

    /// 设置自签名证书策略
    #[inline]
    pub fn self_signed(&mut self, self_signed: SelfSigned) -> &mut Self {
        self.self_signed = self_signed;
        self
    }

    /// 设置重定向策略
    #[inline]
    pub fn redirect_policy(&mut self, policy: RedirectPolicy) -> &mut Self {
        self.redirect_policy = policy;
        self
    }

    /// 添加默认请求头，同名头按大小写不敏感的规则覆盖
    pub fn add_default_header(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        let name = name.into();
        let value = value.into();
        if let Some(found) = self
            .default_headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            found.1 = value;
        } else {
            self.default_headers.push((name, value));
        }
        self
    }

    /// 设置带宽占用百分比，取值范围 1 到 100
    #[inline]
    pub fn bandwidth_usage_percent(&mut self, percent: u32) -> &mut Self {
        self.bandwidth_usage_percent = percent.clamp(1, 100);
        self
    }

    /// 设置带宽统计接口
    #[inline]
    pub fn bandwidth_meter(&mut self, meter: impl BandwidthMeter + 'static) -> &mut Self {
        self.bandwidth_meter = Some(Arc::new(meter));
        self
    }

    /// 设置单项操作超时
    #[inline]
    pub fn timeouts(&mut self, timeouts: Timeouts) -> &mut Self {
        self.timeouts = timeouts;
        self
    }

    /// 附加 PEM 格式的信任根证书
    #[inline]
    pub fn add_root_certs_pem(&mut self, pem: impl Into<Vec<u8>>) -> &mut Self {
        self.extra_root_certs_pem.push(pem.into());
        self
    }

    /// 构建 HTTP 配置
    pub fn build(&mut self) -> HttpConfig {
        let work_runtime = match self.work_runtime.take() {
            Some(handle) => RuntimeHolder::External(handle),
            None => RuntimeHolder::Owned(Arc::new(
                RuntimeBuilder::new_multi_thread()
                    .enable_all()
                    .build()
                    .expect("failed to build default work runtime"),
            )),
        };
        let mut default_headers = default_headers();
        for (name, value) in self.default_headers.drain(..) {
            if let Some(found) = default_headers
                .iter_mut()
                .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
            {
                found.1 = value;
            } else {
                default_headers.push((name, value));
            }
        }
        let bandwidth_usage_percent = match self.bandwidth_usage_percent {
            0 => 100,
            percent => percent.clamp(1, 100),
        };
        HttpConfig(Arc::new(HttpConfigInner {
            work_runtime,
            callback_runtime: self.callback_runtime.take(),
            http_proxy: self.http_proxy.take(),
            https_proxy: self.https_proxy.take(),
            self_signed: self.self_signed,
            redirect_policy: self.redirect_policy,
            default_headers,
            bandwidth_usage_percent,
            bandwidth_meter: self.bandwidth_meter.take(),
            timeouts: self.timeouts,
            extra_root_certs_pem: self.extra_root_certs_pem.drain(..).collect(),
            tls_context: OnceCell::new(),
        }))
    }
}

#[allow(dead_code)]
fn assert_config() {
    use assert_impl::assert_impl;

    assert_impl!(Send: HttpConfig);
    assert_impl!(Sync: HttpConfig);
}
