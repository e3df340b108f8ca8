use std::{error, fmt, result};

/// HTTP 请求错误类型
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// 非法的 URL
    InvalidUrl,

    /// 不支持的 URL 协议
    UnsupportedScheme,

    /// 不支持的传输编码或内容编码
    UnsupportedEncoding,

    /// 域名解析失败
    UnableToResolve,

    /// 网络连接失败
    UnableToConnect,

    /// 代理连接失败
    UnableToConnectToProxy,

    /// TLS 握手失败
    SslHandshakeFailure,

    /// 网络 I/O 超时
    IoTimeout,

    /// 响应头无法解析
    UnparsableHeaders,

    /// 代理协议错误
    ProxyProtocolFailure,

    /// 非预期的 HTTP 状态码
    BadHttpStatus,

    /// 重定向地址非法
    InvalidRedirectUrl,

    /// 重定向被策略拒绝
    RedirectPermissionDenied,

    /// 解压缩失败
    CompressionFailure,

    /// 读取响应失败
    ReadFailure,

    /// 写入请求失败
    WriteFailure,

    /// 请求体数据源读取失败
    PostInterfaceReadFailure,

    /// 请求被取消
    Cancelled,

    /// 使用方式错误
    LogicError,
}

/// HTTP 请求错误
///
/// 终止回调总是同时携带错误类型和描述信息
#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    description: Box<str>,
}

impl Error {
    /// 创建 HTTP 请求错误
    #[inline]
    pub fn new(kind: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into().into_boxed_str(),
        }
    }

    /// 获取错误类型
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 获取错误描述
    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.description.fmt(f)
    }
}

impl error::Error for Error {}

/// HTTP 请求结果
pub type Result<T> = result::Result<T, Error>;
