use std::{error, fmt};
use stratus_http::{Error as HttpError, ErrorKind as HttpErrorKind};

/// 下载错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DownloadErrorKind {
    /// HTTP 层错误
    Http(HttpErrorKind),

    /// 文件系统错误
    Filesystem,

    /// 服务端不支持断点续传
    DownloadResumeUnsupported,

    /// 续传时远端内容发生变化
    ResumedDownloadChangedRemotely,

    /// 续传时本地文件发生变化
    ResumedDownloadChangedLocally,

    /// 本地文件比远端内容还大
    ResumedDownloadTooLarge,

    /// 本地文件已经完整
    ResumedDownloadAlreadyDownloaded,

    /// 拒绝覆盖已存在的文件
    OverwriteDenied,

    /// 写入目标文件不完整
    IncompleteWrite,

    /// 响应头中没有文件名
    NoFilenameInHeader,
}

/// 下载错误
///
/// 终止回调总是同时携带错误类型和描述信息
#[derive(Debug, Clone)]
pub struct DownloadError {
    kind: DownloadErrorKind,
    description: Box<str>,
}

impl DownloadError {
    /// 创建下载错误
    #[inline]
    pub fn new(kind: DownloadErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into().into_boxed_str(),
        }
    }

    /// 获取错误类型
    #[inline]
    pub fn kind(&self) -> DownloadErrorKind {
        self.kind
    }

    /// 获取错误描述
    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }

    pub(crate) fn cancelled() -> Self {
        Self::new(
            DownloadErrorKind::Http(HttpErrorKind::Cancelled),
            "Download cancelled",
        )
    }

    pub(crate) fn filesystem(what: &str, err: std::io::Error) -> Self {
        Self::new(
            DownloadErrorKind::Filesystem,
            format!("{} Error: {}", what, err),
        )
    }
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.description.fmt(f)
    }
}

impl error::Error for DownloadError {}

impl From<HttpError> for DownloadError {
    #[inline]
    fn from(err: HttpError) -> Self {
        Self::new(DownloadErrorKind::Http(err.kind()), err.description())
    }
}
