use std::{error, fmt};
use stratus_apis::ApiError;
use stratus_http::ErrorKind as HttpErrorKind;

/// 上传错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum UploadErrorKind {
    /// 不支持空文件
    ZeroByteFile,

    /// 目标文件夹中已有同名文件
    FileExistInFolder,

    /// 云端存储空间不足
    InsufficientCloudStorage,

    /// 散列期间文件被修改
    FileModified,

    /// 文件系统错误
    Filesystem,

    /// 上传被取消
    Cancelled,

    /// 上传被暂停
    Paused,

    /// 使用方式错误
    LogicError,

    /// 响应内容缺失或无法解析
    ContentInvalidData,

    /// 服务端返回的 API 错误码
    Api(i32),

    /// 上传接口返回的负值结果码
    UploadResponse(i32),

    /// HTTP 层错误
    Http(HttpErrorKind),
}

/// 上传错误
///
/// 终止回调总是同时携带错误类型和描述信息
#[derive(Debug, Clone)]
pub struct UploadError {
    kind: UploadErrorKind,
    description: Box<str>,
}

impl UploadError {
    /// 创建上传错误
    #[inline]
    pub fn new(kind: UploadErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into().into_boxed_str(),
        }
    }

    /// 获取错误类型
    #[inline]
    pub fn kind(&self) -> UploadErrorKind {
        self.kind
    }

    /// 获取错误描述
    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }

    pub(crate) fn filesystem(what: &str, err: std::io::Error) -> Self {
        Self::new(
            UploadErrorKind::Filesystem,
            format!("{} Error: {}", what, err),
        )
    }
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.description.fmt(f)
    }
}

impl error::Error for UploadError {}

impl From<ApiError> for UploadError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Http(http_err) => Self::new(
                UploadErrorKind::Http(http_err.kind()),
                http_err.description(),
            ),
            ApiError::Api { code, message } => Self::new(UploadErrorKind::Api(code), message),
            ApiError::UploadResponse(result) => Self::new(
                UploadErrorKind::UploadResponse(result),
                format!("Upload rejected with result {}", result),
            ),
            ApiError::ContentInvalidData(message) => {
                Self::new(UploadErrorKind::ContentInvalidData, message)
            }
            _ => unreachable!("unexpected ApiError variant"),
        }
    }
}
