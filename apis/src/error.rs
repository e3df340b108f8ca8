use stratus_http::Error as HttpError;
use thiserror::Error;

/// API 调用错误
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ApiError {
    /// HTTP 传输层错误
    #[error("Http transport error: {0}")]
    Http(#[from] HttpError),

    /// 服务端返回的 API 错误
    #[error("Api error {code}: {message}")]
    Api {
        /// 服务端错误码
        code: i32,
        /// 服务端错误描述
        message: String,
    },

    /// 上传接口返回的负值结果码
    #[error("Upload rejected with result {0}")]
    UploadResponse(i32),

    /// 响应内容缺失或无法解析
    #[error("Invalid content in response: {0}")]
    ContentInvalidData(String),
}

/// API 调用结果
pub type ApiResult<T> = Result<T, ApiError>;
