//! 上传相关的 API 接口

use super::{
    caller::{parse_envelope, BufferedResponse, BufferingObserver},
    ApiCaller, ApiError, ApiResult,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::time::SystemTime;
use stratus_http::PostDataPipe;
use stratus_http_client::HttpRequest;
use tokio::sync::oneshot;

/// 上传的目标位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadTarget {
    /// 目标文件夹的标识
    ParentFolderKey(String),
    /// 云端路径
    CloudPath(String),
}

impl UploadTarget {
    fn append_query(&self, form: &mut form_urlencoded::Serializer<'_, String>) {
        match self {
            Self::ParentFolderKey(key) => {
                if !key.is_empty() {
                    form.append_pair("folder_key", key);
                }
            }
            Self::CloudPath(path) => {
                form.append_pair("path", path);
            }
        }
    }

    fn append_params<'a>(&'a self, params: &mut Vec<(&'static str, &'a str)>) {
        match self {
            Self::ParentFolderKey(key) => {
                if !key.is_empty() {
                    params.push(("target_parent_folderkey", key));
                }
            }
            Self::CloudPath(path) => {
                params.push(("path", path));
            }
        }
    }
}

/// 布尔标记，服务端以 `yes`/`no` 表示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum YesNo {
    /// 是
    Yes,
    /// 否
    #[default]
    No,
}

impl YesNo {
    /// 是否为 `yes`
    #[inline]
    pub fn is_yes(self) -> bool {
        self == Self::Yes
    }
}

/// `upload/check` 请求参数
#[derive(Debug, Clone)]
pub struct CheckRequest {
    /// 云端文件名
    pub filename: String,
    /// 文件整体的十六进制 SHA-256
    pub hash: String,
    /// 文件大小
    pub size: u64,
    /// 上传目标
    pub target: UploadTarget,
    /// 是否声明分块续传能力
    pub resumable: bool,
}

/// `upload/check` 响应
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckResponse {
    /// 目标文件夹内是否已有同名文件
    #[serde(default)]
    pub file_exists: YesNo,
    /// 同名文件的内容散列是否不同
    #[serde(default)]
    pub hash_different: YesNo,
    /// 同名同内容文件的标识
    #[serde(default)]
    pub duplicate_quickkey: Option<String>,
    /// 云端存储空间是否不足
    #[serde(default)]
    pub storage_limit_exceeded: YesNo,
    /// 服务端是否已经有相同内容
    #[serde(default)]
    pub hash_exists: YesNo,
    /// 分块续传状态
    #[serde(default)]
    pub resumable: Option<ResumableState>,
}

/// 服务端记录的分块接收状态
#[derive(Debug, Clone, Deserialize)]
pub struct ResumableState {
    /// 分块总数
    pub number_of_units: u32,
    /// 小端序位图，字 `w` 的第 `i` 位对应分块 `16w+i`
    #[serde(default)]
    pub words: Vec<u16>,
}

/// `upload/instant` 响应
#[derive(Debug, Clone, Deserialize)]
pub struct InstantResponse {
    /// 新文件的标识
    pub quickkey: String,
    /// 实际存储的文件名
    #[serde(default)]
    pub filename: Option<String>,
}

/// `upload/poll_upload` 响应
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollResponse {
    /// 负值表示失败
    #[serde(default)]
    pub result: i32,
    /// 非零表示文件层面的失败
    #[serde(default)]
    pub fileerror: i32,
    /// 服务端装配进度，`99` 表示完成
    #[serde(default)]
    pub status: i32,
    /// 装配完成后的文件标识
    #[serde(default)]
    pub quickkey: Option<String>,
    /// 实际存储的文件名
    #[serde(default)]
    pub filename: Option<String>,
}

impl ApiCaller {
    /// 调用 `upload/check`，询问服务端该如何上传
    pub async fn upload_check(&self, request: &CheckRequest) -> ApiResult<CheckResponse> {
        let size = request.size.to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("filename", &request.filename),
            ("hash", &request.hash),
            ("size", &size),
        ];
        request.target.append_params(&mut params);
        if request.resumable {
            params.push(("resumable", "yes"));
        }

        let response = self.call("/api/upload/check.php", &params).await?;
        deserialize_response(response)
    }

    /// 调用 `upload/instant`，内容已在服务端时直接落盘
    pub async fn upload_instant(
        &self,
        filename: &str,
        hash: &str,
        size: u64,
        target: &UploadTarget,
        replace_duplicate: bool,
    ) -> ApiResult<InstantResponse> {
        let size = size.to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("filename", filename),
            ("hash", hash),
            ("size", &size),
            (
                "action_on_duplicate",
                if replace_duplicate { "replace" } else { "keep" },
            ),
        ];
        target.append_params(&mut params);

        let response = self.call("/api/upload/instant.php", &params).await?;
        deserialize_response(response)
    }

    /// 调用 `upload/poll_upload`，查询服务端装配进度
    pub async fn poll_upload(&self, upload_key: &str) -> ApiResult<PollResponse> {
        let response = self
            .call("/api/upload/poll_upload.php", &[("key", upload_key)])
            .await?;
        let doupload = response
            .get("doupload")
            .cloned()
            .ok_or_else(|| ApiError::ContentInvalidData("missing doupload".to_owned()))?;
        serde_json::from_value(doupload)
            .map_err(|err| ApiError::ContentInvalidData(format!("bad doupload: {}", err)))
    }
}

fn deserialize_response<T: serde::de::DeserializeOwned>(response: Value) -> ApiResult<T> {
    serde_json::from_value(response)
        .map_err(|err| ApiError::ContentInvalidData(format!("bad response: {}", err)))
}

/// 简单上传和分块上传共用的 URL 参数
#[derive(Debug, Clone)]
pub struct UploadUrlParams<'a> {
    /// 上传动作令牌
    pub action_token: &'a str,
    /// 文件修改时间，`YYYY-MM-DDTHH:MM:SS.mmmZ`
    pub mtime: &'a str,
    /// 重名时是否覆盖
    pub replace_duplicate: bool,
    /// 上传目标
    pub target: &'a UploadTarget,
}

fn upload_url(base_url: &str, path: &str, params: &UploadUrlParams<'_>) -> String {
    let mut form = form_urlencoded::Serializer::new(String::new());
    form.append_pair("session_token", params.action_token);
    form.append_pair("response_format", "json");
    if params.replace_duplicate {
        form.append_pair("action_on_duplicate", "replace");
    }
    form.append_pair("mtime", params.mtime);
    params.target.append_query(&mut form);
    format!("{}{}?{}", base_url, path, form.finish())
}

/// 构造 `upload/simple` 的完整 URL
pub fn simple_upload_url(base_url: &str, params: &UploadUrlParams<'_>) -> String {
    upload_url(base_url, "/api/upload/simple.php", params)
}

/// 构造 `upload/resumable` 的完整 URL
pub fn resumable_upload_url(base_url: &str, params: &UploadUrlParams<'_>) -> String {
    upload_url(base_url, "/api/upload/resumable.php", params)
}

/// 解析 `upload/simple` 和 `upload/resumable` 的响应体
///
/// 成功时返回 `upload_key`，负值结果码转成典型的上传错误。
pub fn parse_upload_response(content: &[u8]) -> ApiResult<String> {
    let response = parse_envelope(content)?;
    let doupload = response.get("doupload");

    if let Some(key) = doupload
        .and_then(|doupload| doupload.get("key"))
        .and_then(Value::as_str)
    {
        return Ok(key.to_owned());
    }

    if let Some(result) = doupload
        .and_then(|doupload| doupload.get("result"))
        .and_then(Value::as_i64)
    {
        return Err(ApiError::UploadResponse(result as i32));
    }

    Err(ApiError::ContentInvalidData(
        "upload response missing upload key".to_owned(),
    ))
}

/// 进行中的原始上传请求
///
/// 简单上传和分块上传的请求体是文件内容本身，
/// 不经过表单信封，由这里直接驱动 HTTP 请求。
#[derive(Debug)]
pub struct RawUploadCall {
    request: HttpRequest,
    receiver: oneshot::Receiver<BufferedResponse>,
}

impl RawUploadCall {
    /// 获取底层 HTTP 请求的句柄，可用于取消
    #[inline]
    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    /// 等待上传结束并解析出 `upload_key`
    pub async fn wait(self) -> ApiResult<String> {
        let (_, content) = self
            .receiver
            .await
            .map_err(|_| ApiError::ContentInvalidData("response never delivered".to_owned()))??;
        parse_upload_response(&content)
    }
}

impl ApiCaller {
    /// 发起一次原始上传
    ///
    /// `url` 由 [`simple_upload_url`] 或 [`resumable_upload_url`] 构造，
    /// 请求体从数据源逐块拉取。
    pub fn start_raw_upload(
        &self,
        url: impl Into<String>,
        headers: &[(String, String)],
        pipe: impl PostDataPipe,
    ) -> ApiResult<RawUploadCall> {
        let (observer, receiver) = BufferingObserver::new();
        let request = HttpRequest::new(self.http_config().to_owned(), url, observer);
        request.set_header("Content-Type", "application/octet-stream")?;
        for (name, value) in headers {
            request.set_header(name.as_str(), value.as_str())?;
        }
        request.set_post_data_pipe(pipe)?;
        request.start();
        Ok(RawUploadCall { request, receiver })
    }
}

/// 把文件修改时间格式化为上传接口要求的形式
pub fn format_mtime(mtime: SystemTime) -> String {
    let datetime: DateTime<Utc> = mtime.into();
    datetime.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}
