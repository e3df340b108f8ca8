use super::{ApiError, ApiResult};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use stratus_http::{Error as HttpError, Headers, ResponseObserver, SharedBuffer};
use stratus_http_client::{HttpConfig, HttpRequest};
use tokio::sync::oneshot;

const DEFAULT_BASE_URL: &str = "https://www.stratusdrive.com";

/// 云端 API 调用器
///
/// 持有 HTTP 配置、接口地址和会话令牌，
/// 以表单发起 API 请求并解析 JSON 响应信封。
/// 会话的建立与续期由上层维护，这里只消费令牌。
#[derive(Debug, Clone)]
pub struct ApiCaller(Arc<ApiCallerInner>);

#[derive(Debug)]
struct ApiCallerInner {
    http_config: HttpConfig,
    base_url: String,
    session_token: String,
}

impl ApiCaller {
    /// 创建 API 调用器
    #[inline]
    pub fn new(http_config: HttpConfig, session_token: impl Into<String>) -> Self {
        Self::new_with_base_url(http_config, session_token, DEFAULT_BASE_URL)
    }

    /// 创建指向指定接口地址的 API 调用器
    #[inline]
    pub fn new_with_base_url(
        http_config: HttpConfig,
        session_token: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self(Arc::new(ApiCallerInner {
            http_config,
            session_token: session_token.into(),
            base_url: base_url.into(),
        }))
    }

    /// 获取 HTTP 配置
    #[inline]
    pub fn http_config(&self) -> &HttpConfig {
        &self.0.http_config
    }

    /// 获取接口地址
    #[inline]
    pub fn base_url(&self) -> &str {
        &self.0.base_url
    }

    /// 发起一次 API 调用，返回响应信封内的 `response` 对象
    ///
    /// 参数以表单编码后作为请求体发送，会话令牌和
    /// `response_format=json` 自动附带。
    pub async fn call(&self, path: &str, params: &[(&str, &str)]) -> ApiResult<Value> {
        let url = format!("{}{}", self.0.base_url, path);

        let body = {
            let mut form = form_urlencoded::Serializer::new(String::new());
            for (name, value) in params {
                form.append_pair(name, value);
            }
            if !self.0.session_token.is_empty() {
                form.append_pair("session_token", &self.0.session_token);
            }
            form.append_pair("response_format", "json");
            form.finish().to_owned()
        };

        log::debug!("api call: {} {:?}", path, params);

        let (observer, receiver) = BufferingObserver::new();
        let request = HttpRequest::new(self.0.http_config.to_owned(), url, observer);
        request.set_header("Content-Type", "application/x-www-form-urlencoded")?;
        request.set_post_data(body.as_bytes())?;
        request.start();

        let (_, content) = receiver
            .await
            .map_err(|_| ApiError::ContentInvalidData("response never delivered".to_owned()))??;
        parse_envelope(&content)
    }
}

pub(crate) type BufferedResponse = Result<(Headers, Vec<u8>), HttpError>;

/// 把观察者事件汇成一次性结果的内部观察者
#[derive(Debug)]
pub(crate) struct BufferingObserver {
    headers: Mutex<Option<Headers>>,
    body: Mutex<Vec<u8>>,
    sender: Mutex<Option<oneshot::Sender<BufferedResponse>>>,
}

impl BufferingObserver {
    pub(crate) fn new() -> (Arc<Self>, oneshot::Receiver<BufferedResponse>) {
        let (sender, receiver) = oneshot::channel();
        (
            Arc::new(Self {
                headers: Mutex::new(None),
                body: Mutex::new(Vec::new()),
                sender: Mutex::new(Some(sender)),
            }),
            receiver,
        )
    }

    fn send(&self, response: BufferedResponse) {
        if let Some(sender) = self.sender.lock().unwrap().take() {
            let _ = sender.send(response);
        }
    }
}

impl ResponseObserver for BufferingObserver {
    fn response_header_received(&self, headers: &Headers) {
        *self.headers.lock().unwrap() = Some(headers.to_owned());
    }

    fn response_content_received(&self, _start_pos: u64, buffer: SharedBuffer) {
        self.body.lock().unwrap().extend_from_slice(&buffer);
    }

    fn request_complete(&self) {
        let headers = self.headers.lock().unwrap().take();
        let body = std::mem::take(&mut *self.body.lock().unwrap());
        match headers {
            Some(headers) => self.send(Ok((headers, body))),
            None => self.send(Err(HttpError::new(
                stratus_http::ErrorKind::LogicError,
                "request completed without response headers",
            ))),
        }
    }

    fn request_error(&self, error: HttpError) {
        self.send(Err(error));
    }
}

/// 解析 API 响应信封，失败的调用转成 [`ApiError::Api`]
pub(crate) fn parse_envelope(content: &[u8]) -> ApiResult<Value> {
    let value: Value = serde_json::from_slice(content)
        .map_err(|err| ApiError::ContentInvalidData(format!("bad json: {}", err)))?;
    let response = value
        .get("response")
        .cloned()
        .ok_or_else(|| ApiError::ContentInvalidData("missing response object".to_owned()))?;

    if response.get("result").and_then(Value::as_str) == Some("Error") {
        let code = response
            .get("error")
            .and_then(Value::as_i64)
            .unwrap_or_default() as i32;
        let message = response
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_owned();
        return Err(ApiError::Api { code, message });
    }

    Ok(response)
}
