use super::{Error, Headers, SharedBuffer, Url};
use std::fmt::Debug;

/// HTTP 响应观察者
///
/// 回调在回调执行器上按以下顺序送达：
/// 零或多次 [`Self::redirect_header_received`]，
/// 恰好一次 [`Self::response_header_received`]，
/// 零或多次 [`Self::response_content_received`]，其中 `start_pos`
/// 依次铺满响应体且互不重叠，
/// 最后恰好一次 [`Self::request_complete`] 或 [`Self::request_error`]。
pub trait ResponseObserver: Debug + Send + Sync + 'static {
    /// 收到重定向响应头
    fn redirect_header_received(&self, _headers: &Headers, _new_url: &Url) {}

    /// 收到最终响应头
    fn response_header_received(&self, _headers: &Headers) {}

    /// 收到响应体数据
    ///
    /// 响应体经过 gzip 解压时 `start_pos` 以解压后的字节计。
    fn response_content_received(&self, _start_pos: u64, _buffer: SharedBuffer) {}

    /// 请求成功结束
    fn request_complete(&self);

    /// 请求以错误结束
    fn request_error(&self, error: Error);
}
