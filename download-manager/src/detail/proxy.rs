use std::sync::{Arc, Mutex};
use stratus_http::{Error, Headers, ResponseObserver, SharedBuffer, Url};

/// 可以中途脱钩的观察者转发器
///
/// 下载流程在续传探测后会脱离还在收尾的请求，
/// 脱钩后迟到的回调全部落空。
#[derive(Debug)]
pub(crate) struct ObserverProxy {
    target: Mutex<Option<Arc<dyn ResponseObserver>>>,
}

impl ObserverProxy {
    pub(crate) fn new(target: Arc<dyn ResponseObserver>) -> Arc<Self> {
        Arc::new(Self {
            target: Mutex::new(Some(target)),
        })
    }

    pub(crate) fn reset(&self) {
        *self.target.lock().unwrap() = None;
    }

    fn target(&self) -> Option<Arc<dyn ResponseObserver>> {
        self.target.lock().unwrap().to_owned()
    }
}

impl ResponseObserver for ObserverProxy {
    fn redirect_header_received(&self, headers: &Headers, new_url: &Url) {
        if let Some(target) = self.target() {
            target.redirect_header_received(headers, new_url);
        }
    }

    fn response_header_received(&self, headers: &Headers) {
        if let Some(target) = self.target() {
            target.response_header_received(headers);
        }
    }

    fn response_content_received(&self, start_pos: u64, buffer: SharedBuffer) {
        if let Some(target) = self.target() {
            target.response_content_received(start_pos, buffer);
        }
    }

    fn request_complete(&self) {
        if let Some(target) = self.target() {
            target.request_complete();
        }
    }

    fn request_error(&self, error: Error) {
        if let Some(target) = self.target() {
            target.request_error(error);
        }
    }
}
