use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use stratus_http::{Error, Headers, ResponseObserver, SharedBuffer, Url};
use tokio::{runtime::Handle, sync::mpsc};

enum ObserverEvent {
    RedirectHeader(Headers, Url),
    ResponseHeader(Headers),
    Content(u64, SharedBuffer),
    Complete,
    Error(Error),
}

/// 观察者事件的派发句柄
///
/// 回调执行器上有且仅有一个派发任务按发送顺序逐个调用观察者，
/// 终止事件只会被送达一次，此后的事件一律丢弃。
#[derive(Clone)]
pub(crate) struct ObserverHandle {
    tx: mpsc::UnboundedSender<ObserverEvent>,
    terminal: Arc<AtomicBool>,
}

impl ObserverHandle {
    pub(crate) fn spawn(
        observer: Arc<dyn ResponseObserver>,
        callback_runtime: &Handle,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        callback_runtime.spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    ObserverEvent::RedirectHeader(headers, new_url) => {
                        observer.redirect_header_received(&headers, &new_url);
                    }
                    ObserverEvent::ResponseHeader(headers) => {
                        observer.response_header_received(&headers);
                    }
                    ObserverEvent::Content(start_pos, buffer) => {
                        observer.response_content_received(start_pos, buffer);
                    }
                    ObserverEvent::Complete => {
                        observer.request_complete();
                        break;
                    }
                    ObserverEvent::Error(error) => {
                        observer.request_error(error);
                        break;
                    }
                }
            }
        });
        Self {
            tx,
            terminal: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn redirect_header(&self, headers: Headers, new_url: Url) {
        if !self.is_terminated() {
            let _ = self.tx.send(ObserverEvent::RedirectHeader(headers, new_url));
        }
    }

    pub(crate) fn response_header(&self, headers: Headers) {
        if !self.is_terminated() {
            let _ = self.tx.send(ObserverEvent::ResponseHeader(headers));
        }
    }

    pub(crate) fn content(&self, start_pos: u64, buffer: SharedBuffer) {
        if !self.is_terminated() {
            let _ = self.tx.send(ObserverEvent::Content(start_pos, buffer));
        }
    }

    /// 抢占终止权，恰好一个调用方成功
    fn try_claim_terminal(&self) -> bool {
        !self.terminal.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn complete(&self) {
        if self.try_claim_terminal() {
            let _ = self.tx.send(ObserverEvent::Complete);
        }
    }

    pub(crate) fn error(&self, error: Error) {
        if self.try_claim_terminal() {
            let _ = self.tx.send(ObserverEvent::Error(error));
        }
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminal.load(Ordering::SeqCst)
    }
}
