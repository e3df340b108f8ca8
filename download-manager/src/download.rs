use super::{detail::DownloadContainer, DownloadConfig, DownloadStatus};
use std::sync::Arc;

/// 进行中的下载
///
/// 释放句柄不会中断下载，需要中断时调用 [`Self::cancel`]。
#[derive(Debug, Clone)]
pub struct Download(Arc<DownloadContainer>);

impl Download {
    /// 取消下载
    ///
    /// 状态回调会恰好收到一次取消错误，之后不再有事件。
    #[inline]
    pub fn cancel(&self) {
        self.0.cancel();
    }
}

/// 启动一个下载
///
/// 内容去向由配置中的目标决定，状态回调在回调执行器上送达，
/// 若干次进度之后恰好一次失败或成功。
pub fn download(
    url: impl Into<String>,
    config: DownloadConfig,
    status_callback: impl Fn(DownloadStatus) + Send + Sync + 'static,
) -> Download {
    let container = DownloadContainer::new(url, config, status_callback);
    container.to_owned().start();
    Download(container)
}
