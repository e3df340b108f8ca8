use super::DownloadError;
use std::{path::PathBuf, sync::Arc};

/// 下载结果
#[derive(Debug, Clone)]
pub enum SuccessOutcome {
    /// 内容已写入磁盘
    OnDisk(PathBuf),

    /// 内容在内存缓冲中
    InMemory(Arc<Vec<u8>>),

    /// 内容已丢弃
    NoTarget,
}

/// 下载状态事件
///
/// 若干次 `Progress` 之后恰好一次 `Failure` 或 `Success`。
#[derive(Debug, Clone)]
pub enum DownloadStatus {
    /// 已收到的字节数，取每次数据事件的末尾偏移
    Progress {
        /// 最新数据块结束处的偏移
        bytes_read: u64,
    },

    /// 下载失败
    Failure(DownloadError),

    /// 下载成功
    Success(SuccessOutcome),
}
