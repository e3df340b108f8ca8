use super::UploadError;
use std::path::PathBuf;

/// 上传任务的句柄，入队时分配，单调递增
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UploadHandle(pub(crate) u64);

impl UploadHandle {
    /// 获取句柄数值
    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }
}

/// 上传任务的阶段
#[derive(Debug, Clone)]
pub enum UploadState {
    /// 等待散列槽位
    EnqueuedForHashing,

    /// 正在散列
    Hashing,

    /// 等待上传槽位
    EnqueuedForUpload,

    /// 正在上传
    Uploading,

    /// 等待服务端装配
    Polling,

    /// 上传完成
    Completed {
        /// 服务端分配的文件标识
        quickkey: String,
        /// 实际存储的文件名
        filename: Option<String>,
    },

    /// 上传失败
    Failed(UploadError),
}

/// 上传状态事件
#[derive(Debug, Clone)]
pub struct UploadStatus {
    /// 上传任务的句柄
    pub handle: UploadHandle,
    /// 本地文件路径
    pub path: PathBuf,
    /// 当前阶段
    pub state: UploadState,
}

/// 对进行中上传的修改
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadModification {
    /// 取消上传
    Cancel,

    /// 暂停上传
    Pause,
}
