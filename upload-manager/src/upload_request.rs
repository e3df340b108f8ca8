use super::hasher::FileHashes;
use std::path::PathBuf;
use stratus_apis::UploadTarget;

/// 目标文件夹已有同名文件时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnDuplicateAction {
    /// 直接失败
    #[default]
    Fail,

    /// 覆盖已有文件
    Replace,

    /// 自动改名
    AutoRename,
}

/// 一次文件上传的描述
#[must_use]
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub(crate) local_file_path: PathBuf,
    pub(crate) target_name: Option<String>,
    pub(crate) target_folder: Option<UploadTarget>,
    pub(crate) on_duplicate: OnDuplicateAction,
    pub(crate) known_hashes: Option<FileHashes>,
}

impl UploadRequest {
    /// 创建指向本地文件的上传描述
    #[inline]
    pub fn new(local_file_path: impl Into<PathBuf>) -> Self {
        Self {
            local_file_path: local_file_path.into(),
            target_name: None,
            target_folder: None,
            on_duplicate: Default::default(),
            known_hashes: None,
        }
    }

    /// 设置云端文件名，不设置时使用本地文件名
    #[inline]
    pub fn target_name(mut self, target_name: impl Into<String>) -> Self {
        self.target_name = Some(target_name.into());
        self
    }

    /// 设置目标文件夹
    #[inline]
    pub fn target_folder(mut self, target_folder: UploadTarget) -> Self {
        self.target_folder = Some(target_folder);
        self
    }

    /// 设置重名时的处理方式
    #[inline]
    pub fn on_duplicate(mut self, on_duplicate: OnDuplicateAction) -> Self {
        self.on_duplicate = on_duplicate;
        self
    }

    /// 提供预先算好的散列，跳过散列阶段
    ///
    /// 散列必须和文件当前内容一致，否则上传结果不可预期。
    #[inline]
    pub fn known_hashes(mut self, hashes: FileHashes) -> Self {
        self.known_hashes = Some(hashes);
        self
    }
}
