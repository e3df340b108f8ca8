use sha2::{Digest, Sha256};
use std::{fmt::Debug, sync::Mutex};

/// 旁路读取器
///
/// 以只读方式观察下载的每个字节，不影响内容去向。
pub trait DownloadReader: Debug + Send + Sync {
    /// 送入一段下载数据
    fn handle_data(&self, data: &[u8]);
}

/// 计算下载内容 SHA-256 的读取器
#[derive(Debug, Default)]
pub struct Sha256Reader {
    hasher: Mutex<Sha256>,
}

impl Sha256Reader {
    /// 创建读取器
    #[inline]
    pub fn new() -> Self {
        Default::default()
    }

    /// 获取当前已见内容的十六进制摘要
    ///
    /// 可以在任意时刻调用，下载成功后即为完整内容的摘要。
    pub fn hex_digest(&self) -> String {
        let hasher = self.hasher.lock().unwrap().to_owned();
        hex::encode(hasher.finalize())
    }
}

impl DownloadReader for Sha256Reader {
    fn handle_data(&self, data: &[u8]) {
        self.hasher.lock().unwrap().update(data);
    }
}
