use super::{readers::DownloadReader, DownloadError};
use std::{fmt, path::PathBuf, sync::Arc};
use stratus_http::Headers;
use stratus_http_client::HttpConfig;

/// 由响应头和 URL 决定落盘路径的回调
///
/// 参数依次为响应头中解析出的文件名、请求的 URL 和完整响应头。
pub type SelectFilePathCallback =
    Arc<dyn Fn(Option<&str>, &str, &Headers) -> Result<PathBuf, DownloadError> + Send + Sync>;

/// 续传目标，固定路径或由回调决定
#[derive(Clone)]
pub enum PathOrChooser {
    /// 固定的本地路径
    Path(PathBuf),
    /// 收到探测响应后由回调决定路径
    Chooser(SelectFilePathCallback),
}

impl fmt::Debug for PathOrChooser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Chooser(_) => f.write_str("Chooser"),
        }
    }
}

/// 目标路径已存在时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnExists {
    /// 覆盖已有文件
    RewriteIfExisting,
    /// 已有文件时直接失败
    FailIfExisting,
}

/// 下载内容的去向
#[derive(Clone)]
pub enum DownloadTarget {
    /// 断点续传到本地路径
    ///
    /// 先发探测请求取得远端大小，本地已有内容时从末尾继续。
    ContinueToPath {
        /// 本地路径或其选择回调
        path: PathOrChooser,
        /// 调用方预期的远端大小
        expected_size: Option<u64>,
    },

    /// 完整下载到指定路径
    WriteToPath {
        /// 本地路径
        path: PathBuf,
        /// 路径已存在时的处理方式
        on_exists: OnExists,
    },

    /// 完整下载，落盘路径由响应头决定
    WriteToPathFromHeader {
        /// 路径选择回调
        chooser: SelectFilePathCallback,
    },

    /// 下载到内存缓冲
    WriteToMemory,

    /// 丢弃内容，常与读取器搭配使用
    NoTarget,
}

impl fmt::Debug for DownloadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContinueToPath {
                path,
                expected_size,
            } => f
                .debug_struct("ContinueToPath")
                .field("path", path)
                .field("expected_size", expected_size)
                .finish(),
            Self::WriteToPath { path, on_exists } => f
                .debug_struct("WriteToPath")
                .field("path", path)
                .field("on_exists", on_exists)
                .finish(),
            Self::WriteToPathFromHeader { .. } => f.write_str("WriteToPathFromHeader"),
            Self::WriteToMemory => f.write_str("WriteToMemory"),
            Self::NoTarget => f.write_str("NoTarget"),
        }
    }
}

/// 下载配置
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub(crate) http_config: HttpConfig,
    pub(crate) target: DownloadTarget,
    pub(crate) readers: Vec<Arc<dyn DownloadReader>>,
}

impl DownloadConfig {
    /// 创建下载配置构建器
    #[inline]
    pub fn builder(http_config: HttpConfig, target: DownloadTarget) -> DownloadConfigBuilder {
        DownloadConfigBuilder::new(http_config, target)
    }

    /// 创建不带读取器的下载配置
    #[inline]
    pub fn new(http_config: HttpConfig, target: DownloadTarget) -> Self {
        Self::builder(http_config, target).build()
    }
}

/// 下载配置构建器
#[derive(Debug)]
pub struct DownloadConfigBuilder {
    http_config: HttpConfig,
    target: DownloadTarget,
    readers: Vec<Arc<dyn DownloadReader>>,
}

impl DownloadConfigBuilder {
    /// 创建下载配置构建器
    #[inline]
    pub fn new(http_config: HttpConfig, target: DownloadTarget) -> Self {
        Self {
            http_config,
            target,
            readers: Vec::new(),
        }
    }

    /// 追加一个旁路读取器，每个下载字节都会经过它
    ///
    /// 续传时本地已有内容也会按顺序送入，读取器看到的
    /// 字节流等价于完整文件。
    #[inline]
    pub fn add_reader(&mut self, reader: Arc<dyn DownloadReader>) -> &mut Self {
        self.readers.push(reader);
        self
    }

    /// 构建下载配置
    pub fn build(&mut self) -> DownloadConfig {
        DownloadConfig {
            http_config: self.http_config.to_owned(),
            target: self.target.to_owned(),
            readers: self.readers.drain(..).collect(),
        }
    }
}
