use super::SharedBuffer;
use std::{fmt, io::Result as IoResult};

/// 请求体数据源
///
/// 以拉取方式逐块提供请求体，总大小必须预先可知。
/// 返回 `None` 表示数据已经取完。
pub trait PostDataPipe: Send + 'static {
    /// 请求体总大小
    fn total_size(&self) -> u64;

    /// 取出下一块数据
    fn next_chunk(&mut self) -> IoResult<Option<SharedBuffer>>;
}

/// 请求体
pub enum RequestBody {
    /// 一次性提供的完整请求体
    Buffer(SharedBuffer),

    /// 拉取式请求体数据源
    Pipe(Box<dyn PostDataPipe>),
}

impl RequestBody {
    /// 请求体总大小
    #[inline]
    pub fn total_size(&self) -> u64 {
        match self {
            Self::Buffer(buffer) => buffer.len() as u64,
            Self::Pipe(pipe) => pipe.total_size(),
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(buffer) => f.debug_tuple("Buffer").field(buffer).finish(),
            Self::Pipe(pipe) => f
                .debug_struct("Pipe")
                .field("total_size", &pipe.total_size())
                .finish(),
        }
    }
}

impl From<SharedBuffer> for RequestBody {
    #[inline]
    fn from(buffer: SharedBuffer) -> Self {
        Self::Buffer(buffer)
    }
}
