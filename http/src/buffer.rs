use std::{fmt, ops::Deref, sync::Arc};

/// 引用计数的只读字节缓冲
///
/// 交给引擎后不再可变，克隆只复制引用。
#[derive(Clone)]
pub struct SharedBuffer(Arc<[u8]>);

impl SharedBuffer {
    /// 创建字节缓冲
    #[inline]
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self(data.into().into())
    }

    /// 获取缓冲大小
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 判断缓冲是否为空
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 以字节切片访问缓冲
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for SharedBuffer {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for SharedBuffer {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for SharedBuffer {
    #[inline]
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&[u8]> for SharedBuffer {
    #[inline]
    fn from(data: &[u8]) -> Self {
        Self(data.into())
    }
}

impl From<&str> for SharedBuffer {
    #[inline]
    fn from(data: &str) -> Self {
        Self(data.as_bytes().into())
    }
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer").field("len", &self.len()).finish()
    }
}
