use std::{
    future::Future,
    io::{Error as IoError, ErrorKind as IoErrorKind, Result as IoResult},
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use stratus_http::{Error, ErrorKind};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf},
    net::TcpStream,
    sync::watch,
    time::sleep,
};
use tokio_rustls::client::TlsStream;

// 单次未知长度读取的上限。
pub(crate) const MAX_READ_LENGTH: usize = 1024 * 8;

pub(crate) enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Transport {
    pub(crate) fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<IoResult<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<IoResult<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoResult<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// 带读缓冲的连接
///
/// 读响应头时多读进来的字节保留在缓冲中，供读响应体时优先消费。
pub(crate) struct Connection {
    transport: Transport,
    buffer: Vec<u8>,
}

impl Connection {
    pub(crate) fn new(transport: Transport) -> Self {
        Self {
            transport,
            buffer: Vec::new(),
        }
    }

    pub(crate) fn is_tls(&self) -> bool {
        self.transport.is_tls()
    }

    pub(crate) fn into_plain(self) -> Option<TcpStream> {
        match self.transport {
            Transport::Plain(stream) => Some(stream),
            Transport::Tls(_) => None,
        }
    }

    pub(crate) fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// 取走全部缓冲字节
    pub(crate) fn take_buffered(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// 从底层连接读一次，返回读到的字节数，零表示对端关闭
    ///
    /// TLS 对端不发送 close_notify 直接断开时按到达末尾处理。
    async fn fill(&mut self) -> IoResult<usize> {
        let mut chunk = [0u8; MAX_READ_LENGTH];
        match self.transport.read(&mut chunk).await {
            Ok(n) => {
                self.buffer.extend_from_slice(&chunk[..n]);
                Ok(n)
            }
            Err(err)
                if self.transport.is_tls() && err.kind() == IoErrorKind::UnexpectedEof =>
            {
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }

    /// 读到出现分隔符为止，返回包含分隔符的字节段
    pub(crate) async fn read_until(&mut self, delim: &[u8], limit: usize) -> IoResult<Vec<u8>> {
        let mut searched = 0;
        loop {
            if let Some(pos) = find_from(&self.buffer, delim, searched) {
                let mut taken: Vec<u8> = self.buffer.drain(..pos + delim.len()).collect();
                taken.shrink_to_fit();
                return Ok(taken);
            }
            searched = self.buffer.len().saturating_sub(delim.len() - 1);
            if self.buffer.len() > limit {
                return Err(IoError::new(
                    IoErrorKind::InvalidData,
                    "delimiter not found within limit",
                ));
            }
            if self.fill().await? == 0 {
                return Err(IoError::new(
                    IoErrorKind::UnexpectedEof,
                    "connection closed before delimiter",
                ));
            }
        }
    }

    /// 读取恰好 `n` 个字节，对端提前关闭视为错误
    pub(crate) async fn read_exact_buffered(&mut self, n: usize) -> IoResult<Vec<u8>> {
        while self.buffer.len() < n {
            if self.fill().await? == 0 {
                return Err(IoError::new(
                    IoErrorKind::UnexpectedEof,
                    "connection closed mid read",
                ));
            }
        }
        Ok(self.buffer.drain(..n).collect())
    }

    /// 读取至多 `n` 个字节，仅在对端关闭时提前返回
    pub(crate) async fn read_exact_or_eof(&mut self, n: usize) -> IoResult<Vec<u8>> {
        while self.buffer.len() < n {
            if self.fill().await? == 0 {
                break;
            }
        }
        let take = self.buffer.len().min(n);
        Ok(self.buffer.drain(..take).collect())
    }

    /// 等待下一个字节到达，对端关闭时返回假
    pub(crate) async fn has_more_data(&mut self) -> IoResult<bool> {
        if !self.buffer.is_empty() {
            return Ok(true);
        }
        Ok(self.fill().await? > 0)
    }

    pub(crate) async fn write_all(&mut self, bytes: &[u8]) -> IoResult<()> {
        self.transport.write_all(bytes).await?;
        self.transport.flush().await
    }
}

fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

pub(crate) enum TimedError {
    Timeout,
    Cancelled(Error),
    Io(IoError),
}

impl TimedError {
    pub(crate) fn into_error(self, timeout_reason: &str, kind: ErrorKind, what: &str) -> Error {
        match self {
            Self::Timeout => Error::new(
                ErrorKind::IoTimeout,
                format!("I/O timeout: {}", timeout_reason),
            ),
            Self::Cancelled(error) => error,
            Self::Io(err) => Error::new(kind, format!("{} Error: {}", what, err)),
        }
    }
}

/// 为单项网络操作设置超时，并在取消信号到达时立刻放弃
pub(crate) async fn timed<T>(
    cancel: &mut watch::Receiver<Option<Error>>,
    timeout: Duration,
    fut: impl Future<Output = IoResult<T>>,
) -> Result<T, TimedError> {
    tokio::select! {
        biased;
        _ = cancel.changed() => {
            let error = cancel
                .borrow()
                .clone()
                .unwrap_or_else(|| Error::new(ErrorKind::Cancelled, "Cancelled"));
            Err(TimedError::Cancelled(error))
        }
        result = fut => result.map_err(TimedError::Io),
        _ = sleep(timeout) => Err(TimedError::Timeout),
    }
}
