use super::{super::SelectFilePathCallback, filename_from_headers};
use crate::{error::DownloadErrorKind, DownloadError, SuccessOutcome};
use std::{
    fmt::Debug,
    fs::File,
    io::Write,
    path::PathBuf,
    sync::Arc,
};
use stratus_http::{Headers, SharedBuffer};

/// 下载内容的接收端
///
/// 拒绝内容时返回错误，下载流程随即以该错误终止。
pub(crate) trait Acceptor: Debug + Send {
    fn response_header_received(&mut self, _headers: &Headers) -> Result<(), DownloadError> {
        Ok(())
    }

    fn content_received(
        &mut self,
        start_pos: u64,
        buffer: &SharedBuffer,
    ) -> Result<(), DownloadError>;

    fn complete(&mut self) -> Result<(), DownloadError> {
        Ok(())
    }

    /// 下载成功后给出结果描述
    fn outcome(&mut self) -> SuccessOutcome;
}

/// 写入已打开文件的接收端
#[derive(Debug)]
pub(crate) struct FileWriter {
    file: File,
    path: PathBuf,
}

impl FileWriter {
    pub(crate) fn new(file: File, path: PathBuf) -> Self {
        Self { file, path }
    }
}

impl Acceptor for FileWriter {
    fn content_received(
        &mut self,
        _start_pos: u64,
        buffer: &SharedBuffer,
    ) -> Result<(), DownloadError> {
        self.file.write_all(buffer).map_err(|err| {
            DownloadError::new(
                DownloadErrorKind::IncompleteWrite,
                format!("Failed to write to {}. Error: {}", self.path.display(), err),
            )
        })
    }

    fn complete(&mut self) -> Result<(), DownloadError> {
        self.file.flush().map_err(|err| {
            DownloadError::new(
                DownloadErrorKind::IncompleteWrite,
                format!("Failed to flush {}. Error: {}", self.path.display(), err),
            )
        })
    }

    fn outcome(&mut self) -> SuccessOutcome {
        SuccessOutcome::OnDisk(self.path.to_owned())
    }
}

/// 收集到内存缓冲的接收端
#[derive(Debug, Default)]
pub(crate) struct MemoryWriter {
    buffer: Vec<u8>,
}

impl MemoryWriter {
    pub(crate) fn new() -> Self {
        Default::default()
    }
}

impl Acceptor for MemoryWriter {
    fn content_received(
        &mut self,
        _start_pos: u64,
        buffer: &SharedBuffer,
    ) -> Result<(), DownloadError> {
        self.buffer.extend_from_slice(buffer);
        Ok(())
    }

    fn outcome(&mut self) -> SuccessOutcome {
        SuccessOutcome::InMemory(Arc::new(std::mem::take(&mut self.buffer)))
    }
}

/// 丢弃内容的接收端
#[derive(Debug, Default)]
pub(crate) struct NoTargetWriter;

impl NoTargetWriter {
    pub(crate) fn new() -> Self {
        Default::default()
    }
}

impl Acceptor for NoTargetWriter {
    fn content_received(
        &mut self,
        _start_pos: u64,
        _buffer: &SharedBuffer,
    ) -> Result<(), DownloadError> {
        Ok(())
    }

    fn outcome(&mut self) -> SuccessOutcome {
        SuccessOutcome::NoTarget
    }
}

/// 等响应头确定文件名后才落盘的接收端
pub(crate) struct UnknownNameFileWriter {
    url: String,
    chooser: SelectFilePathCallback,
    writer: Option<FileWriter>,
}

impl UnknownNameFileWriter {
    pub(crate) fn new(url: impl Into<String>, chooser: SelectFilePathCallback) -> Self {
        Self {
            url: url.into(),
            chooser,
            writer: None,
        }
    }
}

impl Debug for UnknownNameFileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnknownNameFileWriter")
            .field("url", &self.url)
            .field("writer", &self.writer)
            .finish()
    }
}

impl Acceptor for UnknownNameFileWriter {
    fn response_header_received(&mut self, headers: &Headers) -> Result<(), DownloadError> {
        let filename = filename_from_headers(headers);
        let path = (self.chooser)(filename.as_deref(), &self.url, headers)?;
        let file = File::create(&path)
            .map_err(|err| DownloadError::filesystem("Failed to open file.", err))?;
        self.writer = Some(FileWriter::new(file, path));
        Ok(())
    }

    fn content_received(
        &mut self,
        start_pos: u64,
        buffer: &SharedBuffer,
    ) -> Result<(), DownloadError> {
        match &mut self.writer {
            Some(writer) => writer.content_received(start_pos, buffer),
            None => Err(DownloadError::new(
                DownloadErrorKind::IncompleteWrite,
                "Content received before the download path was selected.",
            )),
        }
    }

    fn complete(&mut self) -> Result<(), DownloadError> {
        match &mut self.writer {
            Some(writer) => writer.complete(),
            None => Ok(()),
        }
    }

    fn outcome(&mut self) -> SuccessOutcome {
        match &mut self.writer {
            Some(writer) => writer.outcome(),
            None => SuccessOutcome::NoTarget,
        }
    }
}
