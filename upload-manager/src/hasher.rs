use super::{chunking::chunk_ranges, error::UploadErrorKind, UploadError};
use sha2::{Digest, Sha256};
use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    time::SystemTime,
};

const READ_BUFFER_SIZE: usize = 1024 * 8;

/// 一个文件的完整散列结果
#[derive(Debug, Clone)]
pub struct FileHashes {
    /// 本地文件路径
    pub path: PathBuf,
    /// 散列时的文件大小
    pub file_size: u64,
    /// 文件整体的十六进制 SHA-256
    pub hash: String,
    /// 分块区间，`[begin, end)` 铺满整个文件
    pub chunk_ranges: Vec<(u64, u64)>,
    /// 每个分块的十六进制 SHA-256
    pub chunk_hashes: Vec<String>,
}

/// 按分块区间散列整个文件
///
/// 以不超过八千字节的读取顺序扫过文件，同时推进整体散列和
/// 当前分块的散列。每次读取之前和最后一次读取之后都会复查
/// 文件大小和修改时间，发现变化立刻以 `FileModified` 失败。
/// 读取之间主动让出执行器。
pub async fn hash_file(
    path: impl Into<PathBuf>,
    filesize: u64,
    mtime: SystemTime,
) -> Result<FileHashes, UploadError> {
    let path = path.into();
    let ranges = chunk_ranges(filesize);

    let mut file =
        File::open(&path).map_err(|err| UploadError::filesystem("Unable to open file.", err))?;

    let mut whole_hasher = Sha256::new();
    let mut chunk_hasher = Sha256::new();
    let mut chunk_hashes = Vec::with_capacity(ranges.len());
    let mut position = 0u64;
    let mut range_index = 0usize;
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    loop {
        verify_file_unchanged(&path, filesize, mtime)?;

        let read = file
            .read(&mut buffer)
            .map_err(|err| UploadError::filesystem("Error occurred during file read.", err))?;
        if read == 0 {
            break;
        }

        let mut offset = 0usize;
        while offset < read {
            let (_, chunk_end) = *ranges.get(range_index).ok_or_else(|| {
                UploadError::new(
                    UploadErrorKind::FileModified,
                    "File grew past its expected size.",
                )
            })?;
            let take = ((chunk_end - position) as usize).min(read - offset);
            let slice = &buffer[offset..offset + take];
            whole_hasher.update(slice);
            chunk_hasher.update(slice);
            position += take as u64;
            offset += take;

            if position == chunk_end {
                chunk_hashes.push(hex::encode(chunk_hasher.finalize_reset()));
                range_index += 1;
            }
        }

        // 散列不独占执行器。
        tokio::task::yield_now().await;
    }

    verify_file_unchanged(&path, filesize, mtime)?;

    if position != filesize {
        return Err(UploadError::new(
            UploadErrorKind::FileModified,
            "Filesize changed from expected value.",
        ));
    }

    Ok(FileHashes {
        path,
        file_size: filesize,
        hash: hex::encode(whole_hasher.finalize()),
        chunk_ranges: ranges,
        chunk_hashes,
    })
}

fn verify_file_unchanged(
    path: &Path,
    filesize: u64,
    mtime: SystemTime,
) -> Result<(), UploadError> {
    let metadata = std::fs::metadata(path)
        .map_err(|err| UploadError::filesystem("Unable to get file metadata.", err))?;
    let current_mtime = metadata
        .modified()
        .map_err(|err| UploadError::filesystem("Unable to get file mtime.", err))?;

    if current_mtime != mtime {
        return Err(UploadError::new(
            UploadErrorKind::FileModified,
            "Mtime changed from expected value.",
        ));
    }
    if metadata.len() != filesize {
        return Err(UploadError::new(
            UploadErrorKind::FileModified,
            "Filesize changed from expected value.",
        ));
    }
    Ok(())
}
