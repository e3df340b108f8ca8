const MAX_STEPPING: u32 = 7;
const BASE_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

fn stepping_min_file_size(stepping: u32) -> u64 {
    if stepping == 0 {
        0
    } else {
        BASE_CHUNK_SIZE << ((stepping - 1) * 2)
    }
}

fn threshold_stepping(filesize: u64) -> u32 {
    let mut stepping = 0;
    while stepping < MAX_STEPPING && filesize >= stepping_min_file_size(stepping + 1) {
        stepping += 1;
    }
    stepping
}

/// 按文件大小给出分块大小
///
/// 四兆以下的文件整体算一块，此后每跨过一档阈值翻一倍，
/// 最大二百五十六兆。
pub fn chunk_max_size(filesize: u64) -> u64 {
    let stepping = threshold_stepping(filesize);
    if stepping == 0 {
        BASE_CHUNK_SIZE
    } else {
        BASE_CHUNK_SIZE << (stepping - 1)
    }
}

/// 把 `[0, filesize)` 从左到右铺成分块区间
///
/// 每个区间为 `[begin, end)`，最后一块截断到文件末尾。
pub fn chunk_ranges(filesize: u64) -> Vec<(u64, u64)> {
    let chunk_size = chunk_max_size(filesize);
    let mut ranges = Vec::new();
    let mut current_end = 0u64;
    let mut current_chunk = 0u64;

    while current_end < filesize {
        let current_start = current_end;
        current_end = (chunk_size * (current_chunk + 1)).min(filesize);
        ranges.push((current_start, current_end));
        current_chunk += 1;
    }

    ranges
}
