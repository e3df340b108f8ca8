use stratus_http::Headers;

/// 从 `Content-Disposition` 中取出文件名
///
/// `filename=` 之后的第一个字符作为界定符，反斜杠转义，
/// 文件名是到下一个未转义界定符为止的子串。
pub(crate) fn filename_from_headers(headers: &Headers) -> Option<String> {
    let value = headers.get("content-disposition")?;
    let bytes = value.as_bytes();

    let id = "filename=";
    let pos = value.find(id)?;
    let delimiter_pos = pos + id.len();
    if delimiter_pos >= bytes.len() {
        return None;
    }

    let delimiter = bytes[delimiter_pos];
    let start_pos = delimiter_pos + 1;
    let mut check_pos = start_pos;
    while check_pos < bytes.len() {
        if bytes[check_pos] == b'\\' {
            check_pos += 1;
        } else if bytes[check_pos] == delimiter {
            return Some(value[start_pos..check_pos].to_owned());
        }
        check_pos += 1;
    }

    None
}
