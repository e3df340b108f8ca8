use super::{Error, ErrorKind, Result};
use std::collections::HashMap;

/// 请求头列表
///
/// 保持插入顺序，名称大小写不敏感。
pub type HeaderContainer = Vec<(String, String)>;

/// 已解析的响应头
///
/// 头名称统一转为小写，同名头保留第一次出现的值，
/// 以空白开头的折叠行并入前一个头的值。
#[derive(Debug, Clone)]
pub struct Headers {
    /// 原始响应头文本
    pub raw_headers: String,
    /// HTTP 状态码
    pub status_code: u16,
    /// HTTP 状态描述
    pub status_message: String,
    /// 小写头名称到值的映射
    pub headers: HashMap<String, String>,
}

impl Headers {
    /// 解析响应头文本
    ///
    /// 输入为状态行开始、空行结束的完整响应头。
    pub fn parse(raw_headers: impl Into<String>) -> Result<Self> {
        let raw_headers = raw_headers.into();
        let mut lines = raw_headers.split("\r\n");

        let status_line = lines.next().unwrap_or_default();
        let (status_code, status_message) = parse_status_line(status_line)?;

        let mut headers = HashMap::new();
        let mut last_header_name = String::new();
        for line in lines {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                if last_header_name.is_empty() {
                    return Err(Error::new(
                        ErrorKind::UnparsableHeaders,
                        "Badly formatted headers: continuation before any header",
                    ));
                }
                let value: &mut String = headers
                    .get_mut(&last_header_name)
                    .expect("continued header must exist");
                value.push(' ');
                value.push_str(line.trim());
                continue;
            }

            if let Some(colon) = line.find(':') {
                let name = line[..colon].trim().to_ascii_lowercase();
                let value = line[colon + 1..].trim().to_owned();
                headers.entry(name.clone()).or_insert(value);
                last_header_name = name;
            }
        }

        Ok(Self {
            raw_headers,
            status_code,
            status_message,
            headers,
        })
    }

    /// 按名称查询头的值，名称大小写不敏感
    #[inline]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// 获取 Content-Length 的值
    ///
    /// 头存在但不是十进制无符号整数时返回错误。
    pub fn content_length(&self) -> Result<Option<u64>> {
        match self.get("content-length") {
            None => Ok(None),
            Some(value) => value.parse::<u64>().map(Some).map_err(|_| {
                Error::new(
                    ErrorKind::UnparsableHeaders,
                    format!("Invalid Content-Length: {}", value),
                )
            }),
        }
    }
}

fn parse_status_line(line: &str) -> Result<(u16, String)> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    let code = parts.next().unwrap_or_default();
    let message = parts.next().unwrap_or_default();

    if !version.starts_with("HTTP/") {
        return Err(Error::new(
            ErrorKind::UnparsableHeaders,
            format!("Protocol error while parsing headers: {}", line),
        ));
    }

    let status_code = code.parse::<u16>().ok().filter(|code| (100..=599).contains(code));
    match status_code {
        Some(status_code) => Ok((status_code, message.trim().to_owned())),
        None => Err(Error::new(
            ErrorKind::UnparsableHeaders,
            format!("Invalid status code in status line: {}", line),
        )),
    }
}
