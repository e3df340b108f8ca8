use stratus_http::Headers;

/// Transfer-Encoding 解析结果
///
/// Content-Length 头的存在视作一种传输边界，与 chunked 互斥。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TransferEncoding {
    pub(crate) chunked: bool,
    pub(crate) gzip: bool,
    pub(crate) content_length: bool,
    pub(crate) unknown: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ContentEncoding {
    pub(crate) gzip: bool,
    pub(crate) unknown: bool,
}

pub(crate) fn parse_transfer_encoding(headers: &Headers) -> TransferEncoding {
    let mut parsed = TransferEncoding {
        content_length: headers.get("content-length").is_some(),
        ..Default::default()
    };

    if let Some(value) = headers.get("transfer-encoding") {
        for token in value.split(',').map(str::trim) {
            match token {
                "chunked" => parsed.chunked = true,
                "gzip" => parsed.gzip = true,
                _ => parsed.unknown = true,
            }
        }
    }

    parsed
}

pub(crate) fn parse_content_encoding(headers: &Headers) -> ContentEncoding {
    let mut parsed = ContentEncoding::default();

    if let Some(value) = headers.get("content-encoding") {
        for token in value.split(',').map(str::trim) {
            match token {
                "gzip" => parsed.gzip = true,
                _ => parsed.unknown = true,
            }
        }
    }

    parsed
}
