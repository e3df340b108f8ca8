mod conn;
mod encoding;
mod observer;
mod pacing;

pub(crate) use observer::ObserverHandle;

use self::{
    conn::{timed, Connection, Transport, MAX_READ_LENGTH},
    encoding::{parse_content_encoding, parse_transfer_encoding},
    pacing::Pacer,
};
use super::config::{HttpConfig, USER_AGENT};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use flate2::write::GzDecoder;
use std::{
    io::Write,
    net::SocketAddr,
    time::{Duration, Instant},
};
use stratus_http::{
    Error, ErrorKind, HeaderContainer, Headers, PostDataPipe, Proxy, RedirectPolicy,
    RequestBody, SharedBuffer, Url,
};
use tokio::{
    net::{lookup_host, TcpStream},
    sync::watch,
    time::sleep,
};
use tokio_rustls::{rustls::ServerName, TlsConnector};

const MAX_HEADER_LENGTH: usize = 256 * 1024;
const MAX_CHUNK_SIZE_LINE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initializing,
    Resolve,
    Connect,
    ProxyConnect,
    TlsHandshake,
    SendHeader,
    SendBody,
    ReadHeaders,
    ParseHeaders,
    Redirect,
    ReadContent,
    Error,
    FinalError,
    Complete,
}

pub(crate) struct RequestSettings {
    pub(crate) method: String,
    pub(crate) headers: HeaderContainer,
    pub(crate) body: Option<RequestBody>,
    pub(crate) timeout: Duration,
    pub(crate) redirect_policy: RedirectPolicy,
    pub(crate) headers_only: bool,
}

enum AttemptOutcome {
    Redirect(Url),
    Error(Error),
}

enum Body {
    None,
    Buffer(SharedBuffer),
    Pipe(Option<Box<dyn PostDataPipe>>),
}

impl Body {
    fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

pub(crate) struct Machine {
    config: HttpConfig,
    observer: ObserverHandle,
    cancel_rx: watch::Receiver<Option<Error>>,
    method: String,
    headers: HeaderContainer,
    body: Body,
    timeout: Duration,
    redirect_policy: RedirectPolicy,
    headers_only: bool,
    current_url: String,
    deadline: Instant,
    pacer: Pacer,
    conn: Option<Connection>,
}

impl Machine {
    pub(crate) fn new(
        config: HttpConfig,
        url: String,
        settings: RequestSettings,
        observer: ObserverHandle,
        cancel_rx: watch::Receiver<Option<Error>>,
    ) -> Self {
        let pacer = Pacer::new(config.bandwidth_usage_percent());
        let deadline = Instant::now() + settings.timeout;
        let body = match settings.body {
            None => Body::None,
            Some(RequestBody::Buffer(buffer)) => Body::Buffer(buffer),
            Some(RequestBody::Pipe(pipe)) => Body::Pipe(Some(pipe)),
        };
        Self {
            config,
            observer,
            cancel_rx,
            method: settings.method,
            headers: settings.headers,
            body,
            timeout: settings.timeout,
            redirect_policy: settings.redirect_policy,
            headers_only: settings.headers_only,
            current_url: url,
            deadline,
            pacer,
            conn: None,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            match self.attempt().await {
                Ok(()) => {
                    self.enter(State::Complete);
                    self.conn = None;
                    self.observer.complete();
                    return;
                }
                Err(AttemptOutcome::Redirect(new_url)) => {
                    self.enter(State::Redirect);
                    self.conn = None;
                    self.current_url = new_url.full_url().to_owned();
                }
                Err(AttemptOutcome::Error(error)) => {
                    self.enter(State::Error);
                    self.conn = None;
                    if error.kind() == ErrorKind::IoTimeout && Instant::now() < self.deadline {
                        log::warn!(
                            "restarting request after timeout. url: {} error: {}",
                            self.current_url,
                            error
                        );
                        continue;
                    }
                    self.enter(State::FinalError);
                    self.observer.error(error);
                    return;
                }
            }
        }
    }

    fn enter(&self, state: State) {
        log::debug!("{} -> {:?}", self.current_url, state);
    }

    fn io_timeout(&self) -> Duration {
        self.config.timeouts().io.unwrap_or(self.timeout)
    }

    fn cancelled(&mut self) -> Option<Error> {
        self.cancel_rx.borrow().clone()
    }

    fn meter_incoming(&self, bytes: usize, start: Instant) {
        if let Some(meter) = self.config.bandwidth_meter() {
            meter.record_incoming(bytes as u64, start, Instant::now());
        }
    }

    fn meter_outgoing(&self, bytes: usize, start: Instant) {
        if let Some(meter) = self.config.bandwidth_meter() {
            meter.record_outgoing(bytes as u64, start, Instant::now());
        }
    }

    async fn pace(&mut self, io_duration: Duration) -> Result<(), Error> {
        let delay = self.pacer.delay_for(io_duration);
        if delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            biased;
            _ = self.cancel_rx.changed() => {
                let error = self
                    .cancel_rx
                    .borrow()
                    .clone()
                    .unwrap_or_else(|| Error::new(ErrorKind::Cancelled, "Cancelled"));
                Err(error)
            }
            _ = sleep(delay) => Ok(()),
        }
    }

    async fn attempt(&mut self) -> Result<(), AttemptOutcome> {
        // 重定向或重试都从全新的连接开始。
        self.conn = None;
        self.enter(State::Initializing);

        if let Some(error) = self.cancelled() {
            return Err(AttemptOutcome::Error(error));
        }

        let url = Url::parse(&self.current_url).map_err(AttemptOutcome::Error)?;
        let is_tls = match url.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err(AttemptOutcome::Error(Error::new(
                    ErrorKind::UnsupportedScheme,
                    format!("Unsupported scheme: {} Url: {}", other, self.current_url),
                )));
            }
        };
        let proxy = if is_tls {
            self.config.https_proxy().cloned()
        } else {
            self.config.http_proxy().cloned()
        };

        let addrs = self.resolve(&url, is_tls, proxy.as_ref()).await?;
        let stream = self.connect(addrs).await?;
        let mut conn = Connection::new(Transport::Plain(stream));

        let proxy_connect_required = match (&proxy, is_tls) {
            (Some(_), true) => true,
            (Some(proxy), false) => !proxy.username.is_empty(),
            (None, _) => false,
        };
        if proxy_connect_required {
            self.proxy_connect(&mut conn, &url, is_tls, proxy.as_ref().expect("proxy set"))
                .await?;
        }

        if is_tls {
            conn = self.tls_handshake(conn, &url).await?;
        }
        self.conn = Some(conn);

        self.send_header(&url, is_tls, proxy.is_some()).await?;
        if !self.body.is_none() {
            self.send_body().await?;
        }

        let headers = self.read_headers().await?;
        self.enter(State::ParseHeaders);

        match headers.status_code {
            301 | 302 => {
                let new_url = self.handle_redirect(&url, &headers)?;
                return Err(AttemptOutcome::Redirect(new_url));
            }
            303 | 307 | 308 => {
                return Err(AttemptOutcome::Error(Error::new(
                    ErrorKind::BadHttpStatus,
                    format!(
                        "Unsupported redirect status {} from url({})",
                        headers.status_code, self.current_url
                    ),
                )));
            }
            _ => {}
        }

        let content_length = headers
            .content_length()
            .map_err(AttemptOutcome::Error)?;
        self.observer.response_header(headers.clone());

        if self.headers_only {
            return Ok(());
        }

        self.enter(State::ReadContent);
        self.read_content(&headers, content_length).await
    }

    async fn resolve(
        &mut self,
        url: &Url,
        is_tls: bool,
        proxy: Option<&Proxy>,
    ) -> Result<Vec<SocketAddr>, AttemptOutcome> {
        self.enter(State::Resolve);

        let (host, port) = match proxy {
            Some(proxy) => (proxy.host.to_owned(), proxy.port),
            None => (url.host().to_owned(), effective_port(url, is_tls)?),
        };

        let timeout = self.config.timeouts().resolve;
        let addrs = timed(
            &mut self.cancel_rx,
            timeout,
            async move {
                let addrs: Vec<_> = lookup_host((host.as_str(), port)).await?.collect();
                Ok(addrs)
            },
        )
        .await
        .map_err(|err| {
            AttemptOutcome::Error(err.into_error(
                "resolving",
                ErrorKind::UnableToResolve,
                &format!("Failure while resolving url({}).", self.current_url),
            ))
        })?;

        if addrs.is_empty() {
            return Err(AttemptOutcome::Error(Error::new(
                ErrorKind::UnableToResolve,
                format!("No addresses for url({}).", self.current_url),
            )));
        }
        Ok(addrs)
    }

    async fn connect(&mut self, addrs: Vec<SocketAddr>) -> Result<TcpStream, AttemptOutcome> {
        self.enter(State::Connect);

        let timeout = self.config.timeouts().connect;
        timed(&mut self.cancel_rx, timeout, async move {
            let mut last_err = None;
            for addr in addrs {
                match TcpStream::connect(addr).await {
                    Ok(stream) => return Ok(stream),
                    Err(err) => last_err = Some(err),
                }
            }
            Err(last_err.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "no endpoints to try")
            }))
        })
        .await
        .map_err(|err| {
            AttemptOutcome::Error(err.into_error(
                "connect",
                ErrorKind::UnableToConnect,
                &format!("Failure while connecting({}).", self.current_url),
            ))
        })
    }

    async fn proxy_connect(
        &mut self,
        conn: &mut Connection,
        url: &Url,
        is_tls: bool,
        proxy: &Proxy,
    ) -> Result<(), AttemptOutcome> {
        self.enter(State::ProxyConnect);

        let connect_host = format!("{}:{}", url.host(), effective_port(url, is_tls)?);
        let mut request = format!("CONNECT {} HTTP/1.1\r\n", connect_host);
        request.push_str("User-Agent: ");
        request.push_str(USER_AGENT);
        request.push_str("\r\n");
        if !proxy.username.is_empty() {
            request.push_str("Proxy-Authorization: Basic ");
            request.push_str(&proxy_credentials(proxy));
            request.push_str("\r\n");
        }
        request.push_str("\r\n");

        let start = Instant::now();
        let timeouts = self.config.timeouts();
        timed(
            &mut self.cancel_rx,
            timeouts.proxy_write,
            conn.write_all(request.as_bytes()),
        )
        .await
        .map_err(|err| {
            AttemptOutcome::Error(err.into_error(
                "proxy write request",
                ErrorKind::UnableToConnectToProxy,
                &format!("Failure connecting to proxy. Proxy: {}:{}", proxy.host, proxy.port),
            ))
        })?;
        self.meter_outgoing(request.len(), start);

        let start = Instant::now();
        let response = timed(
            &mut self.cancel_rx,
            timeouts.proxy_read,
            conn.read_until(b"\r\n\r\n", MAX_HEADER_LENGTH),
        )
        .await
        .map_err(|err| {
            AttemptOutcome::Error(err.into_error(
                "proxy read response",
                ErrorKind::ProxyProtocolFailure,
                &format!("Failure reading from proxy. Proxy: {}:{}", proxy.host, proxy.port),
            ))
        })?;
        self.meter_incoming(response.len(), start);

        let headers = Headers::parse(String::from_utf8_lossy(&response).into_owned())
            .map_err(|_| {
                AttemptOutcome::Error(Error::new(
                    ErrorKind::ProxyProtocolFailure,
                    "Protocol error while parsing proxy headers.",
                ))
            })?;
        if headers.status_code != 200 {
            return Err(AttemptOutcome::Error(Error::new(
                ErrorKind::ProxyProtocolFailure,
                format!(
                    "Protocol error while parsing proxy headers. HTTP Status: {} {}",
                    headers.status_code, headers.status_message
                ),
            )));
        }
        Ok(())
    }

    async fn tls_handshake(
        &mut self,
        conn: Connection,
        url: &Url,
    ) -> Result<Connection, AttemptOutcome> {
        self.enter(State::TlsHandshake);

        let tls_config = self.config.tls_context().map_err(AttemptOutcome::Error)?;
        let server_name = ServerName::try_from(url.host()).map_err(|_| {
            AttemptOutcome::Error(Error::new(
                ErrorKind::SslHandshakeFailure,
                format!("Invalid server name: {}", url.host()),
            ))
        })?;
        let stream = conn.into_plain().ok_or_else(|| {
            AttemptOutcome::Error(Error::new(
                ErrorKind::LogicError,
                "TLS handshake over an already encrypted stream",
            ))
        })?;

        let connector = TlsConnector::from(tls_config);
        let timeout = self.config.timeouts().tls_handshake;
        let tls_stream = timed(
            &mut self.cancel_rx,
            timeout,
            connector.connect(server_name, stream),
        )
        .await
        .map_err(|err| {
            AttemptOutcome::Error(err.into_error(
                "ssl handshake",
                ErrorKind::SslHandshakeFailure,
                &format!("Failure in SSL handshake({}).", self.current_url),
            ))
        })?;

        Ok(Connection::new(Transport::Tls(Box::new(tls_stream))))
    }

    async fn send_header(
        &mut self,
        url: &Url,
        is_tls: bool,
        using_proxy: bool,
    ) -> Result<(), AttemptOutcome> {
        self.enter(State::SendHeader);

        // 经代理转发时请求行必须携带完整 URL。
        let target = if using_proxy {
            url.full_url()
        } else {
            url.full_path()
        };

        let mut request = format!("{} {} HTTP/1.1\r\n", self.method, target);
        request.push_str("Host: ");
        request.push_str(url.host());
        request.push_str("\r\n");

        if !is_tls && using_proxy {
            if let Some(proxy) = self.config.http_proxy() {
                if !proxy.username.is_empty() {
                    request.push_str("Proxy-Authorization: Basic ");
                    request.push_str(&proxy_credentials(proxy));
                    request.push_str("\r\n");
                }
            }
        }

        for (name, value) in &self.headers {
            // Accept-Encoding 不在 TLS 连接上发送，见 BREACH。
            if is_tls && name.eq_ignore_ascii_case("accept-encoding") {
                continue;
            }
            request.push_str(name);
            request.push_str(": ");
            request.push_str(value);
            request.push_str("\r\n");
        }
        request.push_str("\r\n");

        let start = Instant::now();
        let timeout = self.io_timeout();
        let conn = self.conn.as_mut().expect("connected");
        timed(&mut self.cancel_rx, timeout, conn.write_all(request.as_bytes()))
            .await
            .map_err(|err| {
                AttemptOutcome::Error(err.into_error(
                    "write request header",
                    ErrorKind::WriteFailure,
                    &format!("Failure while writing headers url({}).", self.current_url),
                ))
            })?;
        self.meter_outgoing(request.len(), start);
        Ok(())
    }

    async fn send_body(&mut self) -> Result<(), AttemptOutcome> {
        self.enter(State::SendBody);

        let timeout = self.io_timeout();
        let mut written = 0u64;

        match std::mem::replace(&mut self.body, Body::None) {
            Body::None => unreachable!("send_body called without body"),
            Body::Buffer(buffer) => {
                let total = buffer.len() as u64;
                let mut offset = 0usize;
                while offset < buffer.len() {
                    let end = (offset + MAX_READ_LENGTH).min(buffer.len());
                    let start = Instant::now();
                    let conn = self.conn.as_mut().expect("connected");
                    timed(&mut self.cancel_rx, timeout, conn.write_all(&buffer[offset..end]))
                        .await
                        .map_err(|err| {
                            AttemptOutcome::Error(err.into_error(
                                "write request post",
                                ErrorKind::WriteFailure,
                                &format!(
                                    "Failure while writing request body url({}).",
                                    self.current_url
                                ),
                            ))
                        })?;
                    self.meter_outgoing(end - offset, start);
                    written += (end - offset) as u64;
                    offset = end;
                    self.pace(start.elapsed())
                        .await
                        .map_err(AttemptOutcome::Error)?;
                }
                // 重试时可以重新发送同一块缓冲。
                self.body = Body::Buffer(buffer);
                debug_assert_eq!(written, total);
                Ok(())
            }
            Body::Pipe(None) => Err(AttemptOutcome::Error(Error::new(
                ErrorKind::PostInterfaceReadFailure,
                "Request body source cannot be replayed.",
            ))),
            Body::Pipe(Some(mut pipe)) => {
                self.body = Body::Pipe(None);
                let total = pipe.total_size();
                loop {
                    let chunk = pipe.next_chunk().map_err(|err| {
                        AttemptOutcome::Error(Error::new(
                            ErrorKind::PostInterfaceReadFailure,
                            format!("Failure to retrieve POST data from interface. Error: {}", err),
                        ))
                    })?;
                    let chunk = match chunk {
                        Some(chunk) if !chunk.is_empty() => chunk,
                        _ => break,
                    };
                    let start = Instant::now();
                    let conn = self.conn.as_mut().expect("connected");
                    timed(&mut self.cancel_rx, timeout, conn.write_all(&chunk))
                        .await
                        .map_err(|err| {
                            AttemptOutcome::Error(err.into_error(
                                "write request post",
                                ErrorKind::WriteFailure,
                                &format!(
                                    "Failure while writing request body url({}).",
                                    self.current_url
                                ),
                            ))
                        })?;
                    self.meter_outgoing(chunk.len(), start);
                    written += chunk.len() as u64;
                    self.pace(start.elapsed())
                        .await
                        .map_err(AttemptOutcome::Error)?;
                }
                if written != total {
                    return Err(AttemptOutcome::Error(Error::new(
                        ErrorKind::PostInterfaceReadFailure,
                        format!(
                            "Request body source ended early. Sent: {} Expected: {}",
                            written, total
                        ),
                    )));
                }
                Ok(())
            }
        }
    }

    async fn read_headers(&mut self) -> Result<Headers, AttemptOutcome> {
        self.enter(State::ReadHeaders);

        let timeout = self.io_timeout();
        let start = Instant::now();
        let conn = self.conn.as_mut().expect("connected");
        let raw = timed(
            &mut self.cancel_rx,
            timeout,
            conn.read_until(b"\r\n\r\n", MAX_HEADER_LENGTH),
        )
        .await
        .map_err(|err| {
            AttemptOutcome::Error(err.into_error(
                "read response header",
                ErrorKind::ReadFailure,
                &format!("Failure while reading headers url({}).", self.current_url),
            ))
        })?;
        self.meter_incoming(raw.len(), start);

        Headers::parse(String::from_utf8_lossy(&raw).into_owned()).map_err(AttemptOutcome::Error)
    }

    fn handle_redirect(&self, url: &Url, headers: &Headers) -> Result<Url, AttemptOutcome> {
        let location = headers.get("location").ok_or_else(|| {
            AttemptOutcome::Error(Error::new(
                ErrorKind::InvalidRedirectUrl,
                format!("Redirect response without location url({}).", self.current_url),
            ))
        })?;
        let new_url = url.from_redirect(location).map_err(|_| {
            AttemptOutcome::Error(Error::new(
                ErrorKind::InvalidRedirectUrl,
                format!("Invalid redirect location: {}", location),
            ))
        })?;

        match self.redirect_policy {
            RedirectPolicy::Deny => {
                return Err(AttemptOutcome::Error(Error::new(
                    ErrorKind::RedirectPermissionDenied,
                    format!("Redirect denied by policy url({}).", self.current_url),
                )));
            }
            RedirectPolicy::DenyDowngrade => {
                if url.scheme() == "https" && new_url.scheme() == "http" {
                    return Err(AttemptOutcome::Error(Error::new(
                        ErrorKind::RedirectPermissionDenied,
                        format!(
                            "Redirect downgrade denied by policy url({}) location({}).",
                            self.current_url, location
                        ),
                    )));
                }
            }
            RedirectPolicy::Allow => {}
        }

        self.observer.redirect_header(headers.clone(), new_url.clone());
        Ok(new_url)
    }

    async fn read_content(
        &mut self,
        headers: &Headers,
        content_length: Option<u64>,
    ) -> Result<(), AttemptOutcome> {
        let transfer_encoding = parse_transfer_encoding(headers);
        let mut content_encoding = parse_content_encoding(headers);
        // gzip 允许出现在任一编码头中，只解压一次。
        content_encoding.gzip |= transfer_encoding.gzip;

        if transfer_encoding.unknown {
            return Err(AttemptOutcome::Error(Error::new(
                ErrorKind::UnsupportedEncoding,
                format!(
                    "Unsupported transfer-encoding. Transfer-Encoding: {}",
                    headers.get("transfer-encoding").unwrap_or_default()
                ),
            )));
        }
        if content_encoding.unknown {
            return Err(AttemptOutcome::Error(Error::new(
                ErrorKind::UnsupportedEncoding,
                format!(
                    "Unsupported content-encoding. Content-Encoding: {}",
                    headers.get("content-encoding").unwrap_or_default()
                ),
            )));
        }
        if transfer_encoding.chunked && transfer_encoding.content_length {
            return Err(AttemptOutcome::Error(Error::new(
                ErrorKind::UnsupportedEncoding,
                "Unable to handle chunked encoding and content length. \
                 Violates RFC 2616, Section 4.4",
            )));
        }

        let mut sink = ContentSink::new(content_encoding.gzip, self.observer.clone());
        if transfer_encoding.chunked {
            self.read_chunked_content(&mut sink).await?;
        } else {
            self.read_plain_content(&mut sink, content_length).await?;
        }
        sink.finish().map_err(AttemptOutcome::Error)
    }

    async fn read_plain_content(
        &mut self,
        sink: &mut ContentSink,
        content_length: Option<u64>,
    ) -> Result<(), AttemptOutcome> {
        let timeout = self.io_timeout();
        let mut total = 0u64;

        // 读响应头时多收到的字节先行交付。
        let leftover = self.conn.as_mut().expect("connected").take_buffered();
        if !leftover.is_empty() {
            total += leftover.len() as u64;
            if let Some(expected) = content_length {
                if total > expected {
                    return Err(AttemptOutcome::Error(self.exceeded_content_length(
                        total,
                        expected,
                    )));
                }
            }
            sink.push(&leftover).map_err(AttemptOutcome::Error)?;
        }

        loop {
            if content_length == Some(total) {
                return Ok(());
            }
            let max_read = content_length
                .map(|expected| ((expected - total) as usize).min(MAX_READ_LENGTH))
                .unwrap_or(MAX_READ_LENGTH);

            let start = Instant::now();
            let conn = self.conn.as_mut().expect("connected");
            let data = timed(&mut self.cancel_rx, timeout, conn.read_exact_or_eof(max_read))
                .await
                .map_err(|err| {
                    AttemptOutcome::Error(err.into_error(
                        "read response content",
                        ErrorKind::ReadFailure,
                        &format!("Failure while reading content. Url: {}", self.current_url),
                    ))
                })?;
            self.meter_incoming(data.len(), start);

            if data.is_empty() {
                return match content_length {
                    Some(expected) if total < expected => {
                        Err(AttemptOutcome::Error(Error::new(
                            ErrorKind::ReadFailure,
                            format!(
                                "Failure while reading content. Url: {} \
                                 Error: Transfer closed with {} bytes remaining to read.",
                                self.current_url,
                                expected - total
                            ),
                        )))
                    }
                    _ => Ok(()),
                };
            }

            total += data.len() as u64;
            sink.push(&data).map_err(AttemptOutcome::Error)?;
            self.pace(start.elapsed())
                .await
                .map_err(AttemptOutcome::Error)?;
        }
    }

    async fn read_chunked_content(
        &mut self,
        sink: &mut ContentSink,
    ) -> Result<(), AttemptOutcome> {
        let timeout = self.io_timeout();
        loop {
            let start = Instant::now();
            let conn = self.conn.as_mut().expect("connected");
            let size_line = timed(
                &mut self.cancel_rx,
                timeout,
                conn.read_until(b"\r\n", MAX_CHUNK_SIZE_LINE),
            )
            .await
            .map_err(|err| {
                AttemptOutcome::Error(err.into_error(
                    "read response content",
                    ErrorKind::ReadFailure,
                    &format!("Failure while reading chunked content. Url: {}", self.current_url),
                ))
            })?;
            self.meter_incoming(size_line.len(), start);

            let size_text = String::from_utf8_lossy(&size_line);
            let size_text = size_text.trim();
            let chunk_size = u64::from_str_radix(size_text, 16).map_err(|err| {
                AttemptOutcome::Error(Error::new(
                    ErrorKind::ReadFailure,
                    format!("Failure while parsing chunk: {} Chunk: {}", err, size_text),
                ))
            })? as usize;

            if chunk_size == 0 {
                // 末尾的空块后跟空行，不解析分块尾部。
                let conn = self.conn.as_mut().expect("connected");
                let terminated = timed(&mut self.cancel_rx, timeout, async {
                    conn.read_exact_buffered(2).await?;
                    Ok(conn.buffered_len() == 0 && !conn.has_more_data().await?)
                })
                .await
                .map_err(|err| {
                    AttemptOutcome::Error(err.into_error(
                        "read response content",
                        ErrorKind::ReadFailure,
                        &format!(
                            "Failure while reading chunked content. Url: {}",
                            self.current_url
                        ),
                    ))
                })?;
                if terminated {
                    return Ok(());
                }
                // 后面还有数据，这只是个零长度的中间块。
                sink.push(&[]).map_err(AttemptOutcome::Error)?;
                continue;
            }

            let start = Instant::now();
            let conn = self.conn.as_mut().expect("connected");
            let data = timed(
                &mut self.cancel_rx,
                timeout,
                conn.read_exact_buffered(chunk_size + 2),
            )
            .await
            .map_err(|err| {
                AttemptOutcome::Error(err.into_error(
                    "read response content",
                    ErrorKind::ReadFailure,
                    &format!("Failure while reading chunked content. Url: {}", self.current_url),
                ))
            })?;
            self.meter_incoming(data.len(), start);

            sink.push(&data[..chunk_size]).map_err(AttemptOutcome::Error)?;
            self.pace(start.elapsed())
                .await
                .map_err(AttemptOutcome::Error)?;
        }
    }

    fn exceeded_content_length(&self, total: u64, expected: u64) -> Error {
        Error::new(
            ErrorKind::ReadFailure,
            format!(
                "Failure while reading content. Url: {} Error: Exceeded content length. \
                 Total read: {} Content length: {}",
                self.current_url, total, expected
            ),
        )
    }
}

fn effective_port(url: &Url, is_tls: bool) -> Result<u16, AttemptOutcome> {
    if url.port().is_empty() {
        Ok(if is_tls { 443 } else { 80 })
    } else {
        url.port().parse::<u16>().map_err(|_| {
            AttemptOutcome::Error(Error::new(
                ErrorKind::InvalidUrl,
                format!("Invalid port in url: {}", url.full_url()),
            ))
        })
    }
}

fn proxy_credentials(proxy: &Proxy) -> String {
    BASE64.encode(format!("{}:{}", proxy.username, proxy.password))
}

/// 响应体的交付端
///
/// 需要解压时压缩字节流经解压器，交付位置以解压后的字节计。
struct ContentSink {
    observer: ObserverHandle,
    delivered: u64,
    gzip: Option<GzDecoder<Vec<u8>>>,
}

impl ContentSink {
    fn new(gzip: bool, observer: ObserverHandle) -> Self {
        Self {
            observer,
            delivered: 0,
            gzip: gzip.then(|| GzDecoder::new(Vec::new())),
        }
    }

    fn push(&mut self, data: &[u8]) -> Result<(), Error> {
        match &mut self.gzip {
            None => {
                self.deliver(data.to_vec());
                Ok(())
            }
            Some(decoder) => {
                decoder.write_all(data).map_err(compression_failure)?;
                let decompressed = std::mem::take(decoder.get_mut());
                if !decompressed.is_empty() {
                    self.deliver(decompressed);
                }
                Ok(())
            }
        }
    }

    fn finish(mut self) -> Result<(), Error> {
        if let Some(mut decoder) = self.gzip.take() {
            decoder.try_finish().map_err(compression_failure)?;
            let decompressed = std::mem::take(decoder.get_mut());
            if !decompressed.is_empty() {
                self.deliver(decompressed);
            }
        }
        Ok(())
    }

    fn deliver(&mut self, bytes: Vec<u8>) {
        let start_pos = self.delivered;
        self.delivered += bytes.len() as u64;
        self.observer.content(start_pos, SharedBuffer::new(bytes));
    }
}

fn compression_failure(err: std::io::Error) -> Error {
    Error::new(
        ErrorKind::CompressionFailure,
        format!("Compression failure. Error: {}", err),
    )
}
