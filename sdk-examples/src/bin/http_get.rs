use anyhow::{anyhow, Result};
use std::{
    io::Write,
    sync::{mpsc, Arc, Mutex},
};
use stratus_http_client::{
    Error, Headers, HttpConfig, HttpRequest, Proxy, ResponseObserver, SharedBuffer, Url,
};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "http_get")]
struct Opt {
    /// Print response headers
    #[structopt(long)]
    show_headers: bool,

    /// Request headers only, skip the response body
    #[structopt(short = "H", long)]
    headers_only: bool,

    /// Bandwidth usage percent, 1 to 100
    #[structopt(short = "b", long)]
    bandwidth: Option<u32>,

    /// Send DATA as a POST body
    #[structopt(long)]
    post_data: Option<String>,

    /// Proxy as host:port
    #[structopt(long)]
    proxy: Option<String>,

    /// Proxy username
    #[structopt(long)]
    proxyuser: Option<String>,

    /// Proxy password
    #[structopt(long)]
    proxypass: Option<String>,

    /// URL to request
    url: String,
}

#[derive(Debug)]
struct PrintingObserver {
    show_headers: bool,
    done: Mutex<mpsc::Sender<std::result::Result<(), Error>>>,
}

impl ResponseObserver for PrintingObserver {
    fn redirect_header_received(&self, headers: &Headers, new_url: &Url) {
        log::info!("redirected ({}) to {}", headers.status_code, new_url.full_url());
    }

    fn response_header_received(&self, headers: &Headers) {
        if self.show_headers {
            eprint!("{}", headers.raw_headers);
        }
    }

    fn response_content_received(&self, _start_pos: u64, buffer: SharedBuffer) {
        let stdout = std::io::stdout();
        let mut stdout = stdout.lock();
        let _ = stdout.write_all(&buffer);
    }

    fn request_complete(&self) {
        let _ = self.done.lock().unwrap().send(Ok(()));
    }

    fn request_error(&self, error: Error) {
        let _ = self.done.lock().unwrap().send(Err(error));
    }
}

fn parse_proxy(opt: &Opt) -> Result<Option<Proxy>> {
    let Some(proxy) = &opt.proxy else {
        return Ok(None);
    };
    let (host, port) = proxy
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("proxy must be host:port"))?;
    let port: u16 = port.parse()?;
    Ok(Some(match (&opt.proxyuser, &opt.proxypass) {
        (Some(user), pass) => Proxy::new_with_credentials(
            host,
            port,
            user.to_owned(),
            pass.to_owned().unwrap_or_default(),
        ),
        (None, _) => Proxy::new(host, port),
    }))
}

fn main() -> Result<()> {
    env_logger::init();
    let opt: Opt = Opt::from_args();

    let mut builder = HttpConfig::builder();
    if let Some(percent) = opt.bandwidth {
        builder.bandwidth_usage_percent(percent);
    }
    if let Some(proxy) = parse_proxy(&opt)? {
        builder.http_proxy(proxy.to_owned());
        builder.https_proxy(proxy);
    }
    let config = builder.build();

    let (done_tx, done_rx) = mpsc::channel();
    let observer = Arc::new(PrintingObserver {
        show_headers: opt.show_headers,
        done: Mutex::new(done_tx),
    });

    let request = HttpRequest::new(config, opt.url, observer);
    if opt.headers_only {
        request.set_headers_only(true)?;
    }
    if let Some(post_data) = opt.post_data {
        request.set_post_data(post_data.as_bytes())?;
    }
    request.start();

    match done_rx.recv()? {
        Ok(()) => Ok(()),
        Err(error) => Err(anyhow!("{:?}: {}", error.kind(), error)),
    }
}
