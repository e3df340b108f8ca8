use anyhow::{anyhow, Result};
use std::{
    io::Write,
    path::PathBuf,
    sync::{mpsc, Mutex},
};
use stratus_download_manager::{
    download, DownloadConfig, DownloadError, DownloadErrorKind, DownloadStatus, DownloadTarget,
    OnExists, PathOrChooser, SuccessOutcome,
};
use stratus_http_client::HttpConfig;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "download_url")]
struct Opt {
    /// Name the file from the Content-Disposition header
    #[structopt(long)]
    header_name: bool,

    /// Continue a partial download
    #[structopt(short = "c", long = "continue")]
    continue_download: bool,

    /// Write the download to PATH
    #[structopt(short = "o", long)]
    output: Option<PathBuf>,

    /// URL to download
    url: String,
}

fn target_from_options(opt: &Opt) -> Result<DownloadTarget> {
    if opt.continue_download {
        let path = opt
            .output
            .to_owned()
            .ok_or_else(|| anyhow!("--continue requires --output"))?;
        return Ok(DownloadTarget::ContinueToPath {
            path: PathOrChooser::Path(path),
            expected_size: None,
        });
    }
    if opt.header_name {
        return Ok(DownloadTarget::WriteToPathFromHeader {
            chooser: std::sync::Arc::new(|filename, _url, _headers| {
                filename.map(PathBuf::from).ok_or_else(|| {
                    DownloadError::new(
                        DownloadErrorKind::NoFilenameInHeader,
                        "No filename in response header.",
                    )
                })
            }),
        });
    }
    match &opt.output {
        Some(path) => Ok(DownloadTarget::WriteToPath {
            path: path.to_owned(),
            on_exists: OnExists::RewriteIfExisting,
        }),
        None => Ok(DownloadTarget::WriteToMemory),
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let opt: Opt = Opt::from_args();

    let target = target_from_options(&opt)?;
    let config = DownloadConfig::new(HttpConfig::new(), target);

    let (done_tx, done_rx) = mpsc::channel();
    let done_tx = Mutex::new(done_tx);
    let _download = download(opt.url, config, move |status| match status {
        DownloadStatus::Progress { bytes_read } => {
            log::info!("downloaded {} bytes", bytes_read);
        }
        DownloadStatus::Failure(error) => {
            let _ = done_tx.lock().unwrap().send(Err(error));
        }
        DownloadStatus::Success(outcome) => {
            let _ = done_tx.lock().unwrap().send(Ok(outcome));
        }
    });

    match done_rx.recv()? {
        Ok(SuccessOutcome::OnDisk(path)) => {
            eprintln!("saved to {}", path.display());
            Ok(())
        }
        Ok(SuccessOutcome::InMemory(buffer)) => {
            let stdout = std::io::stdout();
            let mut stdout = stdout.lock();
            stdout.write_all(&buffer)?;
            Ok(())
        }
        Ok(SuccessOutcome::NoTarget) => Ok(()),
        Err(error) => Err(anyhow!("{:?}: {}", error.kind(), error)),
    }
}
