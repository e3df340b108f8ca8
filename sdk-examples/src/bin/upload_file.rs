use anyhow::{anyhow, Result};
use std::{
    path::PathBuf,
    sync::{mpsc, Mutex},
};
use stratus_http_client::HttpConfig;
use stratus_upload_manager::{
    apis::{ApiCaller, UploadTarget},
    OnDuplicateAction, UploadManager, UploadRequest, UploadState,
};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "upload_file")]
struct Opt {
    /// Session token authorizing the API calls
    #[structopt(long)]
    token: String,

    /// API endpoint, defaults to the production endpoint
    #[structopt(long)]
    base_url: Option<String>,

    /// Upload into the folder with this key
    #[structopt(long, conflicts_with = "path")]
    folderkey: Option<String>,

    /// Upload into this cloud path
    #[structopt(long)]
    path: Option<String>,

    /// Store the file under this name
    #[structopt(long)]
    saveas: Option<String>,

    /// Replace an existing file with the same name
    #[structopt(short = "r", long, conflicts_with = "autorename")]
    replace: bool,

    /// Rename automatically when the name is taken
    #[structopt(short = "a", long)]
    autorename: bool,

    /// Files to upload
    #[structopt(required = true)]
    files: Vec<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let opt: Opt = Opt::from_args();

    let http_config = HttpConfig::new();
    let caller = match &opt.base_url {
        Some(base_url) => ApiCaller::new_with_base_url(http_config, opt.token.as_str(), base_url.as_str()),
        None => ApiCaller::new(http_config, opt.token.as_str()),
    };
    let manager = UploadManager::new(caller);

    let target_folder = match (&opt.folderkey, &opt.path) {
        (Some(folderkey), _) => Some(UploadTarget::ParentFolderKey(folderkey.to_owned())),
        (None, Some(path)) => Some(UploadTarget::CloudPath(path.to_owned())),
        (None, None) => None,
    };
    let on_duplicate = if opt.replace {
        OnDuplicateAction::Replace
    } else if opt.autorename {
        OnDuplicateAction::AutoRename
    } else {
        OnDuplicateAction::Fail
    };

    let (done_tx, done_rx) = mpsc::channel();
    for file in &opt.files {
        let mut request = UploadRequest::new(file).on_duplicate(on_duplicate);
        if let Some(folder) = &target_folder {
            request = request.target_folder(folder.to_owned());
        }
        if let Some(saveas) = &opt.saveas {
            request = request.target_name(saveas.as_str());
        }

        let done_tx = Mutex::new(done_tx.clone());
        manager.add(request, move |status| match status.state {
            UploadState::Completed { quickkey, filename } => {
                eprintln!(
                    "{}: uploaded as {} ({})",
                    status.path.display(),
                    filename.unwrap_or_default(),
                    quickkey
                );
                let _ = done_tx.lock().unwrap().send(Ok(()));
            }
            UploadState::Failed(error) => {
                let _ = done_tx.lock().unwrap().send(Err(anyhow!(
                    "{}: {:?}: {}",
                    status.path.display(),
                    error.kind(),
                    error
                )));
            }
            state => log::info!("{}: {:?}", status.path.display(), state),
        });
    }

    let mut failed = false;
    for _ in &opt.files {
        if let Err(error) = done_rx.recv()? {
            eprintln!("{}", error);
            failed = true;
        }
    }
    if failed {
        Err(anyhow!("one or more uploads failed"))
    } else {
        Ok(())
    }
}
