#![deny(
    absolute_paths_not_starting_with_crate,
    anonymous_parameters,
    explicit_outlives_requirements,
    keyword_idents,
    macro_use_extern_crate,
    meta_variable_misuse,
    non_ascii_idents,
    indirect_structural_match,
    trivial_numeric_casts,
    unsafe_code,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications
)]

mod detail;
mod download;
mod download_config;
mod download_status;
mod error;
mod readers;

pub use stratus_http as http;
pub use stratus_http_client as http_client;

pub use download::{download, Download};
pub use download_config::{
    DownloadConfig, DownloadConfigBuilder, DownloadTarget, OnExists, PathOrChooser,
    SelectFilePathCallback,
};
pub use download_status::{DownloadStatus, SuccessOutcome};
pub use error::{DownloadError, DownloadErrorKind};
pub use readers::{DownloadReader, Sha256Reader};
