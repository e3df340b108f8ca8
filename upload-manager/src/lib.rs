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

mod chunking;
mod error;
mod hasher;
mod state_machine;
mod upload_manager;
mod upload_request;
mod upload_status;

pub use stratus_apis as apis;

pub use chunking::{chunk_max_size, chunk_ranges};
pub use error::{UploadError, UploadErrorKind};
pub use hasher::{hash_file, FileHashes};
pub use upload_manager::{UploadManager, UploadManagerBuilder};
pub use upload_request::{OnDuplicateAction, UploadRequest};
pub use upload_status::{UploadHandle, UploadModification, UploadState, UploadStatus};
