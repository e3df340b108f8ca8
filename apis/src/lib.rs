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

mod caller;
mod error;
pub mod upload;
pub mod user;

pub use stratus_http as http;
pub use stratus_http_client as http_client;

pub use caller::ApiCaller;
pub use error::{ApiError, ApiResult};
pub use upload::UploadTarget;
