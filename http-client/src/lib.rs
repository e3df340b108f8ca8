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

mod bandwidth;
mod config;
mod engine;
mod request;
mod tls;

pub use stratus_http as http;

pub use bandwidth::{BandwidthMeter, SimpleBandwidthMeter};
pub use config::{HttpConfig, HttpConfigBuilder, Timeouts};
pub use request::HttpRequest;

pub use stratus_http::{
    Error, ErrorKind, Headers, PostDataPipe, Proxy, RedirectPolicy, RequestBody,
    ResponseObserver, Result, SelfSigned, SharedBuffer, Url,
};

pub mod prelude {
    pub use super::http::prelude::*;
    pub use super::BandwidthMeter;
}
