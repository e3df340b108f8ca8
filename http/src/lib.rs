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

mod body;
mod buffer;
mod error;
mod headers;
mod observer;
mod types;
mod url;

pub use body::{PostDataPipe, RequestBody};
pub use buffer::SharedBuffer;
pub use error::{Error, ErrorKind, Result};
pub use headers::{HeaderContainer, Headers};
pub use observer::ResponseObserver;
pub use types::{Proxy, RedirectPolicy, SelfSigned};
pub use url::Url;

pub mod prelude {
    pub use super::{PostDataPipe, ResponseObserver};
}
