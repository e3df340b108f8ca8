mod container;
mod header_utils;
mod proxy;
mod writers;

pub(crate) use container::DownloadContainer;
pub(crate) use header_utils::filename_from_headers;
