pub mod download_request;
pub mod status;
