use crate::signing::SignError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Unable to post request: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Unable to parse service response: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Unexpected response type. Expected {0}")]
    UnexpectedResponse(&'static str),
    #[error("Unable to load file content: {0}")]
    UnloadableContent(String),
    #[error("Unexpected file content string for {0}: expected a url")]
    NotAUrl(String),
    #[error("{0} is not supported by this job family")]
    Unsupported(&'static str),
    #[error("Service rejected request: {0}")]
    Rejected(String),
    #[error(transparent)]
    Sign(#[from] SignError),
}
