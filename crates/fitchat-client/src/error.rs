use fitchat_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request failed with status {0}")]
    Status(u16),

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
