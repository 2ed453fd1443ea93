use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Malformed message record {id}: {reason}")]
    MalformedMessage { id: String, reason: String },
}
