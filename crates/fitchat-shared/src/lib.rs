pub mod chat_key;
pub mod constants;
pub mod conversation;
pub mod error;
pub mod paths;
pub mod types;
