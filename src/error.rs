use crate::config::ConfigError;
use crate::db::DatabaseError;
use crate::server::ServerError;
use std::error::Error as _;
use thiserror::Error;

/// Anything that stops the service from starting or keeps it from serving.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error")]
    Config(#[from] ConfigError),

    #[error("database error")]
    Database(#[from] DatabaseError),

    #[error("router error")]
    Router(#[from] ServerError),
}

impl StartupError {
    /// The error followed by each of its sources, joined with `: `.
    pub fn report(&self) -> String {
        let mut message = self.to_string();
        let mut source = self.source();
        while let Some(err) = source {
            message.push_str(": ");
            message.push_str(&err.to_string());
            source = err.source();
        }
        message
    }
}
