//! Tracing setup.
//!
//! `RUST_LOG` controls the filter (default: `info`). Records emitted through
//! the `log` crate, such as actix-web's request logger, are forwarded too.

use tracing_subscriber::EnvFilter;

pub type InitError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub fn init() -> Result<(), InitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .try_init()
}
