use db::{Database, PoolConfig};
use dotenv::dotenv;
use error::StartupError;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod middlewares;
pub mod routes;
pub mod server;

#[actix_web::main]
async fn main() -> ExitCode {
    dotenv().ok();
    if let Err(err) = logging::init() {
        eprintln!("Failed to initialise logging: {err}");
    }

    let result = match config::AppConfig::from_env() {
        Ok(config) => run(config, CancellationToken::new()).await,
        Err(err) => Err(err.into()),
    };

    match result {
        Ok(()) => {
            info!("service stopped");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{}", err.report());
            ExitCode::FAILURE
        }
    }
}

/// Builds the pool, then serves until shutdown. The pool is closed on every
/// path out of here once it exists.
async fn run(config: config::AppConfig, shutdown: CancellationToken) -> Result<(), StartupError> {
    let pool_config = PoolConfig::from_dsn(&config.database_url)?;
    let db = Database::connect(pool_config, &shutdown)?;

    let served = server::serve(config.service_addr, db.clone()).await;

    shutdown.cancel();
    db.close().await;

    served.map_err(StartupError::from)
}
