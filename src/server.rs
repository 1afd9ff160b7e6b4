use crate::db::Database;
use crate::{middlewares, routes};
use actix_web::middleware::Logger;
use actix_web::{App, HttpServer, web};
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("http server stopped with an error")]
    Serve(#[source] io::Error),
}

/// Binds `addr` and serves until the server is stopped (SIGINT/SIGTERM).
/// In-flight requests are drained before this returns.
pub async fn serve(addr: SocketAddr, db: Database) -> Result<(), ServerError> {
    let max_connections = db.config().max_connections;
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(db.clone()))
            .wrap(middlewares::json_content_type())
            .wrap(middlewares::cors())
            .wrap(Logger::default())
            .configure(routes::configure)
    })
    .bind(addr)
    .map_err(|source| ServerError::Bind { addr, source })?;

    info!(%addr, max_connections, "listening");
    server.run().await.map_err(ServerError::Serve)
}
