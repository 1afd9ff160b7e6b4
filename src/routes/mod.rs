use actix_web::web;

pub mod user;

/// Registers every versioned route.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/v1").service(user::scope()));
}
