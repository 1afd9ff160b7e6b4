use actix_web::{HttpResponse, Responder, Scope, web};

pub fn scope() -> Scope {
    web::scope("/user").service(web::resource(["", "/"]).route(web::get().to(index)))
}

// TODO: serve users from the database once the user table exists.
async fn index() -> impl Responder {
    HttpResponse::Ok().finish()
}
