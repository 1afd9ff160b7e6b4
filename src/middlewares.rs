use actix_cors::Cors;
use actix_web::http::header;
use actix_web::middleware::DefaultHeaders;

/// Any origin, method and header.
pub fn cors() -> Cors {
    Cors::permissive()
}

/// Responses default to JSON unless the handler sets its own content type.
pub fn json_content_type() -> DefaultHeaders {
    DefaultHeaders::new().add((header::CONTENT_TYPE, "application/json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{App, HttpResponse, test, web};

    async fn empty() -> HttpResponse {
        HttpResponse::Ok().finish()
    }

    async fn plain_text() -> HttpResponse {
        HttpResponse::Ok().content_type("text/plain").body("pong")
    }

    #[actix_web::test]
    async fn responses_default_to_json() {
        let app = test::init_service(
            App::new()
                .wrap(json_content_type())
                .route("/empty", web::get().to(empty))
                .route("/text", web::get().to(plain_text)),
        )
        .await;

        let resp = test::call_service(&app, test::TestRequest::get().uri("/empty").to_request()).await;
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "application/json");

        let resp = test::call_service(&app, test::TestRequest::get().uri("/text").to_request()).await;
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "text/plain");
    }

    #[actix_web::test]
    async fn cors_allows_any_origin() {
        let app = test::init_service(
            App::new()
                .wrap(cors())
                .route("/", web::get().to(empty)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/")
            .insert_header((header::ORIGIN, "https://anywhere.example"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://anywhere.example"
        );

        let preflight = test::TestRequest::default()
            .method(actix_web::http::Method::OPTIONS)
            .uri("/")
            .insert_header((header::ORIGIN, "https://anywhere.example"))
            .insert_header((header::ACCESS_CONTROL_REQUEST_METHOD, "DELETE"))
            .to_request();
        let resp = test::call_service(&app, preflight).await;
        assert!(resp.status().is_success());
        assert!(resp.headers().contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
    }
}
