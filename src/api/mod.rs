pub mod auth;
pub mod error;
pub mod farmers;
pub mod rate_limit;
pub mod uploads;
pub mod validation;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::backend::LocalBackend;
use crate::config::BackendKind;
use crate::ui;
use crate::AppState;

// Multipart framing and the coordinate fields on top of the image itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.upload.max_image_bytes + MULTIPART_OVERHEAD;

    // Login and registration (pages and JSON)
    let auth_routes = Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/register", post(auth::register))
        .merge(ui::create_router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ));

    let upload_routes = Router::new()
        .route("/api/uploads", post(uploads::create))
        .merge(ui::upload_router())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_upload,
        ));

    let api_routes = Router::new()
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/uploads/recent", get(uploads::recent))
        .route("/api/farmers", get(farmers::list))
        .merge(ui::session_router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    let mut router = Router::new()
        .route("/health", get(health_check))
        .merge(auth_routes)
        .merge(upload_routes)
        .merge(api_routes);

    // Objects of the self-hosted backend are public by URL
    if state.config.backend.kind == BackendKind::Local {
        let storage = LocalBackend::storage_root_in(&state.config.server.data_dir);
        router = router.nest_service("/storage", ServeDir::new(storage));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::backend;
    use crate::backend::Backend;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const BOUNDARY: &str = "farmconnect-test-boundary";

    async fn test_app() -> (Router, Arc<AppState>, tempfile::TempDir) {
        let (local, dir) = backend().await;
        local
            .ensure_admin_user("admin@farm.test", "admin-pass")
            .await
            .unwrap();

        let mut config = Config::default();
        config.server.data_dir = dir.path().to_path_buf();
        config.rate_limit.auth_requests_per_window = 3;

        let state = Arc::new(AppState::new(config, Arc::new(local)));
        (create_router(state.clone()), state, dir)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn json_post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn multipart_body(image: Option<(&str, &str, &[u8])>, fields: &[(&str, &str)]) -> Vec<u8> {
        let mut body = Vec::new();
        if let Some((file_name, content_type, bytes)) = image {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        for (name, value) in fields {
            body.extend_from_slice(
                format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                    .as_bytes(),
            );
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    async fn register_and_login(app: &Router, email: &str) -> String {
        let response = app
            .clone()
            .oneshot(json_post(
                "/api/auth/register",
                serde_json::json!({
                    "full_name": "Amina Odhiambo",
                    "email": email,
                    "phone": "0711 000 111",
                    "password": "secret-pass"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(json_post(
                "/api/auth/login",
                serde_json::json!({ "email": email, "password": "secret-pass" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await["access_token"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _, _dir) = test_app().await;
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "OK");
    }

    #[tokio::test]
    async fn test_root_redirects_to_login() {
        let (app, _, _dir) = test_app().await;
        let response = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_redirection());
        assert_eq!(response.headers()[header::LOCATION], "/login");
    }

    #[tokio::test]
    async fn test_dashboard_without_session_redirects_with_notice() {
        let (app, _, _dir) = test_app().await;
        let response = app
            .oneshot(Request::get("/dashboard").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_redirection());
        assert_eq!(response.headers()[header::LOCATION], "/login");
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with(ui::FLASH_COOKIE));
    }

    #[tokio::test]
    async fn test_login_form_sets_session_cookie_and_routes_admin() {
        let (app, _, _dir) = test_app().await;
        let response = app
            .oneshot(
                Request::post("/login")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("email=admin%40farm.test&password=admin-pass"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_redirection());
        assert_eq!(response.headers()[header::LOCATION], "/admin");

        let cookies: Vec<_> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert!(cookies.iter().any(|c| c.starts_with(ui::SESSION_COOKIE)));
    }

    #[tokio::test]
    async fn test_login_form_bad_credentials_rerenders() {
        let (app, _, _dir) = test_app().await;
        let response = app
            .oneshot(
                Request::post("/login")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("email=nobody%40farm.test&password=whatever"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let html = body_text(response).await;
        assert!(html.contains("register if you don&#x27;t have an account"));
    }

    #[tokio::test]
    async fn test_api_login_error_envelope() {
        let (app, _, _dir) = test_app().await;
        let response = app
            .oneshot(json_post(
                "/api/auth/login",
                serde_json::json!({ "email": "nobody@farm.test", "password": "whatever" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "unauthorized");
    }

    #[tokio::test]
    async fn test_api_register_validation_details() {
        let (app, _, _dir) = test_app().await;
        let response = app
            .oneshot(json_post(
                "/api/auth/register",
                serde_json::json!({
                    "full_name": "",
                    "email": "bad",
                    "phone": "12",
                    "password": "123"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "validation_error");
        assert!(body["error"]["details"]["phone"].is_array());
    }

    #[tokio::test]
    async fn test_upload_then_list_recent() {
        let (app, _, dir) = test_app().await;
        let token = register_and_login(&app, "amina@farm.test").await;

        let body = multipart_body(
            Some(("Field.PNG", "image/png", &[0x89, b'P', b'N', b'G'])),
            &[("latitude", "-1.292100"), ("longitude", "36.821900"), ("accuracy", "12")],
        );
        let response = app
            .clone()
            .oneshot(
                Request::post("/api/uploads")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={}", BOUNDARY),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let record = body_json(response).await;
        let image_url = record["image_url"].as_str().unwrap().to_string();
        assert!(image_url.ends_with(".png"));

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/uploads/recent")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let listing = body_json(response).await;
        assert_eq!(listing["total"], 1);
        assert_eq!(listing["uploads"][0]["latitude"], -1.2921);

        // Stored object is served under /storage
        let path = image_url.trim_start_matches("http://localhost:8080");
        let response = app
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(dir.path().join("storage/crop_images").exists());
    }

    #[tokio::test]
    async fn test_upload_rejects_non_image() {
        let (app, _, _dir) = test_app().await;
        let token = register_and_login(&app, "amina@farm.test").await;

        let body = multipart_body(
            Some(("notes.pdf", "application/pdf", b"%PDF-1.4")),
            &[("latitude", "1.0"), ("longitude", "2.0")],
        );
        let response = app
            .oneshot(
                Request::post("/api/uploads")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={}", BOUNDARY),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["message"], "Please select a valid image file");
    }

    #[tokio::test]
    async fn test_upload_without_location_is_rejected() {
        let (app, state, _dir) = test_app().await;
        let token = register_and_login(&app, "amina@farm.test").await;

        let body = multipart_body(Some(("a.jpg", "image/jpeg", &[0xff, 0xd8])), &[]);
        let response = app
            .oneshot(
                Request::post("/api/uploads")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={}", BOUNDARY),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(
            body["error"]["message"],
            "Please select an image and capture location"
        );

        let session = state.backend.get_session(&token).await.unwrap().unwrap();
        let recent = state
            .backend
            .recent_crop_images(&session, &session.user.id, 5)
            .await
            .unwrap();
        assert!(recent.is_empty());
    }

    #[tokio::test]
    async fn test_reported_location_error_is_surfaced() {
        let (app, _, _dir) = test_app().await;
        let token = register_and_login(&app, "amina@farm.test").await;

        let body = multipart_body(
            Some(("a.jpg", "image/jpeg", &[0xff, 0xd8])),
            &[("location_error", "1")],
        );
        let response = app
            .oneshot(
                Request::post("/api/uploads")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .header(
                        header::CONTENT_TYPE,
                        format!("multipart/form-data; boundary={}", BOUNDARY),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert_eq!(
            body["error"]["message"],
            "Please allow location access in your browser settings"
        );
    }

    #[tokio::test]
    async fn test_farmers_endpoint_is_admin_only() {
        let (app, _, _dir) = test_app().await;
        let token = register_and_login(&app, "amina@farm.test").await;

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/farmers")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(json_post(
                "/api/auth/login",
                serde_json::json!({ "email": "admin@farm.test", "password": "admin-pass" }),
            ))
            .await
            .unwrap();
        let login = body_json(response).await;
        assert_eq!(login["is_admin"], true);
        assert_eq!(login["redirect_to"], "/admin");
        let admin_token = login["access_token"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/farmers?q=AMINA")
                    .header(header::AUTHORIZATION, format!("Bearer {}", admin_token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["matched"], 1);
        assert_eq!(body["farmers"][0]["full_name"], "Amina Odhiambo");

        let response = app
            .oneshot(
                Request::get("/api/farmers?q=nobody")
                    .header(header::AUTHORIZATION, format!("Bearer {}", admin_token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["matched"], 0);
        assert_eq!(
            body["message"],
            "No farmers found matching your search criteria"
        );
    }

    #[tokio::test]
    async fn test_admin_page_requires_admin() {
        let (app, _, _dir) = test_app().await;
        let token = register_and_login(&app, "amina@farm.test").await;

        let response = app
            .oneshot(
                Request::get("/admin")
                    .header(header::COOKIE, format!("{}={}", ui::SESSION_COOKIE, token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_redirection());
        assert_eq!(response.headers()[header::LOCATION], "/login");
    }

    #[tokio::test]
    async fn test_dashboard_renders_for_farmer() {
        let (app, _, _dir) = test_app().await;
        let token = register_and_login(&app, "amina@farm.test").await;

        let response = app
            .oneshot(
                Request::get("/dashboard")
                    .header(header::COOKIE, format!("{}={}", ui::SESSION_COOKIE, token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("Farmer Dashboard"));
        assert!(html.contains("No uploads yet"));
    }

    #[tokio::test]
    async fn test_auth_submissions_are_rate_limited() {
        let (app, _, _dir) = test_app().await;
        let attempt = || {
            json_post(
                "/api/auth/login",
                serde_json::json!({ "email": "nobody@farm.test", "password": "whatever" }),
            )
        };

        for _ in 0..3 {
            let response = app.clone().oneshot(attempt()).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
        let response = app.clone().oneshot(attempt()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("Retry-After"));

        // Rendering the page is not counted
        let response = app
            .oneshot(Request::get("/login").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_logout_survives_exhausted_auth_budget() {
        let (app, state, _dir) = test_app().await;
        // Registration and login spend two of the three auth requests
        let token = register_and_login(&app, "amina@farm.test").await;

        let failed = || {
            json_post(
                "/api/auth/login",
                serde_json::json!({ "email": "nobody@farm.test", "password": "whatever" }),
            )
        };
        let response = app.clone().oneshot(failed()).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = app.clone().oneshot(failed()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let response = app
            .oneshot(
                Request::post("/logout")
                    .header(header::COOKIE, format!("{}={}", ui::SESSION_COOKIE, token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_redirection());
        assert_eq!(response.headers()[header::LOCATION], "/login");
        assert!(state.backend.get_session(&token).await.unwrap().is_none());
    }
}
