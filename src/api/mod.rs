//! REST API layer: route handlers, DTOs, identity extractors and router
//! composition.
//!
//! All resource endpoints are mounted under `/api/v1`; `/health` and
//! `/config/game` live at the root.

pub mod dto;
pub mod handlers;
pub mod identity;
pub mod openapi;

use axum::Router;

use crate::app_state::AppState;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes());

    #[cfg(feature = "swagger-ui")]
    let router = {
        use utoipa::OpenApi;
        router.merge(
            utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", openapi::ApiDoc::openapi()),
        )
    };

    router
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::identity::ADMIN_HEADER;
    use crate::app::{build_app, build_engine};
    use crate::app_state::AppState;
    use crate::config::EngineConfig;
    use crate::domain::AdminId;
    use crate::ws::BroadcastHub;

    fn app() -> Router {
        let state = AppState {
            engine: build_engine(&EngineConfig::default()),
            hub: BroadcastHub::new(4),
            persistence: None,
        };
        build_app(state, Duration::from_secs(1))
    }

    async fn status_of(app: Router, request: Request<Body>) -> StatusCode {
        let Ok(response) = app.oneshot(request).await else {
            panic!("router failed");
        };
        response.status()
    }

    fn request(method: &str, uri: &str, admin: Option<AdminId>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(admin) = admin {
            builder = builder.header(ADMIN_HEADER, admin.to_string());
        }
        let Ok(request) = builder.body(Body::empty()) else {
            panic!("request builds");
        };
        request
    }

    #[tokio::test]
    async fn routes_are_mounted() {
        let app = app();
        assert_eq!(
            status_of(app.clone(), request("GET", "/health", None)).await,
            StatusCode::OK
        );
        assert_eq!(
            status_of(app.clone(), request("GET", "/config/game", None)).await,
            StatusCode::OK
        );
        assert_eq!(
            status_of(app.clone(), request("GET", "/api/v1/rounds", None)).await,
            StatusCode::OK
        );
        assert_eq!(
            status_of(app, request("GET", "/api/v1/nowhere", None)).await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn identity_headers_are_enforced() {
        let app = app();
        assert_eq!(
            status_of(app.clone(), request("GET", "/api/v1/bets", None)).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(app.clone(), request("POST", "/api/v1/rounds", None)).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(app, request("POST", "/api/v1/rounds", Some(AdminId::new()))).await,
            StatusCode::CREATED
        );
    }

    #[cfg(feature = "swagger-ui")]
    #[tokio::test]
    async fn openapi_document_is_served() {
        assert_eq!(
            status_of(app(), request("GET", "/api-docs/openapi.json", None)).await,
            StatusCode::OK
        );
    }
}
