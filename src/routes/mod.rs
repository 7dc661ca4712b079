use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::state::AppState;

pub mod campaigns;
pub mod documents;
pub mod health;
pub mod workflows;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(headers))
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let documents_routes = Router::new()
        .route(
            "/",
            get(documents::list_documents).post(documents::create_document),
        )
        .route(
            "/:id",
            get(documents::get_document)
                .patch(documents::update_document)
                .delete(documents::delete_document),
        )
        .route(
            "/:id/versions",
            get(documents::list_versions).post(documents::upload_version),
        )
        .route("/:id/publish", post(documents::publish_document))
        .route(
            "/:id/workflow",
            get(workflows::get_workflow).post(workflows::submit_workflow),
        )
        .route(
            "/:id/ack-campaigns",
            get(campaigns::list_campaigns).post(campaigns::create_campaign),
        );

    let workflows_routes = Router::new().route(
        "/:id/steps/:step_id/action",
        post(workflows::act_on_step),
    );

    let ack_routes = Router::new()
        .route("/assignments", get(campaigns::my_assignments))
        .route(
            "/assignments/:id/acknowledge",
            post(campaigns::acknowledge),
        );

    Router::new()
        .nest("/api/documents", documents_routes)
        .nest("/api/workflows", workflows_routes)
        .nest("/api/ack", ack_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024 * 512))
}
