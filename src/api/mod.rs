mod handlers;
mod middleware;

use axum::{
    http::{header, HeaderValue},
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::db::Database;

pub use handlers::{AppError, AppResult, ErrorBody};
pub use middleware::{etag, Actor, IfMatch, SecurityConfig, ACTOR_HEADER};

/// Router with authentication disabled and permissive CORS.
pub fn create_router(db: Database) -> Router {
    create_router_with_config(db, SecurityConfig::disabled())
}

pub fn create_router_with_config(db: Database, config: SecurityConfig) -> Router {
    let protected = Router::new()
        // Pages
        .route("/pages", get(handlers::list_pages).post(handlers::create_page))
        .route(
            "/pages/{id}",
            get(handlers::get_page)
                .put(handlers::update_page)
                .delete(handlers::delete_page),
        )
        // Components
        .route(
            "/pages/{id}/components",
            get(handlers::list_components).post(handlers::create_component),
        )
        .route(
            "/pages/{id}/components/{key}",
            get(handlers::get_component)
                .put(handlers::update_component)
                .delete(handlers::delete_component),
        )
        .route("/pages/{id}/components/{key}/move", post(handlers::move_component))
        .route("/pages/{id}/tree", get(handlers::get_component_tree))
        // Designer
        .route("/pages/{id}/designer", get(handlers::load_designer))
        .route("/pages/{id}/designer/ops", post(handlers::apply_designer_ops))
        .route("/pages/{id}/publish", post(handlers::publish_page))
        // Versions
        .route(
            "/pages/{id}/versions",
            get(handlers::list_versions).post(handlers::create_version),
        )
        .route("/pages/{id}/versions/{n}", get(handlers::get_version))
        .route("/pages/{id}/versions/{n}/restore", post(handlers::restore_version))
        .route_layer(from_fn_with_state(config.clone(), middleware::auth_middleware));

    let api = protected.route("/health", get(handlers::health));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config))
        .with_state(db)
}

fn cors_layer(config: &SecurityConfig) -> CorsLayer {
    match &config.cors_origins {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| match origin.parse() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!(origin = %origin, "Ignoring malformed CORS origin");
                        None
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers([header::ETAG])
        }
        None => CorsLayer::permissive(),
    }
}
