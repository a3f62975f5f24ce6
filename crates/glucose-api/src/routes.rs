use super::{admin, levels, prepopulate};
use crate::config::{AdminConfig, UploadConfig};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

pub(super) fn setup(
    app_state: super::AppState,
    upload: &UploadConfig,
    admin: &AdminConfig,
) -> axum::routing::Router {
    let mut router = axum::Router::new()
        .route("/v1/levels/", get(levels::list))
        .route("/v1/levels/{id}/", get(levels::retrieve))
        .route("/v1/prepopulate-data/", post(prepopulate::post));
    if admin.enabled {
        router = router.nest("/admin", admin::routes());
    }
    router
        .layer(DefaultBodyLimit::max(upload.max_bytes))
        .layer(TraceLayer::new_for_http())
        .fallback(fallback)
        .with_state(app_state)
}

pub async fn fallback(_uri: axum::http::Uri) -> impl axum::response::IntoResponse {
    crate::responses::not_found()
}
