use crate::config::Config;
use tower_http::cors::{Any, CorsLayer};

pub fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<axum::http::HeaderValue> = config
        .cors_allowed_origins
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    let cors = CorsLayer::new().allow_headers(Any).allow_methods(Any);
    if origins.is_empty() {
        // Wildcard – browsers on any site may upload; set VIDGATE_CORS_ORIGINS to restrict.
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(origins)
    }
}
