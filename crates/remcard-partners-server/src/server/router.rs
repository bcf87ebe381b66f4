use crate::server::cors::{CorsPolicy, cors_middleware};
use crate::server::handler::{AppState, add_partner, method_not_allowed, preflight, readiness};
use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use std::sync::Arc;

/// Paths the endpoint answers on. The second one is what the site's form
/// posts to by default.
pub const ROUTES: [&str; 2] = ["/add-partner", "/api/add-partner"];

/// Builds the application router. CORS headers are applied to every
/// response, including errors and `405`s.
pub fn router(state: AppState, cors: CorsPolicy) -> Router {
    let endpoint = get(readiness)
        .post(add_partner)
        .options(preflight)
        .fallback(method_not_allowed);

    ROUTES
        .into_iter()
        .fold(Router::new(), |router, path| {
            router.route(path, endpoint.clone())
        })
        .layer(from_fn_with_state(Arc::new(cors), cors_middleware))
        .with_state(state)
}
