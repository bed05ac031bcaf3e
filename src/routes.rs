use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::{api_keys, auth, vault_api};

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/register", post(auth::register_user))
        .route("/api/login", post(auth::login_user))
        .route("/api/logout", post(auth::logout_user))
        .route("/api/me", get(auth::current_user))
        .route(
            "/api/keys",
            get(api_keys::list_keys).post(api_keys::create_key),
        )
        .route("/api/keys/:id", delete(api_keys::revoke_key))
        .route(
            "/manage-provider-keys",
            post(vault_api::manage_provider_keys).options(vault_api::preflight),
        )
        .layer(axum::middleware::from_fn(vault_api::cors))
}
