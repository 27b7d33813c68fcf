//! Axum HTTP surface for the passkey-login relying party.
//!
//! Mount `auth_router()` under `AUTH_ROUTE_PREFIX` (default `/auth`):
//!
//! ```rust,no_run
//! use axum::Router;
//! use passkey_login_axum::{AUTH_ROUTE_PREFIX, auth_router};
//!
//! let app: Router = Router::new().nest(AUTH_ROUTE_PREFIX.as_str(), auth_router());
//! ```

mod error;
mod handlers;

use axum::routing::{Router, post};

pub use error::ApiError;
pub use passkey_login::{AUTH_ROUTE_PREFIX, init};

/// The relying-party endpoints, relative to the mount prefix.
pub fn auth_router() -> Router {
    Router::new()
        .route("/id", post(handlers::check_username))
        .route("/register/challenge", post(handlers::registration_challenge))
        .route("/register", post(handlers::registration_verify))
        .route("/login/challenge", post(handlers::login_challenge))
        .route("/login", post(handlers::login_verify))
        .route("/verify", post(handlers::session_verify))
        .route("/logout", post(handlers::logout))
}
