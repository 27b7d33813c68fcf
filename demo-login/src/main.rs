use axum::routing::{Router, get};

use passkey_login_axum::{AUTH_ROUTE_PREFIX, auth_router};

async fn index() -> &'static str {
    "passkey-login demo relying party"
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,passkey_login=debug".into()),
        )
        .init();

    passkey_login_axum::init().await?;

    let app = Router::new()
        .route("/", get(index))
        .nest(AUTH_ROUTE_PREFIX.as_str(), auth_router());

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:5001".to_string());
    tracing::info!("Starting relying party on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
